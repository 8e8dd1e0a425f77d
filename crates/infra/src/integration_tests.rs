//! Integration tests for the full fulfillment pipeline.
//!
//! Tests: entry point → record store → background task → record store
//!
//! Verifies:
//! - Orders restock exactly the ordered amount and the task unregisters
//! - Production runs withdraw materials and credit the product exactly once
//! - Replacements and production share the finished-goods counter safely

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use fabline_inventory::InstallationStatus;
    use fabline_production::FlowState;

    use crate::config::FablineConfig;
    use crate::error::FulfillmentError;
    use crate::fulfillment::Fulfillment;
    use crate::production_run::ProduceOutcome;
    use crate::scheduler::{RecurringTask, Registration, TaskKey, TickOutcome};
    use crate::store::{ProductSeed, RecordStore, SeededProduct, Stores};

    fn config(interval_ms: u64) -> FablineConfig {
        FablineConfig {
            replenish_interval_ms: interval_ms,
            production_interval_ms: interval_ms,
            max_conflict_retries: 64,
            ..FablineConfig::default()
        }
    }

    fn setup(interval_ms: u64, seed: ProductSeed) -> (Fulfillment, SeededProduct) {
        let stores = Stores::in_memory();
        let seeded = stores.seed(&seed).unwrap();
        (Fulfillment::new(stores, &config(interval_ms)).unwrap(), seeded)
    }

    /// Poll `cond` until it holds or the timeout expires.
    fn wait_until(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn zero_production_step_is_rejected_before_any_stock_moves() {
        let stores = Stores::in_memory();
        let seeded = stores
            .seed(&ProductSeed::new("dome").material("lens", 2))
            .unwrap();
        let config = FablineConfig {
            production_step: 0,
            ..config(2)
        };

        let err = Fulfillment::new(stores.clone(), &config).unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));

        let lens = stores.materials.get(&seeded.material_ids[0]).unwrap().unwrap();
        assert_eq!((lens.version, lens.record.amount_in_stock()), (1, 2));
    }

    #[test]
    fn order_restocks_exact_amount_in_background() {
        let (plant, seeded) = setup(2, ProductSeed::new("dome").material("lens", 3));
        let id = seeded.material_ids[0];

        let receipt = plant.order(id, 4).unwrap();
        assert_eq!(receipt.task, Registration::Started);

        assert!(wait_until(|| !plant.registry().is_running(TaskKey::Replenishment(id))));
        let material = plant.ledger().material(id).unwrap();
        assert_eq!((material.amount_in_stock(), material.amount_ordered()), (7, 0));
    }

    #[test]
    fn concurrent_orders_run_one_task_and_restock_five() {
        // Long interval: the worker never fires; ticks are driven by hand.
        let (plant, seeded) = setup(3_600_000, ProductSeed::new("dome").material("lens", 0));
        let id = seeded.material_ids[0];
        let plant = Arc::new(plant);

        let handles: Vec<_> = [3, 2]
            .into_iter()
            .map(|amount| {
                let plant = plant.clone();
                thread::spawn(move || plant.order(id, amount).unwrap())
            })
            .collect();
        let receipts: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let started = receipts
            .iter()
            .filter(|r| r.task == Registration::Started)
            .count();
        assert_eq!(started, 1);
        assert_eq!(plant.registry().running_tasks(), vec![TaskKey::Replenishment(id)]);

        let task = plant.replenishment().task_for(id);
        let mut delivered = 0;
        while task.tick() == TickOutcome::Continue {
            delivered += 1;
        }
        assert_eq!(delivered, 5);

        let material = plant.ledger().material(id).unwrap();
        assert_eq!((material.amount_in_stock(), material.amount_ordered()), (5, 0));
        plant.shutdown();
    }

    #[test]
    fn production_completes_and_credits_once() {
        let (plant, seeded) = setup(
            2,
            ProductSeed::new("dome")
                .material("lens", 3)
                .material("housing", 2)
                .stage_work([15, 15, 15]),
        );
        let product_id = seeded.product_id;

        assert_eq!(plant.produce(product_id).unwrap(), ProduceOutcome::Started);
        assert!(wait_until(|| {
            let progress = plant.progress(product_id).unwrap();
            progress.flow == FlowState::Done && !progress.in_flight
        }));

        // Let a few more intervals pass: nothing is credited twice.
        thread::sleep(Duration::from_millis(20));
        assert_eq!(plant.ledger().product(product_id).unwrap().amount_in_stock(), 1);

        let stocks: Vec<i64> = seeded
            .material_ids
            .iter()
            .map(|id| plant.ledger().material(*id).unwrap().amount_in_stock())
            .collect();
        assert_eq!(stocks, vec![1, 0]);

        let progress = plant.progress(product_id).unwrap();
        assert!(progress.stages.iter().all(|s| s.completed == 15 && s.remaining == 0));
    }

    #[test]
    fn insufficient_materials_can_be_ordered_then_produced() {
        let (plant, seeded) = setup(
            2,
            ProductSeed::new("dome")
                .material("lens", 0)
                .material("housing", 2)
                .stage_work([5, 5, 5]),
        );
        let lens = seeded.material_ids[0];

        assert_eq!(
            plant.produce(seeded.product_id).unwrap(),
            ProduceOutcome::InsufficientMaterials
        );

        plant.order(lens, 2).unwrap();
        assert!(wait_until(|| plant.ledger().material(lens).unwrap().amount_in_stock() == 2));

        assert_eq!(plant.produce(seeded.product_id).unwrap(), ProduceOutcome::Started);
        assert!(wait_until(|| {
            plant.ledger()
                .product(seeded.product_id)
                .unwrap()
                .amount_in_stock()
                == 1
        }));
    }

    #[test]
    fn replacement_waits_for_produced_stock() {
        let (plant, seeded) = setup(
            2,
            ProductSeed::new("dome")
                .material("lens", 2)
                .stage_work([5, 5, 5])
                .installation("harbour", InstallationStatus::Damaged),
        );
        let installation = seeded.installation_ids[0];

        let refused = plant.replace_response(installation);
        assert!(!refused.success);
        assert!(!plant.replacement().all_operational().unwrap());

        plant.produce(seeded.product_id).unwrap();
        assert!(wait_until(|| {
            plant.ledger()
                .product(seeded.product_id)
                .unwrap()
                .amount_in_stock()
                == 1
        }));

        let accepted = plant.replace_response(installation);
        assert!(accepted.success);
        assert!(plant.replacement().all_operational().unwrap());
        assert_eq!(plant.ledger().product(seeded.product_id).unwrap().amount_in_stock(), 0);
    }

    #[test]
    fn production_and_replacements_share_the_product_counter() {
        let mut seed = ProductSeed::new("dome").with_stock(3).stage_work([0, 0, 5]);
        for n in 0..6 {
            seed = seed.installation(format!("site-{n}"), InstallationStatus::Damaged);
        }
        let (plant, seeded) = setup(3_600_000, seed);
        let plant = Arc::new(plant);

        // No worker is registered for the product: this driver is the only one.
        assert!(!plant.registry().is_running(TaskKey::Production(seeded.product_id)));
        let run = Arc::new(plant.production().run_for(seeded.product_id));

        let ticker = {
            let run = run.clone();
            thread::spawn(move || run.tick())
        };
        let replacers: Vec<_> = seeded
            .installation_ids
            .iter()
            .copied()
            .map(|id| {
                let plant = plant.clone();
                thread::spawn(move || plant.replace(id))
            })
            .collect();

        assert_eq!(ticker.join().unwrap(), TickOutcome::Finished);
        let results: Vec<_> = replacers.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count() as i64;
        assert!(results
            .iter()
            .all(|r| r.is_ok() || matches!(r, Err(FulfillmentError::OutOfStock(_)))));

        let stock = plant.ledger().product(seeded.product_id).unwrap().amount_in_stock();
        assert_eq!(stock, 3 + 1 - successes);
        assert!(stock >= 0);
        plant.shutdown();
    }
}
