//! Runs a small plant end to end: order materials, produce a camera, and use
//! it to replace a damaged installation.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};

use fabline_infra::{FablineConfig, Fulfillment, ProduceOutcome, ProductSeed, Stores};
use fabline_inventory::InstallationStatus;
use fabline_observability::LogFormat;
use fabline_production::FlowState;

fn main() -> anyhow::Result<()> {
    let format: LogFormat = std::env::var("FABLINE_LOG_FORMAT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_default();
    fabline_observability::tracing::init(format);

    let config = match std::env::var("FABLINE_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {path}"))?;
            FablineConfig::from_json(&raw)
                .with_context(|| format!("invalid config file {path}"))?
        }
        Err(_) => FablineConfig::from_env(),
    };

    let stores = Stores::in_memory();
    let seeded = stores
        .seed(
            &ProductSeed::new("dome camera")
                .material("lens", 0)
                .material("housing", 2)
                .material("sensor", 2)
                .stage_work([15, 10, 5])
                .installation("north gate", InstallationStatus::Damaged)
                .installation("loading dock", InstallationStatus::Operational),
        )
        .context("failed to seed plant")?;

    let plant = Fulfillment::new(stores, &config).context("invalid configuration")?;
    let product_id = seeded.product_id;
    let lens = seeded.material_ids[0];
    let broken = seeded.installation_ids[0];

    let first = plant.replace_response(broken);
    tracing::info!(success = first.success, message = %first.message, "replacement before production");

    match plant.produce(product_id)? {
        ProduceOutcome::InsufficientMaterials => {
            tracing::info!("not enough lenses; ordering more");
            plant.order(lens, 2)?;
        }
        other => bail!("unexpected produce outcome before ordering: {other:?}"),
    }

    let budget = config.replenish_interval() * 4;
    wait_for("lens delivery", budget, || {
        Ok(plant.ledger().material(lens)?.amount_in_stock() >= 2)
    })?;

    let outcome = plant.produce(product_id)?;
    tracing::info!(?outcome, "production requested");

    let budget = config.production_interval() * 12;
    wait_for("production run", budget, || {
        let progress = plant.progress(product_id)?;
        println!("{}", serde_json::to_string(&progress)?);
        Ok(progress.flow == FlowState::Done && !progress.in_flight)
    })?;

    let second = plant.replace_response(broken);
    tracing::info!(success = second.success, message = %second.message, "replacement after production");
    println!("{}", serde_json::to_string(&second)?);

    plant.shutdown();
    Ok(())
}

/// Poll `done` until it reports true or `budget` elapses.
fn wait_for(
    what: &str,
    budget: Duration,
    done: impl Fn() -> anyhow::Result<bool>,
) -> anyhow::Result<()> {
    let deadline = Instant::now() + budget;
    let poll = (budget / 50).max(Duration::from_millis(10));
    while Instant::now() < deadline {
        if done()? {
            return Ok(());
        }
        thread::sleep(poll);
    }
    bail!("timed out waiting for {what}")
}
