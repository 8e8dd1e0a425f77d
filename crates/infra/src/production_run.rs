//! Production runs: material withdrawal plus the background stage driver.
//!
//! A run advances the lowest-position pending stage by one step per tick,
//! appending a `Positive` progress row each time. The tick that exhausts the
//! last stage credits one finished unit to the product and ends the run.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use fabline_core::{Entity, ProductId, ProductionId};
use fabline_production::{
    FlowState, FlowStep, Production, ProductionFlow, StageSnapshot, StageStatus, State, StateKind,
};

use crate::config::FablineConfig;
use crate::error::FulfillmentError;
use crate::ledger::{StockLedger, compensate, update_with_retry};
use crate::scheduler::{RecurringTask, Registration, TaskKey, TaskRegistry, TickOutcome};
use crate::store::{Record, Stores};

/// Result of a `produce` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProduceOutcome {
    /// Materials were withdrawn and the run was started.
    Started,
    /// Some material holds too few units; nothing changed.
    InsufficientMaterials,
    /// A run for this product is still in flight; nothing changed.
    AlreadyRunning,
}

/// Production tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductionSettings {
    pub interval: Duration,
    pub step: i64,
    pub units_per_material: i64,
    pub max_retries: u32,
}

impl From<&FablineConfig> for ProductionSettings {
    fn from(config: &FablineConfig) -> Self {
        Self {
            interval: config.production_interval(),
            step: config.production_step,
            units_per_material: config.units_per_material,
            max_retries: config.max_conflict_retries,
        }
    }
}

/// Progress of one stage as seen by a polling caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageProgress {
    pub production_id: ProductionId,
    pub name: String,
    pub position: i32,
    pub remaining: i64,
    /// Sum of the stage's `Positive` rows.
    pub completed: i64,
    /// Time of the stage's latest `Positive` row.
    pub last_progress_at: Option<DateTime<Utc>>,
    pub status: StageStatus,
}

/// Snapshot of a product's pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductionProgress {
    pub product_id: ProductId,
    pub stages: Vec<StageProgress>,
    pub flow: FlowState,
    /// Whether a background run is currently registered for the product.
    pub in_flight: bool,
}

/// Load the ordered stages of a product with their `Neutral` counters.
pub(crate) fn load_flow(
    stores: &Stores,
    product_id: ProductId,
) -> Result<ProductionFlow, FulfillmentError> {
    let productions = stores
        .productions
        .find(&|p: &Production| p.product_id() == product_id)?;

    let mut stages = Vec::with_capacity(productions.len());
    for row in &productions {
        let production = &row.record;
        let stage_id = *production.id();
        let neutral = stores
            .states
            .find(&|s: &State| s.production_id() == stage_id && s.is_neutral())?;
        let [counter] = neutral.as_slice() else {
            return Err(FulfillmentError::validation(format!(
                "{} {stage_id} has {} neutral states, exactly one required",
                Production::KIND,
                neutral.len()
            )));
        };
        stages.push(StageSnapshot::from_records(production, &counter.record)?);
    }

    Ok(ProductionFlow::new(product_id, stages)?)
}

/// Starts production runs and reports their progress.
#[derive(Debug, Clone)]
pub struct ProductionService {
    stores: Stores,
    ledger: Arc<StockLedger>,
    registry: Arc<TaskRegistry>,
    settings: ProductionSettings,
}

impl ProductionService {
    pub fn new(
        stores: Stores,
        ledger: Arc<StockLedger>,
        registry: Arc<TaskRegistry>,
        settings: ProductionSettings,
    ) -> Self {
        Self {
            stores,
            ledger,
            registry,
            settings,
        }
    }

    /// Withdraw materials and start a background run for `product_id`.
    ///
    /// Returns as soon as the run is registered; it progresses on its own.
    pub fn produce(&self, product_id: ProductId) -> Result<ProduceOutcome, FulfillmentError> {
        self.ledger.product(product_id)?;
        let key = TaskKey::Production(product_id);
        if self.registry.is_running(key) {
            info!(product_id = %product_id, "production already in flight");
            return Ok(ProduceOutcome::AlreadyRunning);
        }

        // A misconfigured pipeline is rejected before any stock moves.
        load_flow(&self.stores, product_id)?;

        let units = self.settings.units_per_material;
        let Some(withdrawn) = self.ledger.withdraw_for_production(product_id, units)? else {
            info!(product_id = %product_id, units, "insufficient materials, production skipped");
            return Ok(ProduceOutcome::InsufficientMaterials);
        };

        let registered = self.registry.register(
            key,
            self.settings.interval,
            Arc::new(self.run_for(product_id)),
        );
        match registered {
            Ok(Registration::Started) => {
                info!(product_id = %product_id, units, "production started");
                Ok(ProduceOutcome::Started)
            }
            Ok(Registration::AlreadyRunning) => {
                // Lost a race with a concurrent produce for the same product.
                self.ledger.return_for_production(&withdrawn, units);
                Ok(ProduceOutcome::AlreadyRunning)
            }
            Err(err) => {
                self.ledger.return_for_production(&withdrawn, units);
                Err(err)
            }
        }
    }

    /// Stage driver for one product.
    ///
    /// At most one driver may tick a product at a time: a run credits once
    /// only within its own instance, so a second driver on an exhausted flow
    /// would credit again. `produce` registers the single driver under the
    /// product's task key; tests tick a driver by hand only when none is
    /// registered.
    pub(crate) fn run_for(&self, product_id: ProductId) -> ProductionRun {
        ProductionRun {
            product_id,
            stores: self.stores.clone(),
            ledger: self.ledger.clone(),
            step: self.settings.step,
            max_retries: self.settings.max_retries,
            phase: Mutex::new(FlowState::Running),
        }
    }

    pub fn progress(&self, product_id: ProductId) -> Result<ProductionProgress, FulfillmentError> {
        self.ledger.product(product_id)?;
        let flow = load_flow(&self.stores, product_id)?;

        let mut stages = Vec::with_capacity(flow.stages().len());
        for stage in flow.stages() {
            let stage_id = stage.production_id;
            let name = self
                .stores
                .productions
                .get(&stage_id)?
                .map(|row| row.record.name().to_string())
                .unwrap_or_default();
            let entries = self
                .stores
                .states
                .find(&|s: &State| s.production_id() == stage_id && s.kind() == StateKind::Positive)?;
            let completed: i64 = entries.iter().map(|row| row.record.value()).sum();
            let last_progress_at = entries.iter().map(|row| row.record.recorded_at()).max();
            stages.push(StageProgress {
                production_id: stage_id,
                name,
                position: stage.position,
                remaining: stage.remaining,
                completed,
                last_progress_at,
                status: stage.status(),
            });
        }

        Ok(ProductionProgress {
            product_id,
            stages,
            flow: flow.state(),
            in_flight: self.registry.is_running(TaskKey::Production(product_id)),
        })
    }
}

/// Background driver of one production run.
#[derive(Debug)]
pub struct ProductionRun {
    product_id: ProductId,
    stores: Stores,
    ledger: Arc<StockLedger>,
    step: i64,
    max_retries: u32,
    phase: Mutex<FlowState>,
}

impl ProductionRun {
    pub fn phase(&self) -> FlowState {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Perform one step of the run and report whether it is now done.
    fn advance(&self) -> Result<FlowState, FulfillmentError> {
        let mut flow = load_flow(&self.stores, self.product_id)?;

        if let FlowStep::Advance(stage) = flow.next_step() {
            let remaining = self.record_stage_progress(&stage)?;
            flow.record_progress(stage.production_id, remaining)?;
            debug!(
                product_id = %self.product_id,
                stage = stage.position,
                remaining,
                "stage advanced"
            );
            if flow.state() == FlowState::Running {
                return Ok(FlowState::Running);
            }
        }

        let product = self.ledger.credit_product(self.product_id, 1)?;
        info!(
            product_id = %self.product_id,
            amount_in_stock = product.amount_in_stock(),
            "production run complete"
        );
        Ok(FlowState::Done)
    }

    /// Decrement a stage's `Neutral` counter and append its `Positive` entry.
    fn record_stage_progress(&self, stage: &StageSnapshot) -> Result<i64, FulfillmentError> {
        let step = self.step;
        let counter = update_with_retry(
            self.stores.states.as_ref(),
            &stage.neutral_state_id,
            self.max_retries,
            |s| s.advance(step),
        )?;

        let entry = State::positive(stage.production_id, step, Utc::now());
        if let Err(err) = self.stores.states.insert(entry) {
            // Keep counter and log consistent: undo the decrement.
            if let Err(undo) = compensate(
                self.stores.states.as_ref(),
                &stage.neutral_state_id,
                |s| s.rollback_advance(step),
            ) {
                error!(
                    product_id = %self.product_id,
                    stage = stage.position,
                    error = %undo,
                    "failed to undo stage advance; progress log is missing an entry"
                );
            }
            return Err(err.into());
        }

        Ok(counter.value())
    }
}

impl RecurringTask for ProductionRun {
    fn tick(&self) -> TickOutcome {
        // Held for the whole tick: a run is credited at most once.
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase == FlowState::Done {
            return TickOutcome::Finished;
        }

        match self.advance() {
            Ok(FlowState::Running) => TickOutcome::Continue,
            Ok(FlowState::Done) => {
                *phase = FlowState::Done;
                TickOutcome::Finished
            }
            Err(err) => TickOutcome::Failed(err),
        }
    }
}
