//! Stage planning for a production run.
//!
//! Stages are processed strictly in `position` order: stage N+1 is untouched
//! until stage N's remaining work has reached zero or below. Only the
//! lowest-position pending stage advances per tick.

use serde::{Deserialize, Serialize};

use fabline_core::{DomainError, DomainResult, Entity, ProductId, ProductionId, StateId};

use crate::stage::{Production, State};

/// Number of stages every production pipeline has.
pub const STAGE_COUNT: usize = 3;

/// Per-stage status derived from the remaining-work counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Remaining work above zero.
    Pending,
    /// Remaining work at or below zero. Never re-enters `Pending`.
    Complete,
}

/// Overall state of a production run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    /// At least one stage is pending.
    Running,
    /// All stages are complete.
    Done,
}

/// Snapshot of one stage: its descriptor plus its `Neutral` counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub production_id: ProductionId,
    pub position: i32,
    pub neutral_state_id: StateId,
    pub remaining: i64,
}

impl StageSnapshot {
    /// Pair a stage descriptor with its `Neutral` state row.
    pub fn from_records(production: &Production, neutral: &State) -> DomainResult<Self> {
        if !neutral.is_neutral() {
            return Err(DomainError::invariant("stage counter must be a neutral state"));
        }
        if neutral.production_id() != *production.id() {
            return Err(DomainError::invariant("neutral state belongs to another stage"));
        }
        Ok(Self {
            production_id: *production.id(),
            position: production.position(),
            neutral_state_id: *neutral.id(),
            remaining: neutral.value(),
        })
    }

    pub fn status(&self) -> StageStatus {
        if self.remaining > 0 {
            StageStatus::Pending
        } else {
            StageStatus::Complete
        }
    }
}

/// What the next tick of a run must do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStep {
    /// Record progress on this stage.
    Advance(StageSnapshot),
    /// Every stage is complete; credit the product.
    Complete,
}

/// Ordered stages of one product's pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductionFlow {
    product_id: ProductId,
    stages: Vec<StageSnapshot>,
}

impl ProductionFlow {
    /// Build a flow from stage snapshots in any order.
    ///
    /// Requires exactly [`STAGE_COUNT`] stages with distinct positions.
    pub fn new(product_id: ProductId, mut stages: Vec<StageSnapshot>) -> DomainResult<Self> {
        if stages.len() != STAGE_COUNT {
            return Err(DomainError::validation(format!(
                "product {product_id} has {} production stages, {STAGE_COUNT} required",
                stages.len()
            )));
        }
        stages.sort_by_key(|s| s.position);
        if stages.windows(2).any(|w| w[0].position == w[1].position) {
            return Err(DomainError::validation(format!(
                "product {product_id} has duplicate stage positions"
            )));
        }
        Ok(Self { product_id, stages })
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    /// Stages ordered by position.
    pub fn stages(&self) -> &[StageSnapshot] {
        &self.stages
    }

    pub fn state(&self) -> FlowState {
        if self.stages.iter().all(|s| s.status() == StageStatus::Complete) {
            FlowState::Done
        } else {
            FlowState::Running
        }
    }

    /// Replace the remaining work of one stage after it was advanced.
    pub fn record_progress(
        &mut self,
        production_id: ProductionId,
        remaining: i64,
    ) -> DomainResult<()> {
        let stage = self
            .stages
            .iter_mut()
            .find(|s| s.production_id == production_id)
            .ok_or_else(|| DomainError::invariant("stage is not part of this flow"))?;
        if remaining > stage.remaining {
            return Err(DomainError::invariant("stage progress cannot regress"));
        }
        stage.remaining = remaining;
        Ok(())
    }

    /// Lowest-position pending stage, or `Complete` when none remain.
    pub fn next_step(&self) -> FlowStep {
        self.stages
            .iter()
            .find(|s| s.status() == StageStatus::Pending)
            .map(|s| FlowStep::Advance(*s))
            .unwrap_or(FlowStep::Complete)
    }
}
