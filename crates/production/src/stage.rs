use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fabline_core::{DomainError, DomainResult, Entity, ProductId, ProductionId, StateId};

/// One stage of a product's production pipeline.
///
/// Seeded externally and read-only while a flow runs; `position` orders the
/// stages of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Production {
    id: ProductionId,
    product_id: ProductId,
    name: String,
    position: i32,
}

impl Production {
    pub fn new(
        id: ProductionId,
        product_id: ProductId,
        name: impl Into<String>,
        position: i32,
    ) -> Self {
        Self {
            id,
            product_id,
            name: name.into(),
            position,
        }
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> i32 {
        self.position
    }
}

impl Entity for Production {
    type Id = ProductionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Kind of a state row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum StateKind {
    /// Remaining-work counter of a stage (exactly one per stage, mutable).
    Neutral,
    /// Append-only record of completed progress.
    Positive,
}

/// A state row attached to a production stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    id: StateId,
    production_id: ProductionId,
    kind: StateKind,
    value: i64,
    recorded_at: DateTime<Utc>,
}

impl State {
    /// Remaining-work counter for a stage.
    pub fn neutral(production_id: ProductionId, value: i64, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id: StateId::new(),
            production_id,
            kind: StateKind::Neutral,
            value,
            recorded_at,
        }
    }

    /// Progress entry recording `value` completed units of a stage.
    pub fn positive(production_id: ProductionId, value: i64, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id: StateId::new(),
            production_id,
            kind: StateKind::Positive,
            value,
            recorded_at,
        }
    }

    pub fn production_id(&self) -> ProductionId {
        self.production_id
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub fn is_neutral(&self) -> bool {
        self.kind == StateKind::Neutral
    }

    /// Deduct `step` units of remaining work from a pending `Neutral` row.
    ///
    /// The value may overshoot below zero; a stage at or below zero is complete
    /// and can no longer be advanced.
    pub fn advance(&mut self, step: i64) -> DomainResult<()> {
        self.ensure_neutral()?;
        if step <= 0 {
            return Err(DomainError::validation("production step must be positive"));
        }
        if self.value <= 0 {
            return Err(DomainError::conflict(format!(
                "stage {} is already complete",
                self.production_id
            )));
        }
        self.value -= step;
        Ok(())
    }

    /// Undo an `advance` whose progress entry could not be recorded.
    pub fn rollback_advance(&mut self, step: i64) -> DomainResult<()> {
        self.ensure_neutral()?;
        self.value += step;
        Ok(())
    }

    fn ensure_neutral(&self) -> DomainResult<()> {
        if self.kind != StateKind::Neutral {
            return Err(DomainError::invariant("positive state rows are append-only"));
        }
        Ok(())
    }
}

impl Entity for State {
    type Id = StateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
