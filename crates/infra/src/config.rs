//! Configuration loading and representation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::FulfillmentError;

pub const ENV_REPLENISH_INTERVAL_MS: &str = "FABLINE_REPLENISH_INTERVAL_MS";
pub const ENV_PRODUCTION_INTERVAL_MS: &str = "FABLINE_PRODUCTION_INTERVAL_MS";
pub const ENV_MAX_CONFLICT_RETRIES: &str = "FABLINE_MAX_CONFLICT_RETRIES";
pub const ENV_STALL_THRESHOLD: &str = "FABLINE_STALL_THRESHOLD";

/// Runtime settings of the fulfillment services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FablineConfig {
    /// Period of a material's replenishment task.
    pub replenish_interval_ms: u64,
    /// Period of a product's production task.
    pub production_interval_ms: u64,
    /// Immediate retries of a compare-and-update that lost a version race.
    pub max_conflict_retries: u32,
    /// Consecutive failed ticks after which a task is reported as stalled.
    pub stall_threshold: u32,
    /// Units of work one production tick completes on a stage.
    pub production_step: i64,
    /// Units withdrawn from each material when a production run starts.
    pub units_per_material: i64,
}

impl Default for FablineConfig {
    fn default() -> Self {
        Self {
            replenish_interval_ms: 15_000,
            production_interval_ms: 10_000,
            max_conflict_retries: 8,
            stall_threshold: 30,
            production_step: 5,
            units_per_material: 2,
        }
    }
}

impl FablineConfig {
    /// Defaults overridden by `FABLINE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `FABLINE_*` keys.
    ///
    /// Unparsable or out-of-range values are logged and ignored, so the result
    /// always passes [`FablineConfig::validate`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let positive = |v: &u64| *v > 0;
        override_from(
            &lookup,
            ENV_REPLENISH_INTERVAL_MS,
            &mut config.replenish_interval_ms,
            positive,
        );
        override_from(
            &lookup,
            ENV_PRODUCTION_INTERVAL_MS,
            &mut config.production_interval_ms,
            positive,
        );
        override_from(
            &lookup,
            ENV_MAX_CONFLICT_RETRIES,
            &mut config.max_conflict_retries,
            |_| true,
        );
        override_from(
            &lookup,
            ENV_STALL_THRESHOLD,
            &mut config.stall_threshold,
            |v: &u32| *v > 0,
        );
        config
    }

    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(raw: &str) -> Result<Self, FulfillmentError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| FulfillmentError::validation(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings under which the services cannot make progress.
    ///
    /// A zero interval would spin a worker; a non-positive step or unit count
    /// would withdraw materials for a run that can never complete.
    pub fn validate(&self) -> Result<(), FulfillmentError> {
        let checks = [
            ("replenish_interval_ms", self.replenish_interval_ms > 0),
            ("production_interval_ms", self.production_interval_ms > 0),
            ("stall_threshold", self.stall_threshold > 0),
            ("production_step", self.production_step > 0),
            ("units_per_material", self.units_per_material > 0),
        ];
        match checks.iter().find(|(_, ok)| !ok) {
            Some((field, _)) => Err(FulfillmentError::validation(format!(
                "configuration field {field} must be positive"
            ))),
            None => Ok(()),
        }
    }

    pub fn replenish_interval(&self) -> Duration {
        Duration::from_millis(self.replenish_interval_ms)
    }

    pub fn production_interval(&self) -> Duration {
        Duration::from_millis(self.production_interval_ms)
    }
}

fn override_from<T: core::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
    in_range: impl Fn(&T) -> bool,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if in_range(&value) => *slot = value,
        Ok(_) => warn!(key, value = %raw, "ignoring out-of-range configuration value"),
        Err(_) => warn!(key, value = %raw, "ignoring unparsable configuration value"),
    }
}
