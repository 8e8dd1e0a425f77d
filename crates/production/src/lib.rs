//! Production domain module.
//!
//! A product is built through a fixed, ordered sequence of production stages.
//! Each stage owns exactly one `Neutral` state row holding its remaining work;
//! completed work is appended as `Positive` rows. This crate models those
//! records and decides, purely from a snapshot, which stage advances next.

pub mod flow;
pub mod stage;

pub use flow::{FlowState, FlowStep, ProductionFlow, StageSnapshot, StageStatus, STAGE_COUNT};
pub use stage::{Production, State, StateKind};
