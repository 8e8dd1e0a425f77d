//! Inventory domain module.
//!
//! This crate contains the stock-carrying records of the plant (materials,
//! finished product cameras, field installations) and the rules that guard
//! their counters. Everything here is deterministic domain logic (no IO, no
//! storage, no clocks).

pub mod installation;
pub mod material;
pub mod product;

pub use installation::{Installation, InstallationStatus};
pub use material::Material;
pub use product::ProductCamera;
