//! Chip families and their capability descriptors
//!
//! This module models what a hardware family *is*: fixed identifiers,
//! register addresses, and pure capability queries. Talking to a live
//! chip is the session layer's job.

mod features;
mod registry;
mod types;

pub use features::ChipFeatures;
pub use registry::*;
pub use types::*;
