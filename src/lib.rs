//! Synthetic market generation, per-asset risk statistics and goal timeline
//! projection.

pub mod api;
pub mod core;
pub mod error;

pub use error::{Error, Result};
