//! The rollout controller: slipway's release state machine.
//!
//! A rollout moves `Pending → Applying → Verifying → Succeeded`, detouring
//! through `RollingBack` when anything goes wrong past the point of no
//! return. Every transition is persisted, every loop is bounded, and a
//! rollout always lands on a terminal state with its failure reason on
//! the record.

pub mod config;
pub mod controller;
pub mod error;

pub use config::ControllerConfig;
pub use controller::RolloutController;
pub use error::{RolloutError, RolloutResult};
