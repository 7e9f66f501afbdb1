//! slipway-state: embedded release and rollout store.
//!
//! Backed by [redb](https://docs.rs/redb), holds the durable record of
//! every release, every rollout attempt, and the append-only outcome
//! history that rollback anchoring is derived from.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value
//! columns. Releases and history entries use zero-padded sequence keys
//! (`{seq:020}`) so plain key order is chronological order; rollouts are
//! keyed by their id. Monotonic counters live in a meta table: release
//! sequences are allocated up front in their own transaction, while the
//! history counter is bumped inside the same write transaction as the
//! entry it numbers.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
