//! redb table definitions for the Slipway state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized
//! domain types). Sequence-keyed tables zero-pad to 20 digits so
//! lexicographic key order matches numeric order.

use redb::TableDefinition;

/// Release records keyed by `{sequence:020}`.
pub const RELEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("releases");

/// Rollout records keyed by `{rollout_id}`.
pub const ROLLOUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollouts");

/// Append-only outcome history keyed by `{sequence:020}`.
pub const HISTORY: TableDefinition<&str, &[u8]> = TableDefinition::new("history");

/// Monotonic counters keyed by counter name.
pub const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
