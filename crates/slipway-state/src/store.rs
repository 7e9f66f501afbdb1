//! StateStore: redb-backed persistence for Slipway.
//!
//! Provides typed operations over releases, rollouts, and the outcome
//! history. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends
//! (the latter for testing).
//!
//! Releases and history are append-only. Rollouts are updated in place
//! until terminal, then left untouched.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

const RELEASE_SEQ: &str = "release_seq";
const HISTORY_SEQ: &str = "history_seq";

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(RELEASES).map_err(map_err!(Table))?;
        txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        txn.open_table(HISTORY).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Releases ───────────────────────────────────────────────────

    /// Allocate the next release sequence number.
    ///
    /// The bump commits in its own transaction, so concurrent callers
    /// each observe a distinct value.
    pub fn next_release_sequence(&self) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let next;
        {
            let mut table = txn.open_table(META).map_err(map_err!(Table))?;
            let current = match table.get(RELEASE_SEQ).map_err(map_err!(Read))? {
                Some(guard) => serde_json::from_slice::<u64>(guard.value())
                    .map_err(map_err!(Deserialize))?,
                None => 0,
            };
            next = current + 1;
            let value = serde_json::to_vec(&next).map_err(map_err!(Serialize))?;
            table
                .insert(RELEASE_SEQ, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(next)
    }

    /// Persist a release. Releases are immutable; callers only insert
    /// records whose sequence came from `next_release_sequence`.
    pub fn put_release(&self, release: &Release) -> StateResult<()> {
        let key = release.table_key();
        let value = serde_json::to_vec(release).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RELEASES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, revision = %release.revision, "release stored");
        Ok(())
    }

    /// Get a release by sequence number.
    pub fn get_release(&self, sequence: u64) -> StateResult<Option<Release>> {
        let key = release_key(sequence);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RELEASES).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let release: Release =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(release))
            }
            None => Ok(None),
        }
    }

    /// List all releases in sequence order.
    pub fn list_releases(&self) -> StateResult<Vec<Release>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RELEASES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let release: Release =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(release);
        }
        Ok(results)
    }

    /// The most recently created release, if any.
    pub fn latest_release(&self) -> StateResult<Option<Release>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RELEASES).map_err(map_err!(Table))?;
        // Keys are zero-padded, so the last key is the newest release.
        match table.iter().map_err(map_err!(Read))?.next_back() {
            Some(entry) => {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let release: Release =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(release))
            }
            None => Ok(None),
        }
    }

    // ── Rollouts ───────────────────────────────────────────────────

    /// Insert or update a rollout record.
    pub fn put_rollout(&self, rollout: &Rollout) -> StateResult<()> {
        let key = rollout.table_key();
        let value = serde_json::to_vec(rollout).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(rollout_id = %key, state = rollout.state.label(), "rollout stored");
        Ok(())
    }

    /// Get a rollout by id.
    pub fn get_rollout(&self, rollout_id: &str) -> StateResult<Option<Rollout>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        match table.get(rollout_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let rollout: Rollout =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(rollout))
            }
            None => Ok(None),
        }
    }

    /// List all rollouts.
    pub fn list_rollouts(&self) -> StateResult<Vec<Rollout>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let rollout: Rollout =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(rollout);
        }
        Ok(results)
    }

    /// The non-terminal rollout for an environment, if one exists.
    pub fn active_rollout(&self, environment: &str) -> StateResult<Option<Rollout>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let rollout: Rollout =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if rollout.environment == environment && !rollout.state.is_terminal() {
                return Ok(Some(rollout));
            }
        }
        Ok(None)
    }

    // ── History ────────────────────────────────────────────────────

    /// Record the final outcome of a rollout.
    ///
    /// Idempotent on rollout id: if an entry for this rollout already
    /// exists nothing is written and `false` is returned, so callers
    /// may safely retry after a crash.
    pub fn append_outcome(
        &self,
        rollout: &Rollout,
        outcome: Outcome,
        completed_at: u64,
    ) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let appended;
        {
            let mut history = txn.open_table(HISTORY).map_err(map_err!(Table))?;
            let mut duplicate = false;
            for entry in history.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let existing: HistoryEntry =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if existing.rollout_id == rollout.rollout_id {
                    duplicate = true;
                    break;
                }
            }
            if duplicate {
                appended = false;
            } else {
                // Bump the history counter in the same transaction as
                // the insert so the sequence can never skip or repeat.
                let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
                let current = match meta.get(HISTORY_SEQ).map_err(map_err!(Read))? {
                    Some(guard) => serde_json::from_slice::<u64>(guard.value())
                        .map_err(map_err!(Deserialize))?,
                    None => 0,
                };
                let sequence = current + 1;
                let counter = serde_json::to_vec(&sequence).map_err(map_err!(Serialize))?;
                meta.insert(HISTORY_SEQ, counter.as_slice())
                    .map_err(map_err!(Write))?;

                let entry = HistoryEntry {
                    sequence,
                    rollout_id: rollout.rollout_id.clone(),
                    release_seq: rollout.release_seq,
                    environment: rollout.environment.clone(),
                    outcome,
                    completed_at,
                };
                let value = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;
                history
                    .insert(entry.table_key().as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                appended = true;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if appended {
            debug!(
                rollout_id = %rollout.rollout_id,
                outcome = ?outcome,
                "outcome recorded"
            );
        }
        Ok(appended)
    }

    /// List all history entries in completion order.
    pub fn list_history(&self) -> StateResult<Vec<HistoryEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let e: HistoryEntry =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(e);
        }
        Ok(results)
    }

    /// History entries for one environment, in completion order.
    pub fn list_history_for_environment(
        &self,
        environment: &str,
    ) -> StateResult<Vec<HistoryEntry>> {
        Ok(self
            .list_history()?
            .into_iter()
            .filter(|e| e.environment == environment)
            .collect())
    }

    /// The most recent successful outcome for an environment. This is
    /// the rollback anchor; `None` means no safe prior state exists.
    pub fn last_successful(&self, environment: &str) -> StateResult<Option<HistoryEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
        let mut last = None;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let e: HistoryEntry =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if e.environment == environment && e.outcome == Outcome::Succeeded {
                last = Some(e);
            }
        }
        Ok(last)
    }
}
