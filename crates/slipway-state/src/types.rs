//! Domain types persisted by the Slipway state store.
//!
//! Releases and history entries are immutable once written; rollouts
//! mutate until they reach a terminal state and are then retained
//! unchanged for audit.

use serde::{Deserialize, Serialize};

use slipway_core::{ArtifactRef, TargetState};

/// Unique identifier for a rollout attempt.
pub type RolloutId = String;

// ── Release ────────────────────────────────────────────────────────

/// An immutable release: a resolved artifact bound to the source
/// revision it was built from, the environment it targets, and the
/// composed desired state that was current when it was cut.
///
/// Rollback re-applies the stored `target` verbatim, so a release
/// restores exactly what was verified even if configuration changed
/// after it was cut.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Release {
    /// Monotonic sequence, unique across all environments.
    pub sequence: u64,
    pub artifact: ArtifactRef,
    /// Source revision the artifact was built from.
    pub revision: String,
    pub environment: String,
    /// Desired state composed at release creation.
    pub target: TargetState,
    /// Unix timestamp (seconds) when this release was created.
    pub created_at: u64,
}

impl Release {
    pub fn table_key(&self) -> String {
        release_key(self.sequence)
    }
}

/// Zero-padded key so key order is sequence order.
pub fn release_key(sequence: u64) -> String {
    format!("{sequence:020}")
}

// ── Rollout ────────────────────────────────────────────────────────

/// Where a rollout currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutState {
    /// Accepted, not yet applying.
    Pending,
    /// Pushing the target state to the platform and waiting for the
    /// instance group to converge.
    Applying,
    /// Converged; holding for sustained health before declaring victory.
    Verifying,
    /// Restoring the last successful state.
    RollingBack,
    /// New release is live and verified.
    Succeeded,
    /// New release failed; the prior state was restored and verified.
    RolledBack,
    /// Neither the new release nor a restore could be verified.
    /// Operator attention required.
    Failed,
}

impl RolloutState {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RolloutState::Succeeded | RolloutState::RolledBack | RolloutState::Failed
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            RolloutState::Pending => "pending",
            RolloutState::Applying => "applying",
            RolloutState::Verifying => "verifying",
            RolloutState::RollingBack => "rolling_back",
            RolloutState::Succeeded => "succeeded",
            RolloutState::RolledBack => "rolled_back",
            RolloutState::Failed => "failed",
        }
    }
}

/// One attempt to drive an environment to a release.
///
/// At most one non-terminal rollout exists per environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rollout {
    pub rollout_id: RolloutId,
    /// Sequence of the release being rolled out.
    pub release_seq: u64,
    pub environment: String,
    pub state: RolloutState,
    /// Apply attempts consumed so far (including retries).
    pub attempt_count: u32,
    /// Unix timestamp (seconds) when the rollout was accepted.
    pub started_at: u64,
    /// Unix timestamp (seconds) of the most recent state transition.
    pub last_transition_at: u64,
    /// Populated on RollingBack, RolledBack, and Failed.
    pub failure_reason: Option<String>,
}

impl Rollout {
    pub fn table_key(&self) -> String {
        self.rollout_id.clone()
    }
}

// ── History ────────────────────────────────────────────────────────

/// Final outcome of a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    RolledBack,
    Failed,
}

/// Append-only record of a finished rollout. The most recent
/// `Succeeded` entry per environment anchors rollback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    /// Monotonic sequence, unique across all environments.
    pub sequence: u64,
    pub rollout_id: RolloutId,
    pub release_seq: u64,
    pub environment: String,
    pub outcome: Outcome,
    /// Unix timestamp (seconds) when the rollout finished.
    pub completed_at: u64,
}

impl HistoryEntry {
    pub fn table_key(&self) -> String {
        format!("{:020}", self.sequence)
    }
}
