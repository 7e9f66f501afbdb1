use thiserror::Error;

use slipway_state::StateError;

#[derive(Debug, Error)]
pub enum RolloutError {
    /// The environment already has a non-terminal rollout. Releases are
    /// never queued; the caller retries once the active rollout lands.
    #[error("environment {environment} is held by active rollout {rollout_id}")]
    Conflict {
        environment: String,
        rollout_id: String,
    },

    #[error("release {0} not found")]
    ReleaseNotFound(u64),

    #[error("rollout {0} not found")]
    RolloutNotFound(String),

    #[error("release {sequence} targets environment {environment}")]
    WrongEnvironment { sequence: u64, environment: String },

    #[error("state store error: {0}")]
    Store(#[from] StateError),
}

pub type RolloutResult<T> = Result<T, RolloutError>;
