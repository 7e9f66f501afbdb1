use thiserror::Error;

/// Resolution failures. All of these are fatal for the release that
/// triggered them; nothing in this crate retries.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid revision identifier: {0}")]
    InvalidRevision(String),

    /// The revision's source tree is missing, empty, or unreadable.
    #[error("source tree unreadable: {0}")]
    SourceUnreadable(String),

    /// The same revision identifier was presented with a different tree.
    #[error("revision {revision} already resolved to tree {prior_digest}, got {digest}")]
    RevisionConflict {
        revision: String,
        prior_digest: String,
        digest: String,
    },

    #[error("registry push failed: {0}")]
    Registry(String),
}

pub type ResolveResult<T> = Result<T, ResolveError>;
