//! Error types for platform, registry, and traffic-layer clients.

use thiserror::Error;

pub type PlatformResult<T> = Result<T, PlatformError>;
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors from the deployment platform or traffic layer.
///
/// `Transient` is the only retryable variant. Everything else is
/// terminal for the operation that hit it.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Timeout, connection failure, or 5xx. Safe to retry.
    #[error("transient platform error: {0}")]
    Transient(String),

    /// The platform rejected the request (4xx).
    #[error("platform rejected request: {0}")]
    Rejected(String),

    /// No usable credential for the request.
    #[error("credential error: {0}")]
    Credential(String),

    /// Malformed response or client-side failure.
    #[error("platform api error: {0}")]
    Api(String),
}

impl PlatformError {
    /// Whether a retry of the same request could reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Transient(_))
    }
}

/// Errors from the image registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Timeout, connection failure, or 5xx. Safe to retry.
    #[error("transient registry error: {0}")]
    Transient(String),

    /// The registry rejected the request (4xx).
    #[error("registry rejected request: {0}")]
    Rejected(String),

    /// Stored or supplied bytes do not match the claimed digest.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// No blob for the requested reference.
    #[error("artifact not found: {0}")]
    NotFound(String),

    /// No usable credential for the request.
    #[error("credential error: {0}")]
    Credential(String),

    /// Malformed response or client-side failure.
    #[error("registry api error: {0}")]
    Api(String),
}
