//! Error types for identity exchange and credential brokerage.

use thiserror::Error;

/// Failures minting a scoped credential.
///
/// `Authentication` and `Authorization` are terminal for the operation
/// that needed the credential; retrying wins nothing until the identity
/// configuration changes.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// The exchange endpoint rejected the identity assertion itself:
    /// untrusted issuer, audience mismatch, or expired assertion.
    #[error("authentication rejected: {0}")]
    Authentication(String),

    /// The identity is valid but lacks the requested scope.
    #[error("authorization rejected: {0}")]
    Authorization(String),

    /// The ambient identity assertion could not be read.
    #[error("identity assertion unreadable: {0}")]
    Assertion(String),

    /// Timeout, connection failure, or 5xx from the exchange endpoint.
    #[error("transient exchange failure: {0}")]
    Transient(String),

    /// Protocol or serialization failure.
    #[error("exchange api error: {0}")]
    Api(String),
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;
