//! Credential brokerage for slipway's outbound calls.
//!
//! Every call to the platform, registry, or traffic layer carries a
//! short-lived scoped credential minted by exchanging the orchestrator's
//! ambient identity assertion. Credentials live only in process memory:
//! nothing here is ever written to durable storage, and token values are
//! redacted from `Debug` output.

pub mod broker;
pub mod error;
pub mod exchange;

pub use broker::CredentialBroker;
pub use error::{ExchangeError, ExchangeResult};
pub use exchange::{
    CredentialScope, FakeExchange, HttpIdentityExchange, IdentityExchange, ScopedCredential,
};
