//! The credential broker: per-scope cache over an identity exchange.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;
use tracing::debug;

use slipway_platform::TokenSource;

use crate::error::{ExchangeError, ExchangeResult};
use crate::exchange::{CredentialScope, IdentityExchange, ScopedCredential};

/// Mints and caches scoped credentials.
///
/// The ambient identity assertion is re-read from disk on every
/// exchange, so assertion rotation by the host environment is picked up
/// without a restart. Minted credentials are cached per scope and
/// reused until they fall inside the renewal margin.
pub struct CredentialBroker {
    exchange: Arc<dyn IdentityExchange>,
    assertion_path: PathBuf,
    refresh_skew_secs: u64,
    cache: RwLock<HashMap<CredentialScope, ScopedCredential>>,
}

impl CredentialBroker {
    pub fn new(
        exchange: Arc<dyn IdentityExchange>,
        assertion_path: impl Into<PathBuf>,
        refresh_skew_secs: u64,
    ) -> Self {
        Self {
            exchange,
            assertion_path: assertion_path.into(),
            refresh_skew_secs,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// A live credential for the scope: cached if still outside the
    /// renewal margin, freshly exchanged otherwise.
    pub async fn credential_for(&self, scope: CredentialScope) -> ExchangeResult<ScopedCredential> {
        let now = epoch_secs();
        {
            let cache = self.cache.read().await;
            if let Some(cred) = cache.get(&scope) {
                if !cred.is_expired(now, self.refresh_skew_secs) {
                    return Ok(cred.clone());
                }
            }
        }

        // Hold the write lock across the exchange so concurrent callers
        // of the same scope do not double-mint.
        let mut cache = self.cache.write().await;
        if let Some(cred) = cache.get(&scope) {
            if !cred.is_expired(now, self.refresh_skew_secs) {
                return Ok(cred.clone());
            }
        }

        let assertion = tokio::fs::read_to_string(&self.assertion_path)
            .await
            .map_err(|e| {
                ExchangeError::Assertion(format!("{}: {e}", self.assertion_path.display()))
            })?;
        let cred = self.exchange.exchange(assertion.trim(), scope).await?;
        debug!(scope = %scope, expires_at = cred.expires_at, "minted scoped credential");
        cache.insert(scope, cred.clone());
        Ok(cred)
    }

    /// Bearer token for the scope. Convenience over `credential_for`.
    pub async fn token(&self, scope: CredentialScope) -> ExchangeResult<String> {
        Ok(self.credential_for(scope).await?.token)
    }

    /// Adapter handed to the HTTP platform clients, which pull a fresh
    /// token per request without knowing about scopes or caching.
    pub fn token_source(self: &Arc<Self>, scope: CredentialScope) -> TokenSource {
        let broker = Arc::clone(self);
        Arc::new(move || {
            let broker = broker.clone();
            Box::pin(async move { broker.token(scope).await.map_err(anyhow::Error::from) })
        })
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::FakeExchange;
    use std::io::Write;

    fn assertion_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    fn broker_over(
        exchange: Arc<FakeExchange>,
        file: &tempfile::NamedTempFile,
        skew: u64,
    ) -> CredentialBroker {
        CredentialBroker::new(exchange, file.path(), skew)
    }

    #[tokio::test]
    async fn cached_credential_reused_until_margin() {
        let exchange = Arc::new(FakeExchange::new(3600));
        let file = assertion_file("assertion");
        let broker = broker_over(exchange.clone(), &file, 30);

        let first = broker.token(CredentialScope::Platform).await.unwrap();
        let second = broker.token(CredentialScope::Platform).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(exchange.minted().await, 1);
    }

    #[tokio::test]
    async fn credential_inside_margin_is_refreshed() {
        // ttl 5s with a 30s margin: every call falls inside the margin.
        let exchange = Arc::new(FakeExchange::new(5));
        let file = assertion_file("assertion");
        let broker = broker_over(exchange.clone(), &file, 30);

        let first = broker.token(CredentialScope::Platform).await.unwrap();
        let second = broker.token(CredentialScope::Platform).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(exchange.minted().await, 2);
    }

    #[tokio::test]
    async fn scopes_are_cached_independently() {
        let exchange = Arc::new(FakeExchange::new(3600));
        let file = assertion_file("assertion");
        let broker = broker_over(exchange.clone(), &file, 30);

        broker.token(CredentialScope::RegistryPull).await.unwrap();
        broker.token(CredentialScope::RegistryPush).await.unwrap();
        assert_eq!(exchange.minted().await, 2);

        // Second round hits both caches.
        broker.token(CredentialScope::RegistryPull).await.unwrap();
        broker.token(CredentialScope::RegistryPush).await.unwrap();
        assert_eq!(exchange.minted().await, 2);
    }

    #[tokio::test]
    async fn rejections_pass_through_unwrapped() {
        let exchange = Arc::new(FakeExchange::new(3600));
        exchange
            .reject_with(ExchangeError::Authentication("untrusted issuer".to_string()))
            .await;
        let file = assertion_file("assertion");
        let broker = broker_over(exchange.clone(), &file, 30);

        let err = broker.token(CredentialScope::Platform).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Authentication(_)));
    }

    #[tokio::test]
    async fn missing_assertion_file_is_an_assertion_error() {
        let exchange = Arc::new(FakeExchange::new(3600));
        let broker = CredentialBroker::new(exchange, "/nonexistent/assertion.jwt", 30);

        let err = broker.token(CredentialScope::Platform).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Assertion(_)));
    }

    #[tokio::test]
    async fn rotated_assertion_is_used_on_refresh() {
        // ttl 5s inside a 30s margin forces an exchange per call.
        let exchange = Arc::new(FakeExchange::new(5));
        let file = assertion_file("assertion-v1");
        let broker = broker_over(exchange.clone(), &file, 30);

        broker.token(CredentialScope::Platform).await.unwrap();
        assert_eq!(exchange.last_assertion().await.as_deref(), Some("assertion-v1"));

        std::fs::write(file.path(), "assertion-v2").unwrap();
        broker.token(CredentialScope::Platform).await.unwrap();
        assert_eq!(exchange.last_assertion().await.as_deref(), Some("assertion-v2"));
    }

    #[tokio::test]
    async fn token_source_adapts_to_platform_clients() {
        let exchange = Arc::new(FakeExchange::new(3600));
        let file = assertion_file("assertion");
        let broker = Arc::new(broker_over(exchange, &file, 30));

        let source = broker.token_source(CredentialScope::RegistryPull);
        let token = source().await.unwrap();
        assert!(token.starts_with("token-registry:pull-"));
    }
}
