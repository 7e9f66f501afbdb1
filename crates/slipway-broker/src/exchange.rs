//! Identity-token exchange: ambient assertion in, scoped credential out.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{ExchangeError, ExchangeResult};

/// What a minted credential is allowed to do. Each scope is exchanged
/// and cached independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialScope {
    RegistryPull,
    RegistryPush,
    Platform,
}

impl CredentialScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialScope::RegistryPull => "registry:pull",
            CredentialScope::RegistryPush => "registry:push",
            CredentialScope::Platform => "platform:apply",
        }
    }
}

impl fmt::Display for CredentialScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A short-lived bearer credential bound to one scope.
///
/// Deliberately not serializable, and `Debug` redacts the token value:
/// credentials exist in process memory only and never reach logs or
/// durable storage.
#[derive(Clone)]
pub struct ScopedCredential {
    pub token: String,
    pub scope: CredentialScope,
    /// Unix-epoch seconds after which the credential is unusable.
    pub expires_at: u64,
}

impl ScopedCredential {
    /// Expired, or close enough to expiry that it should not be handed
    /// out for a new operation. `skew` is the renewal margin.
    pub fn is_expired(&self, now: u64, skew: u64) -> bool {
        now + skew >= self.expires_at
    }
}

impl fmt::Debug for ScopedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedCredential")
            .field("token", &"<redacted>")
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Exchanges an identity assertion for a scoped credential.
#[async_trait]
pub trait IdentityExchange: Send + Sync {
    async fn exchange(
        &self,
        assertion: &str,
        scope: CredentialScope,
    ) -> ExchangeResult<ScopedCredential>;
}

#[derive(Serialize)]
struct ExchangeRequest<'a> {
    assertion: &'a str,
    audience: &'a str,
    scope: &'a str,
}

#[derive(Deserialize)]
struct ExchangeResponse {
    token: String,
    expires_in: u64,
}

/// Exchange client for an OIDC-style token endpoint.
pub struct HttpIdentityExchange {
    client: reqwest::Client,
    endpoint: String,
    audience: String,
}

impl HttpIdentityExchange {
    pub fn new(endpoint: &str, audience: &str, timeout: Duration) -> ExchangeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExchangeError::Api(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            audience: audience.to_string(),
        })
    }
}

#[async_trait]
impl IdentityExchange for HttpIdentityExchange {
    async fn exchange(
        &self,
        assertion: &str,
        scope: CredentialScope,
    ) -> ExchangeResult<ScopedCredential> {
        let request = ExchangeRequest {
            assertion,
            audience: &self.audience,
            scope: scope.as_str(),
        };
        let response = self
            .client
            .post(format!("{}/v1/token", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ExchangeError::Transient(e.to_string())
                } else {
                    ExchangeError::Api(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 => ExchangeError::Authentication(detail),
                403 => ExchangeError::Authorization(detail),
                s if s >= 500 => ExchangeError::Transient(format!("exchange returned {status}")),
                _ => ExchangeError::Api(format!("exchange returned {status}: {detail}")),
            });
        }

        let body: ExchangeResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::Api(e.to_string()))?;
        Ok(ScopedCredential {
            token: body.token,
            scope,
            expires_at: epoch_secs() + body.expires_in,
        })
    }
}

#[derive(Default)]
struct FakeExchangeState {
    minted: u32,
    reject: Option<ExchangeError>,
    last_assertion: Option<String>,
}

/// Scriptable exchange for tests and the daemon's local mode. Mints
/// deterministic tokens and counts how many were issued.
pub struct FakeExchange {
    ttl_secs: u64,
    state: Mutex<FakeExchangeState>,
}

impl FakeExchange {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl_secs,
            state: Mutex::new(FakeExchangeState::default()),
        }
    }

    /// Number of credentials minted so far.
    pub async fn minted(&self) -> u32 {
        self.state.lock().await.minted
    }

    /// Reject every subsequent exchange with this error.
    pub async fn reject_with(&self, err: ExchangeError) {
        self.state.lock().await.reject = Some(err);
    }

    pub async fn clear_rejection(&self) {
        self.state.lock().await.reject = None;
    }

    /// The assertion presented on the most recent exchange.
    pub async fn last_assertion(&self) -> Option<String> {
        self.state.lock().await.last_assertion.clone()
    }
}

#[async_trait]
impl IdentityExchange for FakeExchange {
    async fn exchange(
        &self,
        assertion: &str,
        scope: CredentialScope,
    ) -> ExchangeResult<ScopedCredential> {
        let mut state = self.state.lock().await;
        if let Some(err) = &state.reject {
            return Err(err.clone());
        }
        state.minted += 1;
        state.last_assertion = Some(assertion.to_string());
        Ok(ScopedCredential {
            token: format!("token-{}-{}", scope, state.minted),
            scope,
            expires_at: epoch_secs() + self.ttl_secs,
        })
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
