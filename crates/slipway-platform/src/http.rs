//! reqwest-backed implementations of the platform interfaces.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use slipway_core::{ArtifactRef, TargetState};

use crate::api::{PlatformApi, RegistryApi, TokenSource, TrafficLayer};
use crate::error::{PlatformError, PlatformResult, RegistryError, RegistryResult};
use crate::types::{ApplyOutcome, ImageArtifact, InstanceEndpoint, InstanceGroup};

/// Deployment platform over HTTP.
pub struct HttpPlatform {
    client: Client,
    endpoint: String,
    token_source: TokenSource,
}

impl HttpPlatform {
    pub fn new(
        endpoint: &str,
        timeout: Duration,
        token_source: TokenSource,
    ) -> PlatformResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::Api(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token_source,
        })
    }

    async fn bearer(&self) -> PlatformResult<String> {
        (self.token_source)()
            .await
            .map_err(|e| PlatformError::Credential(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ApplyWire {
    changed: bool,
}

#[derive(Debug, Deserialize)]
struct InstanceGroupWire {
    desired: u32,
    ready: u32,
    unready: u32,
}

#[async_trait]
impl PlatformApi for HttpPlatform {
    async fn apply(&self, target: &TargetState) -> PlatformResult<ApplyOutcome> {
        let token = self.bearer().await?;
        let url = format!("{}/v1/state", self.endpoint);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(target)
            .send()
            .await
            .map_err(map_platform_send_err)?;

        check_platform_status(response.status())?;
        let wire: ApplyWire = response
            .json()
            .await
            .map_err(|e| PlatformError::Api(e.to_string()))?;

        debug!(
            environment = %target.environment,
            changed = wire.changed,
            hash = %&target.content_hash()[..12],
            "state applied"
        );
        Ok(if wire.changed {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Unchanged
        })
    }

    async fn instance_group(&self, environment: &str) -> PlatformResult<InstanceGroup> {
        let token = self.bearer().await?;
        let url = format!("{}/v1/environments/{environment}/instances", self.endpoint);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(map_platform_send_err)?;

        check_platform_status(response.status())?;
        let wire: InstanceGroupWire = response
            .json()
            .await
            .map_err(|e| PlatformError::Api(e.to_string()))?;

        Ok(InstanceGroup {
            desired_count: wire.desired,
            ready_count: wire.ready,
            unready_count: wire.unready,
            last_observed_at: epoch_secs(),
        })
    }

    async fn instance_endpoints(
        &self,
        environment: &str,
    ) -> PlatformResult<Vec<InstanceEndpoint>> {
        let token = self.bearer().await?;
        let url = format!("{}/v1/environments/{environment}/endpoints", self.endpoint);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(map_platform_send_err)?;

        check_platform_status(response.status())?;
        response
            .json()
            .await
            .map_err(|e| PlatformError::Api(e.to_string()))
    }
}

/// Content-addressed registry over HTTP. Blobs live at
/// `/v1/{repository}/blobs/sha256:{digest}`.
pub struct HttpRegistry {
    client: Client,
    endpoint: String,
    token_source: TokenSource,
}

impl HttpRegistry {
    pub fn new(
        endpoint: &str,
        timeout: Duration,
        token_source: TokenSource,
    ) -> RegistryResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::Api(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token_source,
        })
    }

    async fn bearer(&self) -> RegistryResult<String> {
        (self.token_source)()
            .await
            .map_err(|e| RegistryError::Credential(e.to_string()))
    }

    fn blob_url(&self, repository: &str, digest: &str) -> String {
        format!("{}/v1/{repository}/blobs/sha256:{digest}", self.endpoint)
    }
}

#[async_trait]
impl RegistryApi for HttpRegistry {
    async fn push(&self, artifact: &ImageArtifact) -> RegistryResult<ArtifactRef> {
        // The store is content-addressed: bytes must hash to the digest
        // they are stored under.
        let actual = hex::encode(Sha256::digest(&artifact.bytes));
        if actual != artifact.digest {
            return Err(RegistryError::DigestMismatch {
                expected: artifact.digest.clone(),
                actual,
            });
        }

        let token = self.bearer().await?;
        let url = self.blob_url(&artifact.repository, &artifact.digest);
        let response = self
            .client
            .put(&url)
            .bearer_auth(token)
            .body(artifact.bytes.clone())
            .send()
            .await
            .map_err(map_registry_send_err)?;

        check_registry_status(response.status(), &artifact.digest)?;
        debug!(
            repository = %artifact.repository,
            digest = %&artifact.digest[..12],
            size = artifact.bytes.len(),
            "artifact pushed"
        );
        ArtifactRef::new(&artifact.registry, &artifact.repository, &artifact.digest)
            .map_err(|e| RegistryError::Api(e.to_string()))
    }

    async fn pull(&self, reference: &ArtifactRef) -> RegistryResult<Vec<u8>> {
        let token = self.bearer().await?;
        let url = self.blob_url(&reference.repository, &reference.digest);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(map_registry_send_err)?;

        check_registry_status(response.status(), &reference.digest)?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RegistryError::Api(e.to_string()))?
            .to_vec();

        // Distrust the wire: the reference names exact content.
        let actual = hex::encode(Sha256::digest(&bytes));
        if actual != reference.digest {
            return Err(RegistryError::DigestMismatch {
                expected: reference.digest.clone(),
                actual,
            });
        }
        Ok(bytes)
    }
}

/// Traffic layer over HTTP.
pub struct HttpTrafficLayer {
    client: Client,
    endpoint: String,
    token_source: TokenSource,
}

impl HttpTrafficLayer {
    pub fn new(
        endpoint: &str,
        timeout: Duration,
        token_source: TokenSource,
    ) -> PlatformResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::Api(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token_source,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BackendsWire {
    backends: Vec<String>,
}

#[async_trait]
impl TrafficLayer for HttpTrafficLayer {
    async fn registered_backends(&self, environment: &str) -> PlatformResult<Vec<String>> {
        let token = (self.token_source)()
            .await
            .map_err(|e| PlatformError::Credential(e.to_string()))?;
        let url = format!("{}/v1/environments/{environment}/backends", self.endpoint);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(map_platform_send_err)?;

        check_platform_status(response.status())?;
        let wire: BackendsWire = response
            .json()
            .await
            .map_err(|e| PlatformError::Api(e.to_string()))?;
        Ok(wire.backends)
    }
}

fn map_platform_send_err(e: reqwest::Error) -> PlatformError {
    if e.is_timeout() {
        PlatformError::Transient(format!("timeout: {e}"))
    } else if e.is_connect() {
        PlatformError::Transient(format!("connection failed: {e}"))
    } else {
        PlatformError::Api(e.to_string())
    }
}

fn map_registry_send_err(e: reqwest::Error) -> RegistryError {
    if e.is_timeout() {
        RegistryError::Transient(format!("timeout: {e}"))
    } else if e.is_connect() {
        RegistryError::Transient(format!("connection failed: {e}"))
    } else {
        RegistryError::Api(e.to_string())
    }
}

fn check_platform_status(status: StatusCode) -> PlatformResult<()> {
    if status.is_success() {
        Ok(())
    } else if status.is_server_error() {
        Err(PlatformError::Transient(format!("HTTP {status}")))
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(PlatformError::Credential(format!("HTTP {status}")))
    } else {
        Err(PlatformError::Rejected(format!("HTTP {status}")))
    }
}

fn check_registry_status(status: StatusCode, digest: &str) -> RegistryResult<()> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::NOT_FOUND {
        Err(RegistryError::NotFound(digest.to_string()))
    } else if status.is_server_error() {
        Err(RegistryError::Transient(format!("HTTP {status}")))
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(RegistryError::Credential(format!("HTTP {status}")))
    } else {
        Err(RegistryError::Rejected(format!("HTTP {status}")))
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
