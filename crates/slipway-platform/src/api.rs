//! Traits for the consumed external interfaces.

use async_trait::async_trait;

use slipway_core::{ArtifactRef, TargetState};

use crate::error::{PlatformResult, RegistryResult};
use crate::types::{ApplyOutcome, ImageArtifact, InstanceEndpoint, InstanceGroup};

/// Supplies a fresh bearer token for each outbound request.
///
/// Clients call this per request instead of holding a credential, so
/// expiry and renewal stay the broker's problem.
pub type TokenSource = std::sync::Arc<dyn Fn() -> BoxTokenFuture + Send + Sync>;

pub type BoxTokenFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<String>> + Send>>;

/// The deployment platform: declarative state in, observations out.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Submit a complete desired state. Idempotent: re-applying a
    /// document the platform already holds reports `Unchanged` and
    /// disturbs nothing.
    async fn apply(&self, target: &TargetState) -> PlatformResult<ApplyOutcome>;

    /// Snapshot the instance group for an environment.
    async fn instance_group(&self, environment: &str) -> PlatformResult<InstanceGroup>;

    /// List the addressable instances for an environment.
    async fn instance_endpoints(
        &self,
        environment: &str,
    ) -> PlatformResult<Vec<InstanceEndpoint>>;
}

/// Content-addressed image registry.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Push an image. Pushing identical bytes yields the identical
    /// reference, no matter how often it is repeated.
    async fn push(&self, artifact: &ImageArtifact) -> RegistryResult<ArtifactRef>;

    /// Fetch the bytes behind a reference.
    async fn pull(&self, reference: &ArtifactRef) -> RegistryResult<Vec<u8>>;
}

/// The load balancer's view of an environment.
#[async_trait]
pub trait TrafficLayer: Send + Sync {
    /// Backends (`address:port`) currently registered to receive
    /// traffic. An instance absent from this list serves nobody, no
    /// matter how healthy it claims to be.
    async fn registered_backends(&self, environment: &str) -> PlatformResult<Vec<String>>;
}
