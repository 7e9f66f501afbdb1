//! Release verification: instance probes cross-checked against the
//! traffic layer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use slipway_core::TargetState;
use slipway_platform::{PlatformApi, TrafficLayer};

use crate::probe::{InstanceProber, ProbeOutcome};

/// Point-in-time health observation. Never cached across polls; every
/// verification round gets a fresh verdict.
#[derive(Debug, Clone)]
pub struct HealthVerdict {
    pub healthy: bool,
    pub checked_at: u64,
    /// Always populated, for the healthy case too.
    pub reason: String,
}

/// Delivers verdicts on a target state's fleet.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn check(&self, target: &TargetState) -> HealthVerdict;
}

/// The production verifier.
///
/// An instance counts as ready only when its own probe passes and the
/// traffic layer lists its address as a registered backend. Platform or
/// traffic errors fold into an unhealthy verdict; verification itself
/// never fails.
pub struct HealthVerifier {
    platform: Arc<dyn PlatformApi>,
    traffic: Arc<dyn TrafficLayer>,
    prober: Arc<dyn InstanceProber>,
}

impl HealthVerifier {
    pub fn new(
        platform: Arc<dyn PlatformApi>,
        traffic: Arc<dyn TrafficLayer>,
        prober: Arc<dyn InstanceProber>,
    ) -> Self {
        Self {
            platform,
            traffic,
            prober,
        }
    }
}

#[async_trait]
impl Verifier for HealthVerifier {
    async fn check(&self, target: &TargetState) -> HealthVerdict {
        let endpoints = match self.platform.instance_endpoints(&target.environment).await {
            Ok(endpoints) => endpoints,
            Err(e) => return unhealthy(format!("instance listing failed: {e}")),
        };
        let backends = match self.traffic.registered_backends(&target.environment).await {
            Ok(backends) => backends,
            Err(e) => return unhealthy(format!("traffic layer unavailable: {e}")),
        };
        let registered: HashSet<&str> = backends.iter().map(String::as_str).collect();

        let mut ready = 0u32;
        let mut problems: Vec<String> = Vec::new();
        for endpoint in &endpoints {
            let address = endpoint.socket_addr();
            let outcome = self.prober.probe(endpoint, &target.probe.path).await;
            if outcome != ProbeOutcome::Healthy {
                problems.push(format!("{}: probe {}", endpoint.instance_id, outcome.label()));
                continue;
            }
            if !registered.contains(address.as_str()) {
                // Alive but invisible to traffic: not serving anyone.
                problems.push(format!(
                    "{}: not registered with traffic layer",
                    endpoint.instance_id
                ));
                continue;
            }
            ready += 1;
        }

        let healthy = ready >= target.replicas;
        let reason = if healthy {
            format!("{ready}/{} instances ready and registered", target.replicas)
        } else if problems.is_empty() {
            format!(
                "{ready}/{} instances ready, group undersized",
                target.replicas
            )
        } else {
            format!(
                "{ready}/{} instances ready ({})",
                target.replicas,
                problems.join("; ")
            )
        };
        debug!(environment = %target.environment, ready, desired = target.replicas, %reason, "verdict");
        HealthVerdict {
            healthy,
            checked_at: epoch_secs(),
            reason,
        }
    }
}

fn unhealthy(reason: String) -> HealthVerdict {
    HealthVerdict {
        healthy: false,
        checked_at: epoch_secs(),
        reason,
    }
}

/// Scripted verifier for controller tests and the daemon's local mode.
///
/// Verdicts are keyed by artifact digest so a scenario can make one
/// release fail verification while its rollback anchor passes, no
/// matter how many rounds the controller runs.
pub struct FakeVerifier {
    default: bool,
    by_digest: Mutex<HashMap<String, bool>>,
    checks: AtomicU32,
}

impl FakeVerifier {
    pub fn healthy() -> Self {
        Self {
            default: true,
            by_digest: Mutex::new(HashMap::new()),
            checks: AtomicU32::new(0),
        }
    }

    pub fn unhealthy() -> Self {
        Self {
            default: false,
            by_digest: Mutex::new(HashMap::new()),
            checks: AtomicU32::new(0),
        }
    }

    /// Pin the verdict for every target carrying this artifact digest.
    pub async fn set_for_artifact(&self, digest: &str, healthy: bool) {
        self.by_digest
            .lock()
            .await
            .insert(digest.to_string(), healthy);
    }

    pub fn checks(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Verifier for FakeVerifier {
    async fn check(&self, target: &TargetState) -> HealthVerdict {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let healthy = self
            .by_digest
            .lock()
            .await
            .get(&target.artifact.digest)
            .copied()
            .unwrap_or(self.default);
        HealthVerdict {
            healthy,
            checked_at: epoch_secs(),
            reason: if healthy {
                "scripted healthy".to_string()
            } else {
                "scripted unhealthy".to_string()
            },
        }
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
    use crate::probe::FakeProber;
    use slipway_core::{ArtifactRef, ProbeSpec, ResourceLimits, UpdateStrategy};
    use slipway_platform::{
        ApplyOutcome, FakePlatform, FakeTrafficLayer, InstanceEndpoint, InstanceGroup,
        PlatformError, PlatformResult,
    };
    use std::collections::BTreeMap;

    fn test_target(environment: &str, replicas: u32) -> TargetState {
        TargetState {
            service: "checkout".to_string(),
            environment: environment.to_string(),
            artifact: ArtifactRef::new("registry.example.com", "team/checkout", &"ab".repeat(32))
                .unwrap(),
            replicas,
            resources: ResourceLimits {
                cpu_millis: 500,
                memory_bytes: 256 * 1024 * 1024,
            },
            env: BTreeMap::new(),
            probe: ProbeSpec {
                path: "/healthz".to_string(),
                port: 8080,
            },
            strategy: UpdateStrategy::default(),
        }
    }

    async fn converged_platform(target: &TargetState) -> Arc<FakePlatform> {
        let platform = Arc::new(FakePlatform::new());
        platform.apply(target).await.unwrap();
        platform
    }

    fn backend_addrs(replicas: u32) -> Vec<String> {
        (0..replicas).map(|i| format!("10.0.0.{}:8080", i + 1)).collect()
    }

    #[tokio::test]
    async fn ready_and_registered_is_healthy() {
        let target = test_target("staging", 3);
        let platform = converged_platform(&target).await;
        let traffic = Arc::new(FakeTrafficLayer::new());
        traffic.set_backends("staging", backend_addrs(3)).await;
        let verifier = HealthVerifier::new(platform, traffic, Arc::new(FakeProber::healthy()));

        let verdict = verifier.check(&target).await;
        assert!(verdict.healthy);
        assert!(verdict.reason.contains("3/3"));
    }

    #[tokio::test]
    async fn unregistered_instance_is_not_ready() {
        let target = test_target("staging", 3);
        let platform = converged_platform(&target).await;
        let traffic = Arc::new(FakeTrafficLayer::new());
        // Only two of three instances made it into the traffic layer.
        traffic.set_backends("staging", backend_addrs(2)).await;
        let verifier = HealthVerifier::new(platform, traffic, Arc::new(FakeProber::healthy()));

        let verdict = verifier.check(&target).await;
        assert!(!verdict.healthy);
        assert!(verdict.reason.contains("not registered"));
    }

    #[tokio::test]
    async fn failed_probe_blocks_readiness() {
        let target = test_target("staging", 3);
        let platform = converged_platform(&target).await;
        let traffic = Arc::new(FakeTrafficLayer::new());
        traffic.set_backends("staging", backend_addrs(3)).await;
        let prober = Arc::new(FakeProber::healthy());
        prober.set_outcome("10.0.0.2:8080", ProbeOutcome::Failed).await;
        let verifier = HealthVerifier::new(platform, traffic, prober);

        let verdict = verifier.check(&target).await;
        assert!(!verdict.healthy);
        assert!(verdict.reason.contains("2/3"));
        assert!(verdict.reason.contains("probe failed"));
    }

    #[tokio::test]
    async fn undersized_group_is_unhealthy() {
        let target = test_target("staging", 3);
        // Platform only ever saw a 2-replica apply.
        let mut smaller = target.clone();
        smaller.replicas = 2;
        let platform = converged_platform(&smaller).await;
        let traffic = Arc::new(FakeTrafficLayer::new());
        traffic.set_backends("staging", backend_addrs(2)).await;
        let verifier = HealthVerifier::new(platform, traffic, Arc::new(FakeProber::healthy()));

        let verdict = verifier.check(&target).await;
        assert!(!verdict.healthy);
        assert!(verdict.reason.contains("undersized"));
    }

    struct DownPlatform;

    #[async_trait]
    impl PlatformApi for DownPlatform {
        async fn apply(&self, _target: &TargetState) -> PlatformResult<ApplyOutcome> {
            Err(PlatformError::Transient("platform down".to_string()))
        }
        async fn instance_group(&self, _environment: &str) -> PlatformResult<InstanceGroup> {
            Err(PlatformError::Transient("platform down".to_string()))
        }
        async fn instance_endpoints(
            &self,
            _environment: &str,
        ) -> PlatformResult<Vec<InstanceEndpoint>> {
            Err(PlatformError::Transient("platform down".to_string()))
        }
    }

    struct DownTraffic;

    #[async_trait]
    impl TrafficLayer for DownTraffic {
        async fn registered_backends(&self, _environment: &str) -> PlatformResult<Vec<String>> {
            Err(PlatformError::Transient("traffic down".to_string()))
        }
    }

    #[tokio::test]
    async fn platform_error_folds_into_verdict() {
        let target = test_target("staging", 3);
        let verifier = HealthVerifier::new(
            Arc::new(DownPlatform),
            Arc::new(FakeTrafficLayer::new()),
            Arc::new(FakeProber::healthy()),
        );

        let verdict = verifier.check(&target).await;
        assert!(!verdict.healthy);
        assert!(verdict.reason.contains("instance listing failed"));
    }

    #[tokio::test]
    async fn traffic_error_folds_into_verdict() {
        let target = test_target("staging", 3);
        let platform = converged_platform(&target).await;
        let verifier =
            HealthVerifier::new(platform, Arc::new(DownTraffic), Arc::new(FakeProber::healthy()));

        let verdict = verifier.check(&target).await;
        assert!(!verdict.healthy);
        assert!(verdict.reason.contains("traffic layer unavailable"));
    }

    #[tokio::test]
    async fn mirrored_traffic_follows_convergence() {
        let target = test_target("staging", 3);
        let platform = Arc::new(FakePlatform::new());
        platform.converge_after(1).await;
        platform.apply(&target).await.unwrap();
        let traffic = Arc::new(FakeTrafficLayer::mirroring(platform.clone()));
        let verifier =
            HealthVerifier::new(platform.clone(), traffic, Arc::new(FakeProber::healthy()));

        // Before convergence one backend is missing from the traffic layer.
        let verdict = verifier.check(&target).await;
        assert!(!verdict.healthy);

        platform.instance_group("staging").await.unwrap();
        let verdict = verifier.check(&target).await;
        assert!(verdict.healthy);
    }

    #[tokio::test]
    async fn fake_verifier_scripts_by_artifact() {
        let verifier = FakeVerifier::healthy();
        let target = test_target("staging", 3);
        verifier.set_for_artifact(&target.artifact.digest, false).await;

        assert!(!verifier.check(&target).await.healthy);
        assert_eq!(verifier.checks(), 1);
    }
}
