//! Scriptable in-memory stand-ins for the platform interfaces.
//!
//! Used by unit tests across the workspace and by the daemon's local
//! development mode. The fakes model just enough behavior to exercise
//! the controller: convergence takes a configurable number of polls,
//! failures can be injected, and every apply is recorded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use slipway_core::{ArtifactRef, TargetState};

use crate::api::{PlatformApi, RegistryApi, TrafficLayer};
use crate::error::{PlatformError, PlatformResult, RegistryError, RegistryResult};
use crate::types::{ApplyOutcome, ImageArtifact, InstanceEndpoint, InstanceGroup};

#[derive(Default)]
struct GroupSim {
    desired: u32,
    polls_left: u32,
    probe_port: u16,
}

#[derive(Default)]
struct PlatformSim {
    groups: HashMap<String, GroupSim>,
    last_hash: HashMap<String, String>,
    /// Every apply as (environment, content hash), in order.
    applies: Vec<(String, String)>,
    apply_failures: u32,
    group_failures: u32,
    polls_to_converge: u32,
    stuck: bool,
}

/// In-memory deployment platform.
///
/// After an `apply` that changes state, the instance group reports one
/// instance short of desired for `polls_to_converge` observations, then
/// converges. While `stuck`, it never converges.
#[derive(Default)]
pub struct FakePlatform {
    sim: Mutex<PlatformSim>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` apply calls with a transient error.
    pub async fn fail_next_applies(&self, n: u32) {
        self.sim.lock().await.apply_failures = n;
    }

    /// Fail the next `n` instance-group reads with a transient error.
    pub async fn fail_next_group_reads(&self, n: u32) {
        self.sim.lock().await.group_failures = n;
    }

    /// Future applies converge only after this many group observations.
    pub async fn converge_after(&self, polls: u32) {
        self.sim.lock().await.polls_to_converge = polls;
    }

    /// While stuck, no group ever reaches its desired count.
    pub async fn set_stuck(&self, stuck: bool) {
        self.sim.lock().await.stuck = stuck;
    }

    pub async fn apply_count(&self) -> u32 {
        self.sim.lock().await.applies.len() as u32
    }

    /// Content hashes applied to an environment, in order.
    pub async fn applied_hashes(&self, environment: &str) -> Vec<String> {
        self.sim
            .lock()
            .await
            .applies
            .iter()
            .filter(|(env, _)| env == environment)
            .map(|(_, hash)| hash.clone())
            .collect()
    }

    pub async fn desired_count(&self, environment: &str) -> u32 {
        self.sim
            .lock()
            .await
            .groups
            .get(environment)
            .map(|g| g.desired)
            .unwrap_or(0)
    }

    /// Backends that would currently pass readiness, without consuming
    /// a convergence poll. The mirroring traffic layer reads this.
    pub async fn ready_endpoints(&self, environment: &str) -> Vec<String> {
        let sim = self.sim.lock().await;
        let group = match sim.groups.get(environment) {
            Some(g) => g,
            None => return Vec::new(),
        };
        let ready = if sim.stuck || group.polls_left > 0 {
            group.desired.saturating_sub(1)
        } else {
            group.desired
        };
        (0..ready)
            .map(|i| format!("10.0.0.{}:{}", i + 1, group.probe_port))
            .collect()
    }
}

#[async_trait]
impl PlatformApi for FakePlatform {
    async fn apply(&self, target: &TargetState) -> PlatformResult<ApplyOutcome> {
        let mut sim = self.sim.lock().await;
        if sim.apply_failures > 0 {
            sim.apply_failures -= 1;
            return Err(PlatformError::Transient(
                "simulated apply failure".to_string(),
            ));
        }

        let hash = target.content_hash();
        let env = target.environment.clone();
        let changed = sim.last_hash.get(&env) != Some(&hash);
        sim.applies.push((env.clone(), hash.clone()));

        if changed {
            sim.last_hash.insert(env.clone(), hash);
            let polls_left = sim.polls_to_converge;
            sim.groups.insert(
                env,
                GroupSim {
                    desired: target.replicas,
                    polls_left,
                    probe_port: target.probe.port,
                },
            );
            Ok(ApplyOutcome::Applied)
        } else {
            // Same document: nothing moves, no convergence restart.
            Ok(ApplyOutcome::Unchanged)
        }
    }

    async fn instance_group(&self, environment: &str) -> PlatformResult<InstanceGroup> {
        let mut sim = self.sim.lock().await;
        if sim.group_failures > 0 {
            sim.group_failures -= 1;
            return Err(PlatformError::Transient(
                "simulated group read failure".to_string(),
            ));
        }

        let stuck = sim.stuck;
        let group = match sim.groups.get_mut(environment) {
            Some(g) => g,
            None => {
                return Ok(InstanceGroup {
                    desired_count: 0,
                    ready_count: 0,
                    unready_count: 0,
                    last_observed_at: epoch_secs(),
                });
            }
        };

        let ready = if stuck {
            group.desired.saturating_sub(1)
        } else if group.polls_left > 0 {
            group.polls_left -= 1;
            group.desired.saturating_sub(1)
        } else {
            group.desired
        };

        Ok(InstanceGroup {
            desired_count: group.desired,
            ready_count: ready,
            unready_count: group.desired - ready,
            last_observed_at: epoch_secs(),
        })
    }

    async fn instance_endpoints(
        &self,
        environment: &str,
    ) -> PlatformResult<Vec<InstanceEndpoint>> {
        let sim = self.sim.lock().await;
        let group = match sim.groups.get(environment) {
            Some(g) => g,
            None => return Ok(Vec::new()),
        };
        Ok((0..group.desired)
            .map(|i| InstanceEndpoint {
                instance_id: format!("inst-{i}"),
                address: format!("10.0.0.{}", i + 1),
                port: group.probe_port,
            })
            .collect())
    }
}

#[derive(Default)]
struct RegistrySim {
    blobs: HashMap<String, Vec<u8>>,
    push_count: u32,
}

/// In-memory content-addressed registry.
#[derive(Default)]
pub struct FakeRegistry {
    sim: Mutex<RegistrySim>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_count(&self) -> u32 {
        self.sim.lock().await.push_count
    }

    pub async fn blob_count(&self) -> usize {
        self.sim.lock().await.blobs.len()
    }
}

#[async_trait]
impl RegistryApi for FakeRegistry {
    async fn push(&self, artifact: &ImageArtifact) -> RegistryResult<ArtifactRef> {
        let actual = hex::encode(Sha256::digest(&artifact.bytes));
        if actual != artifact.digest {
            return Err(RegistryError::DigestMismatch {
                expected: artifact.digest.clone(),
                actual,
            });
        }
        let mut sim = self.sim.lock().await;
        sim.push_count += 1;
        sim.blobs
            .insert(artifact.digest.clone(), artifact.bytes.clone());
        ArtifactRef::new(&artifact.registry, &artifact.repository, &artifact.digest)
            .map_err(|e| RegistryError::Api(e.to_string()))
    }

    async fn pull(&self, reference: &ArtifactRef) -> RegistryResult<Vec<u8>> {
        self.sim
            .lock()
            .await
            .blobs
            .get(&reference.digest)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(reference.digest.clone()))
    }
}

/// In-memory traffic layer.
///
/// Either holds explicitly scripted backend lists, or mirrors a
/// `FakePlatform` so registration follows instance readiness.
#[derive(Default)]
pub struct FakeTrafficLayer {
    backends: Mutex<HashMap<String, Vec<String>>>,
    mirror: Option<Arc<FakePlatform>>,
}

impl FakeTrafficLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mirroring(platform: Arc<FakePlatform>) -> Self {
        Self {
            backends: Mutex::new(HashMap::new()),
            mirror: Some(platform),
        }
    }

    pub async fn set_backends(&self, environment: &str, backends: Vec<String>) {
        self.backends
            .lock()
            .await
            .insert(environment.to_string(), backends);
    }
}

#[async_trait]
impl TrafficLayer for FakeTrafficLayer {
    async fn registered_backends(&self, environment: &str) -> PlatformResult<Vec<String>> {
        if let Some(platform) = &self.mirror {
            return Ok(platform.ready_endpoints(environment).await);
        }
        Ok(self
            .backends
            .lock()
            .await
            .get(environment)
            .cloned()
            .unwrap_or_default())
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
