//! Observed platform state and registry payload types.

use serde::{Deserialize, Serialize};

/// What an `apply` did on the platform side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The platform accepted a new desired state and began moving.
    Applied,
    /// The submitted state was already current; nothing changed.
    Unchanged,
}

/// Point-in-time snapshot of an environment's instance group, derived
/// by polling. Never persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceGroup {
    pub desired_count: u32,
    pub ready_count: u32,
    pub unready_count: u32,
    /// Unix timestamp (seconds) of the observation.
    pub last_observed_at: u64,
}

impl InstanceGroup {
    /// Converged means every desired instance reports ready.
    pub fn is_converged(&self) -> bool {
        self.ready_count == self.desired_count
    }
}

/// One reachable instance of a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceEndpoint {
    pub instance_id: String,
    pub address: String,
    pub port: u16,
}

impl InstanceEndpoint {
    /// `address:port`, the form the traffic layer registers backends in.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// A built image ready to push: the digest is the hex SHA-256 of
/// `bytes`, computed before the push so the registry can verify it.
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    pub registry: String,
    pub repository: String,
    pub digest: String,
    pub bytes: Vec<u8>,
}
