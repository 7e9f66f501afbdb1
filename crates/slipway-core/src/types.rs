//! Shared types used across Slipway crates.
//!
//! `TargetState` is the central document: the composer produces it, the
//! platform applies it, and the controller compares observed reality
//! against it. It is fully serializable so identical inputs always
//! produce a byte-identical (and hence hash-identical) document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::artifact::ArtifactRef;

/// Resource limits per service instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceLimits {
    /// CPU allotment in millicores.
    pub cpu_millis: u32,
    /// Memory limit in bytes.
    pub memory_bytes: u64,
}

/// Where the platform and the verifier probe an instance for readiness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeSpec {
    /// HTTP path, e.g. "/healthz".
    pub path: String,
    /// Port the probe connects to.
    pub port: u16,
}

/// How instance replacement proceeds during a rollout.
///
/// `max_surge = 0` with `max_unavailable >= 1` expresses in-place
/// replacement; the defaults replace one instance at a time with no
/// capacity loss.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateStrategy {
    /// Extra instances allowed above the desired count while updating.
    #[serde(default = "default_max_surge")]
    pub max_surge: u32,
    /// Instances allowed below the desired count while updating.
    #[serde(default = "default_max_unavailable")]
    pub max_unavailable: u32,
}

fn default_max_surge() -> u32 {
    1
}

fn default_max_unavailable() -> u32 {
    0
}

impl Default for UpdateStrategy {
    fn default() -> Self {
        Self {
            max_surge: default_max_surge(),
            max_unavailable: default_max_unavailable(),
        }
    }
}

/// The complete desired state for one environment: what should be
/// running, how many, and how the platform should get there.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetState {
    pub service: String,
    pub environment: String,
    pub artifact: ArtifactRef,
    pub replicas: u32,
    pub resources: ResourceLimits,
    /// Environment variables, ordered so serialization is stable.
    pub env: BTreeMap<String, String>,
    pub probe: ProbeSpec,
    pub strategy: UpdateStrategy,
}

impl TargetState {
    /// Hex SHA-256 over the canonical JSON encoding.
    ///
    /// Struct fields serialize in declaration order and `env` is a
    /// `BTreeMap`, so equal target states always hash equal. This type
    /// contains only strings and integers; JSON encoding cannot fail.
    pub fn content_hash(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}
