//! Content-addressed artifact references.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Immutable reference to a pushed image:
/// `registry.example.com/team/app@sha256:<64 hex chars>`.
///
/// References always carry a digest, never a mutable tag. The digest
/// alone identifies the image bytes, so a ref can be re-pulled years
/// later and yield the same artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ArtifactRef {
    pub registry: String,
    pub repository: String,
    /// Lowercase hex SHA-256 of the image content.
    pub digest: String,
}

#[derive(Debug, Error)]
pub enum ArtifactRefError {
    #[error("missing '@sha256:' digest separator: {0}")]
    MissingDigest(String),
    #[error("invalid digest, expected 64 lowercase hex chars: {0}")]
    InvalidDigest(String),
    #[error("invalid artifact reference: {0}")]
    InvalidRef(String),
}

impl ArtifactRef {
    /// Build a reference from parts, validating the digest.
    pub fn new(
        registry: &str,
        repository: &str,
        digest: &str,
    ) -> Result<Self, ArtifactRefError> {
        if registry.is_empty() || repository.is_empty() {
            return Err(ArtifactRefError::InvalidRef(format!(
                "{registry}/{repository}"
            )));
        }
        if !is_hex_digest(digest) {
            return Err(ArtifactRefError::InvalidDigest(digest.to_string()));
        }
        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            digest: digest.to_string(),
        })
    }

    /// Parse `registry/repository@sha256:digest`.
    pub fn parse(s: &str) -> Result<Self, ArtifactRefError> {
        let (name, digest) = s
            .split_once("@sha256:")
            .ok_or_else(|| ArtifactRefError::MissingDigest(s.to_string()))?;
        let (registry, repository) = name
            .split_once('/')
            .ok_or_else(|| ArtifactRefError::InvalidRef(s.to_string()))?;
        Self::new(registry, repository, digest)
    }

    /// First 12 hex chars of the digest, for log lines.
    pub fn short_digest(&self) -> &str {
        &self.digest[..12]
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}@sha256:{}",
            self.registry, self.repository, self.digest
        )
    }
}

fn is_hex_digest(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
