//! Desired-state composition.
//!
//! Merges the `[defaults]` deployment template with one environment's
//! override table into a complete [`TargetState`]. Composition is pure:
//! the same artifact and configuration always produce a byte-identical
//! target state, which is what makes rollback a re-apply of a recorded
//! document rather than a guess.

use thiserror::Error;

use slipway_core::{ArtifactRef, ProbeSpec, ResourceLimits, SlipwayConfig, TargetState};

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),

    /// Override keys that match no known field. Rejected rather than
    /// silently dropped so a typo cannot deploy the wrong shape.
    #[error("unknown override keys in [environments.{environment}]: {}", .keys.join(", "))]
    UnknownKeys {
        environment: String,
        keys: Vec<String>,
    },

    #[error("invalid target state: {0}")]
    Invalid(String),
}

pub type ComposeResult<T> = Result<T, ComposeError>;

/// Composes target states from configuration.
pub struct Composer {
    config: SlipwayConfig,
}

impl Composer {
    pub fn new(config: SlipwayConfig) -> Self {
        Self { config }
    }

    /// Base defaults with the environment's overrides applied on top.
    /// Environment variables merge per key; every other field is an
    /// all-or-nothing replacement.
    pub fn compose(&self, artifact: &ArtifactRef, environment: &str) -> ComposeResult<TargetState> {
        let overrides = self
            .config
            .environments
            .get(environment)
            .ok_or_else(|| ComposeError::UnknownEnvironment(environment.to_string()))?;

        if !overrides.unknown.is_empty() {
            let mut keys: Vec<String> = overrides.unknown.keys().cloned().collect();
            keys.sort();
            return Err(ComposeError::UnknownKeys {
                environment: environment.to_string(),
                keys,
            });
        }

        let defaults = &self.config.defaults;
        let replicas = overrides.replicas.unwrap_or(defaults.replicas);
        if replicas == 0 {
            return Err(ComposeError::Invalid("replicas must be at least 1".to_string()));
        }
        let probe_path = overrides
            .probe_path
            .clone()
            .unwrap_or_else(|| defaults.probe_path.clone());
        if !probe_path.starts_with('/') {
            return Err(ComposeError::Invalid(format!(
                "probe path must start with '/': {probe_path}"
            )));
        }

        let mut env = defaults.env.clone();
        if let Some(extra) = &overrides.env {
            for (key, value) in extra {
                env.insert(key.clone(), value.clone());
            }
        }

        Ok(TargetState {
            service: self.config.service.name.clone(),
            environment: environment.to_string(),
            artifact: artifact.clone(),
            replicas,
            resources: ResourceLimits {
                cpu_millis: overrides.cpu_millis.unwrap_or(defaults.cpu_millis),
                memory_bytes: overrides.memory_bytes.unwrap_or(defaults.memory_bytes),
            },
            env,
            probe: ProbeSpec {
                path: probe_path,
                port: overrides.probe_port.unwrap_or(defaults.probe_port),
            },
            strategy: overrides
                .strategy
                .clone()
                .unwrap_or_else(|| defaults.strategy.clone()),
        })
    }
}
