//! slipway.toml configuration parser.
//!
//! `[defaults]` is the base deployment template; `[environments.<name>]`
//! tables hold per-environment overrides where every field is optional.
//! Override keys that match no known field are captured instead of
//! silently dropped, so composition can reject typos by name.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::types::UpdateStrategy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlipwayConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub defaults: DeployDefaults,
    #[serde(default)]
    pub environments: HashMap<String, EnvOverrides>,
    pub controller: Option<ControllerSection>,
    pub platform: Option<EndpointConfig>,
    pub registry: Option<EndpointConfig>,
    pub traffic: Option<EndpointConfig>,
    pub identity: Option<IdentityConfig>,
    pub resolver: Option<ResolverConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    /// Registry host images are pushed to, e.g. "registry.example.com".
    pub registry: String,
    /// Repository path under the registry, e.g. "team/checkout".
    pub repository: String,
}

/// Base deployment template, overridable per environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployDefaults {
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default = "default_cpu_millis")]
    pub cpu_millis: u32,
    #[serde(default = "default_memory_bytes")]
    pub memory_bytes: u64,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_probe_path")]
    pub probe_path: String,
    #[serde(default = "default_probe_port")]
    pub probe_port: u16,
    #[serde(default)]
    pub strategy: UpdateStrategy,
}

fn default_replicas() -> u32 {
    2
}

fn default_cpu_millis() -> u32 {
    500
}

fn default_memory_bytes() -> u64 {
    256 * 1024 * 1024
}

fn default_probe_path() -> String {
    "/healthz".to_string()
}

fn default_probe_port() -> u16 {
    8080
}

impl Default for DeployDefaults {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            cpu_millis: default_cpu_millis(),
            memory_bytes: default_memory_bytes(),
            env: BTreeMap::new(),
            probe_path: default_probe_path(),
            probe_port: default_probe_port(),
            strategy: UpdateStrategy::default(),
        }
    }
}

/// Per-environment overrides. Only set fields replace the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvOverrides {
    pub replicas: Option<u32>,
    pub cpu_millis: Option<u32>,
    pub memory_bytes: Option<u64>,
    pub env: Option<BTreeMap<String, String>>,
    pub probe_path: Option<String>,
    pub probe_port: Option<u16>,
    pub strategy: Option<UpdateStrategy>,
    /// Keys that match no known field. Never applied; the composer
    /// rejects the environment if any are present.
    #[serde(flatten)]
    pub unknown: HashMap<String, toml::Value>,
}

/// Rollout controller tuning. Durations are strings like "5s" or "2m".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerSection {
    pub apply_max_attempts: Option<u32>,
    pub apply_backoff_base: Option<String>,
    pub apply_backoff_max: Option<String>,
    pub convergence_poll_interval: Option<String>,
    pub convergence_max_polls: Option<u32>,
    pub verify_interval: Option<String>,
    pub verify_timeout: Option<String>,
    pub healthy_streak: Option<u32>,
}

/// A consumed HTTP endpoint (platform, registry, or traffic layer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub endpoint: String,
    /// Request timeout, e.g. "10s".
    pub timeout: Option<String>,
}

/// Identity provider used to exchange workload assertions for
/// short-lived scoped credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub endpoint: String,
    pub audience: Option<String>,
    /// File the workload identity assertion is read from on each exchange.
    pub assertion_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Directory holding per-revision source checkouts.
    pub checkout_root: String,
}

impl SlipwayConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SlipwayConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a minimal slipway.toml for the given service.
    pub fn scaffold(name: &str, registry: &str, repository: &str) -> Self {
        let mut environments = HashMap::new();
        environments.insert(
            "staging".to_string(),
            EnvOverrides {
                replicas: Some(1),
                ..Default::default()
            },
        );
        environments.insert("production".to_string(), EnvOverrides::default());

        SlipwayConfig {
            service: ServiceConfig {
                name: name.to_string(),
                registry: registry.to_string(),
                repository: repository.to_string(),
            },
            defaults: DeployDefaults::default(),
            environments,
            controller: Some(ControllerSection::default()),
            platform: None,
            registry: None,
            traffic: None,
            identity: None,
            resolver: None,
        }
    }
}
