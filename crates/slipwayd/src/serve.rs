//! Serve mode: wire every subsystem and run the API server.
//!
//! With `--fake-platform` the daemon runs against the in-memory fakes
//! from `slipway-platform`, which is enough to exercise the whole
//! release path locally. Otherwise every consumed endpoint must be
//! configured and credentials come from the identity exchange.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use slipway_api::{ApiState, build_router};
use slipway_broker::{CredentialBroker, CredentialScope, HttpIdentityExchange};
use slipway_compose::Composer;
use slipway_core::SlipwayConfig;
use slipway_core::config::EndpointConfig;
use slipway_health::{FakeProber, HealthVerifier, HttpProber, InstanceProber};
use slipway_platform::{
    FakePlatform, FakeRegistry, FakeTrafficLayer, HttpPlatform, HttpRegistry, HttpTrafficLayer,
    PlatformApi, RegistryApi, TrafficLayer,
};
use slipway_resolver::Resolver;
use slipway_rollout::{ControllerConfig, RolloutController};
use slipway_state::StateStore;

type Wiring = (
    Arc<dyn PlatformApi>,
    Arc<dyn RegistryApi>,
    Arc<dyn TrafficLayer>,
    Arc<dyn InstanceProber>,
);

pub async fn run(
    port: u16,
    data_dir: PathBuf,
    config_path: PathBuf,
    fake_platform: bool,
) -> anyhow::Result<()> {
    info!("Slipway daemon starting");

    let config = SlipwayConfig::from_file(&config_path)?;
    info!(service = %config.service.name, "configuration loaded");

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("slipway.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let (platform, registry, traffic, prober) = if fake_platform {
        wire_fakes()
    } else {
        wire_endpoints(&config)?
    };

    let verifier = Arc::new(HealthVerifier::new(platform.clone(), traffic, prober));

    let controller_config = config
        .controller
        .as_ref()
        .map(ControllerConfig::from_section)
        .unwrap_or_default();
    let controller = Arc::new(RolloutController::new(
        store.clone(),
        platform,
        verifier,
        controller_config,
    ));

    // Settle anything a previous process left mid-flight.
    let recovered = controller.recover()?;
    if recovered > 0 {
        warn!(recovered, "settled interrupted rollouts from previous run");
    }

    let checkout_root = config
        .resolver
        .as_ref()
        .map(|r| PathBuf::from(&r.checkout_root))
        .unwrap_or_else(|| data_dir.join("checkouts"));
    std::fs::create_dir_all(&checkout_root)?;
    let resolver = Arc::new(Resolver::new(
        registry,
        checkout_root,
        &config.service.registry,
        &config.service.repository,
    ));
    let composer = Arc::new(Composer::new(config));

    let state = ApiState {
        store,
        controller,
        resolver,
        composer,
    };
    let router = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // In-flight rollouts die with the process; the next boot's
    // recover() puts them on the record as failed.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
        })
        .await?;

    info!("Slipway daemon stopped");
    Ok(())
}

fn wire_fakes() -> Wiring {
    info!("running against in-memory platform fakes");
    let platform = Arc::new(FakePlatform::new());
    let traffic = Arc::new(FakeTrafficLayer::mirroring(platform.clone()));
    (
        platform,
        Arc::new(FakeRegistry::new()),
        traffic,
        Arc::new(FakeProber::healthy()),
    )
}

fn wire_endpoints(config: &SlipwayConfig) -> anyhow::Result<Wiring> {
    let identity = config
        .identity
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("[identity] section is required without --fake-platform"))?;
    let assertion_path = identity
        .assertion_path
        .clone()
        .unwrap_or_else(|| "/var/run/slipway/assertion".to_string());
    let audience = identity
        .audience
        .clone()
        .unwrap_or_else(|| "slipway".to_string());
    let exchange = HttpIdentityExchange::new(
        &identity.endpoint,
        &audience,
        Duration::from_secs(10),
    )?;
    let broker = Arc::new(CredentialBroker::new(Arc::new(exchange), assertion_path, 60));
    info!(endpoint = %identity.endpoint, "credential broker ready");

    let platform_cfg = require_endpoint(&config.platform, "platform")?;
    let registry_cfg = require_endpoint(&config.registry, "registry")?;
    let traffic_cfg = require_endpoint(&config.traffic, "traffic")?;

    let platform = HttpPlatform::new(
        &platform_cfg.endpoint,
        endpoint_timeout(platform_cfg),
        broker.token_source(CredentialScope::Platform),
    )?;
    let registry = HttpRegistry::new(
        &registry_cfg.endpoint,
        endpoint_timeout(registry_cfg),
        broker.token_source(CredentialScope::RegistryPush),
    )?;
    let traffic = HttpTrafficLayer::new(
        &traffic_cfg.endpoint,
        endpoint_timeout(traffic_cfg),
        broker.token_source(CredentialScope::Platform),
    )?;

    Ok((
        Arc::new(platform),
        Arc::new(registry),
        Arc::new(traffic),
        Arc::new(HttpProber::new(Duration::from_secs(5))),
    ))
}

fn require_endpoint<'a>(
    section: &'a Option<EndpointConfig>,
    name: &str,
) -> anyhow::Result<&'a EndpointConfig> {
    section
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("[{name}] section is required without --fake-platform"))
}

fn endpoint_timeout(cfg: &EndpointConfig) -> Duration {
    cfg.timeout
        .as_deref()
        .and_then(parse_duration)
        .unwrap_or(Duration::from_secs(10))
}

/// Parse a duration string like "5s", "500ms", "1m".
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
