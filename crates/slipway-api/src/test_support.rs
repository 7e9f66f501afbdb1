//! Shared harness for handler tests: a fully wired `ApiState` over the
//! in-memory fakes, plus a scratch checkout directory for revisions.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use slipway_compose::Composer;
use slipway_core::SlipwayConfig;
use slipway_health::FakeVerifier;
use slipway_platform::{FakePlatform, FakeRegistry};
use slipway_resolver::Resolver;
use slipway_rollout::{ControllerConfig, RolloutController};
use slipway_state::{Release, Rollout, StateStore};

use crate::ApiState;

pub(crate) struct TestContext {
    pub state: ApiState,
    pub platform: Arc<FakePlatform>,
    pub verifier: Arc<FakeVerifier>,
    pub checkout: TempDir,
}

pub(crate) fn test_context() -> TestContext {
    let checkout = tempfile::tempdir().unwrap();
    let store = StateStore::open_in_memory().unwrap();
    let platform = Arc::new(FakePlatform::new());
    let verifier = Arc::new(FakeVerifier::healthy());
    let controller = Arc::new(RolloutController::new(
        store.clone(),
        platform.clone(),
        verifier.clone(),
        ControllerConfig::fast(),
    ));
    let resolver = Arc::new(Resolver::new(
        Arc::new(FakeRegistry::new()),
        checkout.path(),
        "registry.example.com",
        "team/checkout",
    ));
    let composer = Arc::new(Composer::new(SlipwayConfig::scaffold(
        "checkout",
        "registry.example.com",
        "team/checkout",
    )));

    TestContext {
        state: ApiState {
            store,
            controller,
            resolver,
            composer,
        },
        platform,
        verifier,
        checkout,
    }
}

pub(crate) fn write_revision(root: &Path, revision: &str) {
    let dir = root.join(revision);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("service.bin"), revision.as_bytes()).unwrap();
}

/// Resolve, compose, persist, and start a release, bypassing the HTTP
/// handlers. Returns the release sequence and the rollout id.
pub(crate) async fn cut_release(
    ctx: &TestContext,
    revision: &str,
    environment: &str,
) -> (u64, String) {
    write_revision(ctx.checkout.path(), revision);
    let artifact = ctx.state.resolver.resolve(revision).await.unwrap();
    let target = ctx.state.composer.compose(&artifact, environment).unwrap();
    let sequence = ctx.state.store.next_release_sequence().unwrap();
    let release = Release {
        sequence,
        artifact,
        revision: revision.to_string(),
        environment: environment.to_string(),
        target,
        created_at: 1000,
    };
    ctx.state.store.put_release(&release).unwrap();
    let rollout_id = ctx.state.controller.start(&release).await.unwrap();
    (sequence, rollout_id)
}

pub(crate) async fn wait_terminal(store: &StateStore, rollout_id: &str) -> Rollout {
    for _ in 0..500 {
        if let Some(rollout) = store.get_rollout(rollout_id).unwrap() {
            if rollout.state.is_terminal() {
                return rollout;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("rollout {rollout_id} never reached a terminal state");
}
