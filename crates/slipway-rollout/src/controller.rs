//! The rollout state machine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use slipway_core::TargetState;
use slipway_health::{VerdictWindow, Verifier};
use slipway_platform::PlatformApi;
use slipway_state::{Outcome, Release, Rollout, RolloutState, StateStore};

use crate::config::ControllerConfig;
use crate::error::{RolloutError, RolloutResult};

#[derive(Default)]
struct ActiveSet {
    /// environment → rollout id. Authoritative liveness guard.
    by_env: HashMap<String, String>,
    /// rollout id → cancellation signal.
    cancels: HashMap<String, watch::Sender<bool>>,
}

/// Drives rollouts to a terminal state.
///
/// The controller owns all rollout state transitions: each accepted
/// release gets one spawned run task, and only that task writes its
/// rollout record. The conflict guard admits at most one non-terminal
/// rollout per environment.
pub struct RolloutController {
    store: StateStore,
    platform: Arc<dyn PlatformApi>,
    verifier: Arc<dyn Verifier>,
    config: ControllerConfig,
    active: Mutex<ActiveSet>,
}

impl RolloutController {
    pub fn new(
        store: StateStore,
        platform: Arc<dyn PlatformApi>,
        verifier: Arc<dyn Verifier>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            platform,
            verifier,
            config,
            active: Mutex::new(ActiveSet::default()),
        }
    }

    /// Accept a release for rollout. Returns the rollout id immediately;
    /// the state machine runs in a spawned task. Rejects with `Conflict`
    /// while the environment has a non-terminal rollout — releases are
    /// never queued.
    pub async fn start(self: &Arc<Self>, release: &Release) -> RolloutResult<String> {
        let environment = release.environment.clone();

        // Guard registration and both conflict checks happen under one
        // lock so two concurrent starts cannot both pass.
        let mut active = self.active.lock().await;
        if let Some(existing) = active.by_env.get(&environment) {
            return Err(RolloutError::Conflict {
                environment,
                rollout_id: existing.clone(),
            });
        }
        // Non-terminal records from a previous process also hold the
        // environment until recover() settles them.
        if let Some(existing) = self.store.active_rollout(&environment)? {
            return Err(RolloutError::Conflict {
                environment,
                rollout_id: existing.rollout_id,
            });
        }

        let rollout_id = format!("ro-{}-{:x}", release.sequence, epoch_millis());
        let now = epoch_secs();
        let rollout = Rollout {
            rollout_id: rollout_id.clone(),
            release_seq: release.sequence,
            environment: environment.clone(),
            state: RolloutState::Pending,
            attempt_count: 0,
            started_at: now,
            last_transition_at: now,
            failure_reason: None,
        };
        self.store.put_rollout(&rollout)?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        active.by_env.insert(environment.clone(), rollout_id.clone());
        active.cancels.insert(rollout_id.clone(), cancel_tx);
        drop(active);

        info!(
            rollout = %rollout_id,
            environment = %environment,
            release = release.sequence,
            artifact = %release.artifact.short_digest(),
            "rollout started"
        );

        let controller = Arc::clone(self);
        let target = release.target.clone();
        tokio::spawn(controller.run(rollout, target, cancel_rx));
        Ok(rollout_id)
    }

    /// Start a rollout whose target is a previously recorded release,
    /// bypassing anchor selection. Same conflict guard, same machine.
    pub async fn rollback_to(
        self: &Arc<Self>,
        release_seq: u64,
        environment: &str,
    ) -> RolloutResult<String> {
        let release = self
            .store
            .get_release(release_seq)?
            .ok_or(RolloutError::ReleaseNotFound(release_seq))?;
        if release.environment != environment {
            return Err(RolloutError::WrongEnvironment {
                sequence: release_seq,
                environment: release.environment,
            });
        }
        self.start(&release).await
    }

    /// Request cancellation. Returns true if a running rollout was
    /// signalled; false is the terminal no-op.
    pub async fn cancel(&self, rollout_id: &str) -> RolloutResult<bool> {
        let active = self.active.lock().await;
        if let Some(cancel) = active.cancels.get(rollout_id) {
            let _ = cancel.send(true);
            info!(rollout = %rollout_id, "cancellation requested");
            return Ok(true);
        }
        drop(active);
        match self.store.get_rollout(rollout_id)? {
            Some(_) => Ok(false),
            None => Err(RolloutError::RolloutNotFound(rollout_id.to_string())),
        }
    }

    /// Settle rollouts orphaned by a previous process: anything
    /// non-terminal in the store is marked `Failed` so the environment
    /// is released and the interruption is on the record.
    pub fn recover(&self) -> RolloutResult<u32> {
        let mut recovered = 0;
        for mut rollout in self.store.list_rollouts()? {
            if rollout.state.is_terminal() {
                continue;
            }
            rollout.state = RolloutState::Failed;
            rollout.last_transition_at = epoch_secs();
            rollout.failure_reason = Some("interrupted by orchestrator restart".to_string());
            self.store.put_rollout(&rollout)?;
            self.store.append_outcome(&rollout, Outcome::Failed, epoch_secs())?;
            warn!(rollout = %rollout.rollout_id, environment = %rollout.environment, "settled interrupted rollout as failed");
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn run(
        self: Arc<Self>,
        mut rollout: Rollout,
        target: TargetState,
        mut cancel: watch::Receiver<bool>,
    ) {
        let outcome = self.drive(&mut rollout, &target, &mut cancel).await;

        let mut active = self.active.lock().await;
        active.by_env.remove(&rollout.environment);
        active.cancels.remove(&rollout.rollout_id);
        drop(active);

        match self.store.append_outcome(&rollout, outcome, epoch_secs()) {
            Ok(true) => {}
            Ok(false) => {
                debug!(rollout = %rollout.rollout_id, "history entry already present")
            }
            Err(e) => {
                error!(rollout = %rollout.rollout_id, error = %e, "failed to append history")
            }
        }
    }

    async fn drive(
        &self,
        rollout: &mut Rollout,
        target: &TargetState,
        cancel: &mut watch::Receiver<bool>,
    ) -> Outcome {
        self.transition(rollout, RolloutState::Applying, None);
        if let Err(reason) = self.apply_with_retry(rollout, target, cancel).await {
            return self.roll_back(rollout, reason, cancel).await;
        }
        if let Err(reason) = self.await_convergence(rollout, target, cancel).await {
            return self.roll_back(rollout, reason, cancel).await;
        }

        self.transition(rollout, RolloutState::Verifying, None);
        match self.verify(rollout, target, cancel).await {
            Ok(()) => {
                self.transition(rollout, RolloutState::Succeeded, None);
                info!(rollout = %rollout.rollout_id, environment = %rollout.environment, "rollout succeeded");
                Outcome::Succeeded
            }
            Err(reason) => self.roll_back(rollout, reason, cancel).await,
        }
    }

    /// Apply with bounded exponential backoff on transient failures.
    async fn apply_with_retry(
        &self,
        rollout: &mut Rollout,
        target: &TargetState,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), String> {
        let mut attempt = 0u32;
        loop {
            if *cancel.borrow() {
                return Err("cancelled by operator".to_string());
            }
            attempt += 1;
            rollout.attempt_count = attempt;
            self.persist(rollout);

            match self.platform.apply(target).await {
                Ok(outcome) => {
                    debug!(rollout = %rollout.rollout_id, ?outcome, attempt, "apply accepted");
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < self.config.apply_max_attempts => {
                    let delay = backoff_delay(
                        self.config.apply_backoff_base,
                        self.config.apply_backoff_max,
                        attempt,
                    );
                    warn!(
                        rollout = %rollout.rollout_id,
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient apply failure, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.changed() => return Err("cancelled by operator".to_string()),
                    }
                }
                Err(e) if e.is_transient() => {
                    return Err(format!("apply failed after {attempt} attempts: {e}"));
                }
                Err(e) => return Err(format!("apply rejected: {e}")),
            }
        }
    }

    /// Poll the instance group until every desired instance is ready.
    /// Transient read failures consume poll budget; they never surface.
    async fn await_convergence(
        &self,
        rollout: &Rollout,
        target: &TargetState,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), String> {
        for poll in 0..self.config.convergence_max_polls {
            if poll > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.convergence_poll_interval) => {}
                    _ = cancel.changed() => return Err("cancelled by operator".to_string()),
                }
            }
            if *cancel.borrow() {
                return Err("cancelled by operator".to_string());
            }
            match self.platform.instance_group(&target.environment).await {
                Ok(group) => {
                    if group.is_converged() && group.desired_count == target.replicas {
                        debug!(
                            rollout = %rollout.rollout_id,
                            ready = group.ready_count,
                            polls = poll + 1,
                            "instance group converged"
                        );
                        return Ok(());
                    }
                }
                Err(e) => {
                    debug!(rollout = %rollout.rollout_id, error = %e, "instance group read failed")
                }
            }
        }
        Err(format!(
            "convergence timeout after {} polls",
            self.config.convergence_max_polls
        ))
    }

    /// Success requires a streak of consecutive healthy verdicts inside
    /// the verification budget. At least one verdict is always taken.
    async fn verify(
        &self,
        rollout: &Rollout,
        target: &TargetState,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), String> {
        let mut window = VerdictWindow::new(self.config.healthy_streak);
        let deadline = tokio::time::Instant::now() + self.config.verify_timeout;
        loop {
            if *cancel.borrow() {
                return Err("cancelled by operator".to_string());
            }
            let verdict = self.verifier.check(target).await;
            if window.record(verdict.healthy) {
                info!(
                    rollout = %rollout.rollout_id,
                    streak = window.streak(),
                    "verification satisfied"
                );
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(format!(
                    "verification failed within {:?}: {}",
                    self.config.verify_timeout, verdict.reason
                ));
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.verify_interval) => {}
                _ = cancel.changed() => return Err("cancelled by operator".to_string()),
            }
        }
    }

    /// Restore the last successful release. Without an anchor the
    /// rollout fails outright: a first-ever release has no safe prior
    /// state and guessing would be worse than flagging.
    async fn roll_back(
        &self,
        rollout: &mut Rollout,
        reason: String,
        _cancel: &mut watch::Receiver<bool>,
    ) -> Outcome {
        warn!(rollout = %rollout.rollout_id, %reason, "entering rollback");
        self.transition(rollout, RolloutState::RollingBack, Some(reason.clone()));

        let anchor = match self.store.last_successful(&rollout.environment) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                return self.fail(
                    rollout,
                    format!("{reason}; no successful release to roll back to"),
                );
            }
            Err(e) => {
                return self.fail(rollout, format!("{reason}; anchor lookup failed: {e}"));
            }
        };
        let release = match self.store.get_release(anchor.release_seq) {
            Ok(Some(release)) => release,
            _ => {
                return self.fail(
                    rollout,
                    format!("{reason}; anchor release {} missing", anchor.release_seq),
                );
            }
        };

        // Rollback is not cancellable: once entered it must land on a
        // terminal state, so the restore loops get an inert signal.
        let (_inert_tx, mut inert_rx) = watch::channel(false);

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.platform.apply(&release.target).await {
                Ok(_) => break,
                Err(e) if attempts < 2 => {
                    warn!(rollout = %rollout.rollout_id, error = %e, "rollback apply failed, retrying once");
                    tokio::time::sleep(self.config.apply_backoff_base).await;
                }
                Err(e) => {
                    return self.fail(rollout, format!("{reason}; rollback apply failed: {e}"));
                }
            }
        }

        if let Err(why) = self
            .await_convergence(rollout, &release.target, &mut inert_rx)
            .await
        {
            return self.fail(rollout, format!("{reason}; rollback did not converge: {why}"));
        }
        if let Err(why) = self.verify(rollout, &release.target, &mut inert_rx).await {
            return self.fail(
                rollout,
                format!("{reason}; restored release failed verification: {why}"),
            );
        }

        self.transition(rollout, RolloutState::RolledBack, Some(reason));
        info!(
            rollout = %rollout.rollout_id,
            restored_release = release.sequence,
            "rolled back to last successful release"
        );
        Outcome::RolledBack
    }

    fn fail(&self, rollout: &mut Rollout, reason: String) -> Outcome {
        warn!(rollout = %rollout.rollout_id, %reason, "rollout failed");
        self.transition(rollout, RolloutState::Failed, Some(reason));
        Outcome::Failed
    }

    fn transition(&self, rollout: &mut Rollout, state: RolloutState, reason: Option<String>) {
        rollout.state = state;
        rollout.last_transition_at = epoch_secs();
        if let Some(reason) = reason {
            rollout.failure_reason = Some(reason);
        }
        debug!(rollout = %rollout.rollout_id, state = rollout.state.label(), "transition");
        self.persist(rollout);
    }

    fn persist(&self, rollout: &Rollout) {
        // A lost write must not abort the fleet operation mid-flight.
        if let Err(e) = self.store.put_rollout(rollout) {
            error!(rollout = %rollout.rollout_id, error = %e, "failed to persist rollout");
        }
    }
}

/// 1-based attempt → base * 2^(attempt-1), capped.
fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    (base * factor).min(max)
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use slipway_core::{ArtifactRef, ProbeSpec, ResourceLimits, UpdateStrategy};
    use slipway_health::FakeVerifier;
    use slipway_platform::FakePlatform;
    use std::collections::BTreeMap;

    struct Harness {
        controller: Arc<RolloutController>,
        store: StateStore,
        platform: Arc<FakePlatform>,
        verifier: Arc<FakeVerifier>,
    }

    fn harness(verifier: FakeVerifier) -> Harness {
        let store = StateStore::open_in_memory().unwrap();
        let platform = Arc::new(FakePlatform::new());
        let verifier = Arc::new(verifier);
        let controller = Arc::new(RolloutController::new(
            store.clone(),
            platform.clone(),
            verifier.clone(),
            ControllerConfig::fast(),
        ));
        Harness {
            controller,
            store,
            platform,
            verifier,
        }
    }

    fn test_target(environment: &str, digest_byte: &str) -> TargetState {
        TargetState {
            service: "checkout".to_string(),
            environment: environment.to_string(),
            artifact: ArtifactRef::new(
                "registry.example.com",
                "team/checkout",
                &digest_byte.repeat(32),
            )
            .unwrap(),
            replicas: 3,
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

    fn make_release(store: &StateStore, environment: &str, digest_byte: &str) -> Release {
        let sequence = store.next_release_sequence().unwrap();
        let release = Release {
            sequence,
            artifact: ArtifactRef::new(
                "registry.example.com",
                "team/checkout",
                &digest_byte.repeat(32),
            )
            .unwrap(),
            revision: format!("rev-{sequence}"),
            environment: environment.to_string(),
            target: test_target(environment, digest_byte),
            created_at: epoch_secs(),
        };
        store.put_release(&release).unwrap();
        release
    }

    async fn wait_terminal(store: &StateStore, rollout_id: &str) -> Rollout {
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

    #[tokio::test]
    async fn healthy_release_succeeds() {
        let h = harness(FakeVerifier::healthy());
        let release = make_release(&h.store, "production", "aa");

        let rollout_id = h.controller.start(&release).await.unwrap();
        let rollout = wait_terminal(&h.store, &rollout_id).await;

        assert_eq!(rollout.state, RolloutState::Succeeded);
        assert!(rollout.failure_reason.is_none());
        assert!(h.platform.apply_count().await >= 1);

        let history = h.store.list_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, Outcome::Succeeded);
        assert_eq!(history[0].rollout_id, rollout_id);
    }

    #[tokio::test]
    async fn environment_admits_one_active_rollout() {
        let h = harness(FakeVerifier::healthy());
        h.platform.converge_after(5).await;
        let first = make_release(&h.store, "production", "aa");
        let second = make_release(&h.store, "production", "bb");
        let elsewhere = make_release(&h.store, "staging", "cc");

        let first_id = h.controller.start(&first).await.unwrap();
        let err = h.controller.start(&second).await.unwrap_err();
        match err {
            RolloutError::Conflict { environment, rollout_id } => {
                assert_eq!(environment, "production");
                assert_eq!(rollout_id, first_id);
            }
            other => panic!("expected Conflict, got {other:?}"),
        }

        // A different environment is not held.
        let elsewhere_id = h.controller.start(&elsewhere).await.unwrap();

        // The rejected start left the first rollout untouched.
        let first_rollout = wait_terminal(&h.store, &first_id).await;
        assert_eq!(first_rollout.state, RolloutState::Succeeded);
        let elsewhere_rollout = wait_terminal(&h.store, &elsewhere_id).await;
        assert_eq!(elsewhere_rollout.state, RolloutState::Succeeded);
    }

    #[tokio::test]
    async fn environment_frees_after_terminal_state() {
        let h = harness(FakeVerifier::healthy());
        let first = make_release(&h.store, "production", "aa");
        let second = make_release(&h.store, "production", "bb");

        let first_id = h.controller.start(&first).await.unwrap();
        wait_terminal(&h.store, &first_id).await;

        let second_id = h.controller.start(&second).await.unwrap();
        let rollout = wait_terminal(&h.store, &second_id).await;
        assert_eq!(rollout.state, RolloutState::Succeeded);
    }

    #[tokio::test]
    async fn failed_verification_rolls_back_to_anchor() {
        let h = harness(FakeVerifier::healthy());
        let good = make_release(&h.store, "production", "aa");
        let good_id = h.controller.start(&good).await.unwrap();
        wait_terminal(&h.store, &good_id).await;

        let bad = make_release(&h.store, "production", "bb");
        h.verifier.set_for_artifact(&bad.artifact.digest, false).await;

        let bad_id = h.controller.start(&bad).await.unwrap();
        let rollout = wait_terminal(&h.store, &bad_id).await;

        assert_eq!(rollout.state, RolloutState::RolledBack);
        let reason = rollout.failure_reason.clone().unwrap_or_default();
        assert!(reason.contains("verification failed"), "{reason}");

        // The fleet is back on the anchor's document.
        let applied = h.platform.applied_hashes("production").await;
        assert_eq!(applied.last(), Some(&good.target.content_hash()));

        // History: the failed rollout is recorded under its own id, and
        // the anchor is still the last success.
        let history = h.store.list_history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].outcome, Outcome::RolledBack);
        assert_eq!(history[1].rollout_id, bad_id);
        let anchor = h.store.last_successful("production").unwrap().unwrap();
        assert_eq!(anchor.release_seq, good.sequence);
    }

    #[tokio::test]
    async fn first_release_failure_has_no_anchor() {
        let h = harness(FakeVerifier::unhealthy());
        let release = make_release(&h.store, "production", "aa");

        let rollout_id = h.controller.start(&release).await.unwrap();
        let rollout = wait_terminal(&h.store, &rollout_id).await;

        // Failed, never RolledBack: there is nothing safe to restore.
        assert_eq!(rollout.state, RolloutState::Failed);
        let reason = rollout.failure_reason.clone().unwrap_or_default();
        assert!(reason.contains("no successful release"), "{reason}");

        let history = h.store.list_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, Outcome::Failed);
        assert!(h.store.last_successful("production").unwrap().is_none());
    }

    #[tokio::test]
    async fn transient_apply_failures_are_retried() {
        let h = harness(FakeVerifier::healthy());
        h.platform.fail_next_applies(2).await;
        let release = make_release(&h.store, "production", "aa");

        let rollout_id = h.controller.start(&release).await.unwrap();
        let rollout = wait_terminal(&h.store, &rollout_id).await;

        assert_eq!(rollout.state, RolloutState::Succeeded);
        assert_eq!(rollout.attempt_count, 3);
    }

    #[tokio::test]
    async fn apply_exhaustion_fails_without_anchor() {
        let h = harness(FakeVerifier::healthy());
        h.platform.fail_next_applies(10).await;
        let release = make_release(&h.store, "production", "aa");

        let rollout_id = h.controller.start(&release).await.unwrap();
        let rollout = wait_terminal(&h.store, &rollout_id).await;

        assert_eq!(rollout.state, RolloutState::Failed);
        let reason = rollout.failure_reason.clone().unwrap_or_default();
        assert!(reason.contains("apply failed after 3 attempts"), "{reason}");
    }

    #[tokio::test]
    async fn convergence_timeout_fails_rollback_when_platform_stuck() {
        let h = harness(FakeVerifier::healthy());
        let good = make_release(&h.store, "production", "aa");
        let good_id = h.controller.start(&good).await.unwrap();
        wait_terminal(&h.store, &good_id).await;

        // Nothing converges from here on, the new release or the restore.
        h.platform.set_stuck(true).await;
        let bad = make_release(&h.store, "production", "bb");
        let bad_id = h.controller.start(&bad).await.unwrap();
        let rollout = wait_terminal(&h.store, &bad_id).await;

        assert_eq!(rollout.state, RolloutState::Failed);
        let reason = rollout.failure_reason.clone().unwrap_or_default();
        assert!(reason.contains("convergence timeout"), "{reason}");
        assert!(reason.contains("rollback did not converge"), "{reason}");
    }

    #[tokio::test]
    async fn cancellation_rolls_back_to_anchor() {
        let h = harness(FakeVerifier::healthy());
        let good = make_release(&h.store, "production", "aa");
        let good_id = h.controller.start(&good).await.unwrap();
        wait_terminal(&h.store, &good_id).await;

        // Slow convergence leaves a window to cancel in.
        h.platform.converge_after(20).await;
        let next = make_release(&h.store, "production", "bb");
        let next_id = h.controller.start(&next).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(h.controller.cancel(&next_id).await.unwrap());
        let rollout = wait_terminal(&h.store, &next_id).await;

        assert_eq!(rollout.state, RolloutState::RolledBack);
        let reason = rollout.failure_reason.clone().unwrap_or_default();
        assert!(reason.contains("cancelled by operator"), "{reason}");

        let applied = h.platform.applied_hashes("production").await;
        assert_eq!(applied.last(), Some(&good.target.content_hash()));
    }

    #[tokio::test]
    async fn cancel_after_terminal_is_noop() {
        let h = harness(FakeVerifier::healthy());
        let release = make_release(&h.store, "production", "aa");
        let rollout_id = h.controller.start(&release).await.unwrap();
        wait_terminal(&h.store, &rollout_id).await;

        assert!(!h.controller.cancel(&rollout_id).await.unwrap());
        let rollout = h.store.get_rollout(&rollout_id).unwrap().unwrap();
        assert_eq!(rollout.state, RolloutState::Succeeded);
    }

    #[tokio::test]
    async fn cancel_unknown_rollout_errors() {
        let h = harness(FakeVerifier::healthy());
        let err = h.controller.cancel("ro-nope").await.unwrap_err();
        assert!(matches!(err, RolloutError::RolloutNotFound(_)));
    }

    #[tokio::test]
    async fn rollback_to_prior_release() {
        let h = harness(FakeVerifier::healthy());
        let first = make_release(&h.store, "production", "aa");
        let first_id = h.controller.start(&first).await.unwrap();
        wait_terminal(&h.store, &first_id).await;
        let second = make_release(&h.store, "production", "bb");
        let second_id = h.controller.start(&second).await.unwrap();
        wait_terminal(&h.store, &second_id).await;

        let rollback_id = h
            .controller
            .rollback_to(first.sequence, "production")
            .await
            .unwrap();
        let rollout = wait_terminal(&h.store, &rollback_id).await;

        assert_eq!(rollout.state, RolloutState::Succeeded);
        assert_eq!(rollout.release_seq, first.sequence);
        let applied = h.platform.applied_hashes("production").await;
        assert_eq!(applied.last(), Some(&first.target.content_hash()));
        assert_eq!(h.store.list_history().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn rollback_to_checks_environment() {
        let h = harness(FakeVerifier::healthy());
        let release = make_release(&h.store, "staging", "aa");
        let rollout_id = h.controller.start(&release).await.unwrap();
        wait_terminal(&h.store, &rollout_id).await;

        let err = h
            .controller
            .rollback_to(release.sequence, "production")
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::WrongEnvironment { .. }));

        let err = h.controller.rollback_to(999, "production").await.unwrap_err();
        assert!(matches!(err, RolloutError::ReleaseNotFound(999)));
    }

    #[tokio::test]
    async fn recover_settles_interrupted_rollouts() {
        let h = harness(FakeVerifier::healthy());
        let release = make_release(&h.store, "production", "aa");
        let orphan = Rollout {
            rollout_id: "ro-orphan".to_string(),
            release_seq: release.sequence,
            environment: "production".to_string(),
            state: RolloutState::Applying,
            attempt_count: 1,
            started_at: epoch_secs(),
            last_transition_at: epoch_secs(),
            failure_reason: None,
        };
        h.store.put_rollout(&orphan).unwrap();

        assert_eq!(h.controller.recover().unwrap(), 1);
        let settled = h.store.get_rollout("ro-orphan").unwrap().unwrap();
        assert_eq!(settled.state, RolloutState::Failed);
        assert!(
            settled
                .failure_reason
                .clone()
                .unwrap_or_default()
                .contains("interrupted")
        );
        assert_eq!(h.store.list_history().unwrap().len(), 1);

        // Idempotent: a second pass finds nothing to settle.
        assert_eq!(h.controller.recover().unwrap(), 0);
        assert_eq!(h.store.list_history().unwrap().len(), 1);

        // The environment is free again.
        let next = make_release(&h.store, "production", "bb");
        let next_id = h.controller.start(&next).await.unwrap();
        let rollout = wait_terminal(&h.store, &next_id).await;
        assert_eq!(rollout.state, RolloutState::Succeeded);
    }

    #[tokio::test]
    async fn stored_active_rollout_blocks_start() {
        let h = harness(FakeVerifier::healthy());
        let release = make_release(&h.store, "production", "aa");
        let orphan = Rollout {
            rollout_id: "ro-orphan".to_string(),
            release_seq: release.sequence,
            environment: "production".to_string(),
            state: RolloutState::Verifying,
            attempt_count: 1,
            started_at: epoch_secs(),
            last_transition_at: epoch_secs(),
            failure_reason: None,
        };
        h.store.put_rollout(&orphan).unwrap();

        let err = h.controller.start(&release).await.unwrap_err();
        assert!(matches!(err, RolloutError::Conflict { .. }));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(10);
        assert_eq!(backoff_delay(base, max, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, max, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, max, 3), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, max, 4), Duration::from_secs(8));
        assert_eq!(backoff_delay(base, max, 5), Duration::from_secs(10));
        assert_eq!(backoff_delay(base, max, 30), Duration::from_secs(10));
    }
}
