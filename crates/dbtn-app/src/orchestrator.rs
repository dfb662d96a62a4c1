//! Deploy orchestration
//!
//! One button release becomes one attempt:
//!
//! ```text
//! Idle → Triggering ─┬→ Queued → Monitoring ─┬→ Succeeded
//!                    ├→ AlreadyBuilding       ├→ Failed
//!                    └→ Failed                ├→ TimedOut
//!                                             └→ Cancelled
//! ```
//!
//! Only one attempt can be in Triggering at a time. Monitoring runs as a
//! tracked background task bound to the CI client that queued the build; a
//! CI configuration change cancels it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use dbtn_ci::{CiApi, CiClientFactory};
use dbtn_core::prelude::*;
use dbtn_core::{CiConfig, CueEvent, DeployAttempt, DeployOutcome, EventBus, UiEvent};

use crate::cue::CueSink;

pub const STATUS_SUCCESS: &str = "SUCCESS";
pub const STATUS_FAILURE: &str = "FAILURE";
pub const STATUS_ERROR: &str = "ERROR";

/// Polling limits for one monitored build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorTimings {
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub timeout: Duration,
}

impl Default for MonitorTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_polls: 120,
            timeout: Duration::from_secs(60 * 60),
        }
    }
}

/// What a trigger resolved to, plus the monitoring task when a build was queued
#[derive(Debug)]
pub struct TriggerOutcome {
    pub attempt: DeployAttempt,
    pub monitor: Option<JoinHandle<DeployAttempt>>,
}

/// The live CI client and the token its monitors observe
struct ClientBinding<C> {
    client: Arc<C>,
    config: CiConfig,
    cancel: CancellationToken,
}

/// Held while an attempt is Triggering; clears the flag on drop
struct TriggerGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> TriggerGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for TriggerGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Drives deploy attempts through a CI backend
pub struct DeployOrchestrator<F: CiClientFactory, S> {
    factory: F,
    cues: Arc<S>,
    events: EventBus,
    timings: MonitorTimings,
    binding: RwLock<ClientBinding<F::Client>>,
    triggering: AtomicBool,
    next_attempt: AtomicU64,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl<F, S> DeployOrchestrator<F, S>
where
    F: CiClientFactory,
    S: CueSink + Send + Sync + 'static,
{
    pub fn new(
        factory: F,
        config: CiConfig,
        cues: Arc<S>,
        events: EventBus,
        timings: MonitorTimings,
    ) -> Result<Self> {
        let client = factory.create(&config)?;
        let shutdown = CancellationToken::new();
        let binding = ClientBinding {
            client: Arc::new(client),
            config,
            cancel: shutdown.child_token(),
        };

        Ok(Self {
            factory,
            cues,
            events,
            timings,
            binding: RwLock::new(binding),
            triggering: AtomicBool::new(false),
            next_attempt: AtomicU64::new(0),
            tracker: TaskTracker::new(),
            shutdown,
        })
    }

    /// Whether an attempt currently holds the trigger guard
    pub fn is_triggering(&self) -> bool {
        self.triggering.load(Ordering::Acquire)
    }

    /// Configuration the current client was built from
    pub async fn ci_config(&self) -> CiConfig {
        self.binding.read().await.config.clone()
    }

    /// Start a trigger in the background without waiting for it
    pub fn spawn_trigger(self: &Arc<Self>) -> JoinHandle<TriggerOutcome> {
        let this = Arc::clone(self);
        self.tracker.spawn(async move { this.trigger().await })
    }

    /// Play a cue on the tracker so shutdown waits for it
    pub fn play_cue(self: &Arc<Self>, cue: CueEvent) -> JoinHandle<()> {
        let cues = Arc::clone(&self.cues);
        self.tracker.spawn(async move { cues.play(cue).await })
    }

    /// Run one attempt up to the point where monitoring starts
    pub async fn trigger(self: &Arc<Self>) -> TriggerOutcome {
        let attempt_id = self.next_attempt.fetch_add(1, Ordering::Relaxed) + 1;
        // Stamped at the release, before any CI round trip
        let attempt = DeployAttempt::new(attempt_id, DeployOutcome::Queued);

        let Some(guard) = TriggerGuard::acquire(&self.triggering) else {
            info!("Attempt {}: a trigger is already in progress", attempt_id);
            return self
                .not_queued(attempt.with_outcome(DeployOutcome::AlreadyBuilding))
                .await;
        };

        let (client, config, cancel) = {
            let binding = self.binding.read().await;
            (
                Arc::clone(&binding.client),
                binding.config.clone(),
                binding.cancel.clone(),
            )
        };

        if !config.is_complete() {
            let err = Error::ci_config_invalid("base URL or build configuration id is missing");
            warn!("Attempt {}: {}", attempt_id, err);
            return self
                .not_queued(attempt.with_outcome(DeployOutcome::Failed))
                .await;
        }

        if client.is_queued_or_running().await {
            info!("Attempt {}: a build is already queued or running", attempt_id);
            return self
                .not_queued(attempt.with_outcome(DeployOutcome::AlreadyBuilding))
                .await;
        }

        let build_id = match client.trigger_build().await {
            Ok(build_id) => build_id,
            Err(e) => {
                if e.is_recoverable() {
                    warn!("Attempt {}: CI server unreachable: {}", attempt_id, e);
                } else {
                    error!("Attempt {}: trigger rejected: {}", attempt_id, e);
                }
                return self
                    .not_queued(attempt.with_outcome(DeployOutcome::Failed))
                    .await;
            }
        };

        let attempt = attempt.with_build_id(build_id.clone());
        info!("Attempt {}: build {} queued", attempt_id, build_id);
        self.publish(&attempt);
        self.cues.play(CueEvent::BuildQueued).await;

        drop(guard);

        let monitor = self.tracker.spawn(Arc::clone(self).monitor(
            client,
            attempt.clone(),
            cancel,
        ));

        TriggerOutcome {
            attempt,
            monitor: Some(monitor),
        }
    }

    async fn not_queued(&self, attempt: DeployAttempt) -> TriggerOutcome {
        self.publish(&attempt);
        self.cues.play(CueEvent::BuildNotQueued).await;
        TriggerOutcome {
            attempt,
            monitor: None,
        }
    }

    async fn monitor(
        self: Arc<Self>,
        client: Arc<F::Client>,
        attempt: DeployAttempt,
        cancel: CancellationToken,
    ) -> DeployAttempt {
        let build_id = attempt.build_id.clone().unwrap_or_default();
        let timings = self.timings.clone();
        let deadline = Instant::now() + timings.timeout;
        let mut polls = 0u32;

        let outcome = loop {
            polls += 1;
            let status = tokio::select! {
                biased;
                _ = cancel.cancelled() => break DeployOutcome::Cancelled,
                _ = tokio::time::sleep_until(deadline) => break DeployOutcome::TimedOut,
                status = client.get_build_status(&build_id) => status,
            };

            match status.as_deref() {
                Some(STATUS_SUCCESS) => break DeployOutcome::Succeeded,
                Some(STATUS_FAILURE) | Some(STATUS_ERROR) => break DeployOutcome::Failed,
                Some(other) => trace!("Build {} status {} (poll {})", build_id, other, polls),
                None => trace!("Build {} status unavailable (poll {})", build_id, polls),
            }

            if polls >= timings.max_polls {
                break DeployOutcome::TimedOut;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break DeployOutcome::Cancelled,
                _ = tokio::time::sleep_until(deadline) => break DeployOutcome::TimedOut,
                _ = tokio::time::sleep(timings.poll_interval) => {}
            }
        };

        let resolved = attempt.with_outcome(outcome);
        self.publish(&resolved);

        match outcome {
            DeployOutcome::Succeeded => {
                info!("Build {} succeeded after {} poll(s)", build_id, polls);
                self.cues.play(CueEvent::BuildSucceeded).await;
            }
            DeployOutcome::Failed => {
                info!("Build {} failed", build_id);
                self.cues.play(CueEvent::BuildFailed).await;
            }
            DeployOutcome::TimedOut => {
                warn!("{} after {} poll(s)", Error::ci_timeout(build_id.as_str()), polls);
                self.cues.play(CueEvent::BuildFailed).await;
            }
            DeployOutcome::Cancelled => {
                info!("Stopped monitoring build {}", build_id);
            }
            DeployOutcome::Queued | DeployOutcome::AlreadyBuilding => {}
        }

        resolved
    }

    /// Swap in a client for `config`, cancelling monitors bound to the old one.
    ///
    /// Returns false when `config` equals the current one.
    pub async fn apply_ci_config(&self, config: CiConfig) -> Result<bool> {
        let mut binding = self.binding.write().await;
        if binding.config == config {
            return Ok(false);
        }

        let client = self.factory.create(&config)?;
        binding.cancel.cancel();
        *binding = ClientBinding {
            client: Arc::new(client),
            config,
            cancel: self.shutdown.child_token(),
        };

        info!("CI configuration changed; client replaced");
        Ok(true)
    }

    /// Wait for every trigger and monitor task started so far
    #[cfg(test)]
    pub(crate) async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancel all monitoring and wait for tracked tasks to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        debug!("Deploy orchestrator stopped");
    }

    fn publish(&self, attempt: &DeployAttempt) {
        self.events.publish(UiEvent::BuildStatusChanged {
            attempt: attempt.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbtn_ci::test_utils::StubCi;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCues(Mutex<Vec<CueEvent>>);

    impl RecordingCues {
        fn played(&self) -> Vec<CueEvent> {
            self.0.lock().unwrap().clone()
        }

        fn count(&self, cue: CueEvent) -> usize {
            self.played().iter().filter(|c| **c == cue).count()
        }
    }

    impl CueSink for RecordingCues {
        async fn play(&self, cue: CueEvent) {
            self.0.lock().unwrap().push(cue);
        }
    }

    fn ci_config(base_url: &str) -> CiConfig {
        CiConfig {
            base_url: base_url.to_string(),
            build_configuration_id: "Deploy".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
        }
    }

    fn fast_timings() -> MonitorTimings {
        MonitorTimings {
            poll_interval: Duration::from_secs(5),
            max_polls: 4,
            timeout: Duration::from_secs(3600),
        }
    }

    type TestOrchestrator = DeployOrchestrator<StubCi, RecordingCues>;

    fn orchestrator(
        stub: &StubCi,
        config: CiConfig,
        timings: MonitorTimings,
    ) -> (Arc<TestOrchestrator>, Arc<RecordingCues>, EventBus) {
        let cues = Arc::new(RecordingCues::default());
        let events = EventBus::new();
        let orch = DeployOrchestrator::new(
            stub.clone(),
            config,
            Arc::clone(&cues),
            events.clone(),
            timings,
        )
        .unwrap();
        (Arc::new(orch), cues, events)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_third_poll() {
        let stub = StubCi::new();
        stub.push_status(Some("QUEUED"));
        stub.push_status(None);
        stub.push_status(Some("SUCCESS"));
        let (orch, cues, _) = orchestrator(&stub, ci_config("http://ci"), fast_timings());

        let outcome = orch.trigger().await;
        assert_eq!(outcome.attempt.outcome, DeployOutcome::Queued);
        assert_eq!(outcome.attempt.build_id.as_deref(), Some("100"));

        let resolved = outcome.monitor.unwrap().await.unwrap();
        assert_eq!(resolved.outcome, DeployOutcome::Succeeded);
        assert_eq!(resolved.attempt_id, outcome.attempt.attempt_id);
        assert!(stub.status_poll_count() <= 3);
        assert_eq!(cues.played(), vec![CueEvent::BuildQueued, CueEvent::BuildSucceeded]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_status_plays_failure_cue() {
        let stub = StubCi::new();
        stub.push_status(Some("ERROR"));
        let (orch, cues, _) = orchestrator(&stub, ci_config("http://ci"), fast_timings());

        let resolved = orch.trigger().await.monitor.unwrap().await.unwrap();
        assert_eq!(resolved.outcome, DeployOutcome::Failed);
        assert_eq!(cues.count(CueEvent::BuildFailed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_running_times_out_after_ceiling() {
        let stub = StubCi::new();
        let (orch, cues, _) = orchestrator(&stub, ci_config("http://ci"), fast_timings());

        let resolved = orch.trigger().await.monitor.unwrap().await.unwrap();
        assert_eq!(resolved.outcome, DeployOutcome::TimedOut);
        assert_eq!(stub.status_poll_count(), 4);
        assert_eq!(cues.count(CueEvent::BuildFailed), 1);
        assert_eq!(cues.count(CueEvent::BuildSucceeded), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absolute_timeout_stops_polling() {
        let stub = StubCi::new();
        let timings = MonitorTimings {
            poll_interval: Duration::from_secs(5),
            max_polls: 1000,
            timeout: Duration::from_secs(12),
        };
        let (orch, cues, _) = orchestrator(&stub, ci_config("http://ci"), timings);

        let resolved = orch.trigger().await.monitor.unwrap().await.unwrap();
        assert_eq!(resolved.outcome, DeployOutcome::TimedOut);
        // Polls at t=0, 5, 10; the deadline at 12 wins over the next sleep
        assert_eq!(stub.status_poll_count(), 3);
        assert_eq!(cues.count(CueEvent::BuildFailed), 1);
    }

    #[tokio::test]
    async fn test_missing_build_configuration_never_triggers() {
        let stub = StubCi::new();
        let mut config = ci_config("http://ci");
        config.build_configuration_id = String::new();
        let (orch, cues, _) = orchestrator(&stub, config, fast_timings());

        let outcome = orch.trigger().await;
        assert_eq!(outcome.attempt.outcome, DeployOutcome::Failed);
        assert!(outcome.monitor.is_none());
        assert_eq!(stub.trigger_calls(), 0);
        assert_eq!(stub.queue_checks(), 0);
        assert_eq!(cues.played(), vec![CueEvent::BuildNotQueued]);
    }

    #[tokio::test]
    async fn test_busy_server_resolves_already_building() {
        let stub = StubCi::new();
        stub.set_busy(true);
        let (orch, cues, _) = orchestrator(&stub, ci_config("http://ci"), fast_timings());

        let outcome = orch.trigger().await;
        assert_eq!(outcome.attempt.outcome, DeployOutcome::AlreadyBuilding);
        assert_eq!(stub.trigger_calls(), 0);
        assert_eq!(cues.played(), vec![CueEvent::BuildNotQueued]);
        assert!(!orch.is_triggering());
    }

    #[tokio::test]
    async fn test_trigger_error_is_terminal() {
        let stub = StubCi::new();
        stub.fail_trigger("agent pool offline");
        let (orch, cues, _) = orchestrator(&stub, ci_config("http://ci"), fast_timings());

        let outcome = orch.trigger().await;
        assert_eq!(outcome.attempt.outcome, DeployOutcome::Failed);
        assert!(outcome.monitor.is_none());
        assert_eq!(cues.played(), vec![CueEvent::BuildNotQueued]);
        assert!(!orch.is_triggering());
    }

    #[tokio::test]
    async fn test_concurrent_triggers_enqueue_once() {
        let stub = StubCi::new();
        let gate = stub.hold_triggers();
        let (orch, cues, _) = orchestrator(&stub, ci_config("http://ci"), fast_timings());

        let first = orch.spawn_trigger();
        while stub.trigger_calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(orch.is_triggering());

        let mut others = Vec::new();
        for _ in 0..4 {
            others.push(orch.spawn_trigger());
        }
        for handle in others {
            let outcome = handle.await.unwrap();
            assert_eq!(outcome.attempt.outcome, DeployOutcome::AlreadyBuilding);
        }

        gate.notify_one();
        let outcome = first.await.unwrap();
        assert_eq!(outcome.attempt.outcome, DeployOutcome::Queued);
        assert_eq!(stub.trigger_calls(), 1);
        assert_eq!(cues.count(CueEvent::BuildNotQueued), 4);
        assert_eq!(cues.count(CueEvent::BuildQueued), 1);

        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_attempt_is_stamped_before_the_trigger_returns() {
        let stub = StubCi::new();
        let gate = stub.hold_triggers();
        let (orch, _, _) = orchestrator(&stub, ci_config("http://ci"), fast_timings());

        let handle = orch.spawn_trigger();
        while stub.trigger_calls() == 0 {
            tokio::task::yield_now().await;
        }
        let held_at = chrono::Utc::now();
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_one();

        let outcome = handle.await.unwrap();
        assert_eq!(outcome.attempt.outcome, DeployOutcome::Queued);
        assert!(outcome.attempt.started_at <= held_at);

        orch.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_released_once_monitoring_starts() {
        let stub = StubCi::new();
        let (orch, _, _) = orchestrator(&stub, ci_config("http://ci"), fast_timings());

        let first = orch.trigger().await;
        assert!(first.monitor.is_some());
        assert!(!orch.is_triggering());

        // Server still reports no queued build, so a second trigger goes through
        let second = orch.trigger().await;
        assert_eq!(second.attempt.outcome, DeployOutcome::Queued);
        assert!(second.attempt.attempt_id > first.attempt.attempt_id);
        assert_eq!(stub.trigger_calls(), 2);

        orch.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_swap_cancels_monitor_without_cue() {
        let stub = StubCi::new();
        let (orch, cues, _) = orchestrator(&stub, ci_config("http://old"), fast_timings());

        let outcome = orch.trigger().await;
        let monitor = outcome.monitor.unwrap();

        // Let the first poll happen, then swap mid-wait
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(stub.status_polls(), vec!["http://old".to_string()]);

        assert!(orch.apply_ci_config(ci_config("http://new")).await.unwrap());
        let resolved = monitor.await.unwrap();

        assert_eq!(resolved.outcome, DeployOutcome::Cancelled);
        assert_eq!(cues.played(), vec![CueEvent::BuildQueued]);
        assert!(stub.status_polls().iter().all(|url| url == "http://old"));
        assert_eq!(orch.ci_config().await.base_url, "http://new");
        assert_eq!(stub.created_configs().len(), 2);
    }

    #[tokio::test]
    async fn test_apply_same_config_is_noop() {
        let stub = StubCi::new();
        let (orch, _, _) = orchestrator(&stub, ci_config("http://ci"), fast_timings());

        assert!(!orch.apply_ci_config(ci_config("http://ci")).await.unwrap());
        assert_eq!(stub.created_configs().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_resolution_is_published() {
        let stub = StubCi::new();
        stub.push_status(Some("SUCCESS"));
        let (orch, _, events) = orchestrator(&stub, ci_config("http://ci"), fast_timings());
        let mut rx = events.subscribe();

        orch.trigger().await.monitor.unwrap().await.unwrap();

        let mut outcomes = Vec::new();
        while let Ok(UiEvent::BuildStatusChanged { attempt }) = rx.try_recv() {
            outcomes.push(attempt.outcome);
        }
        assert_eq!(outcomes, vec![DeployOutcome::Queued, DeployOutcome::Succeeded]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_monitoring() {
        let stub = StubCi::new();
        let (orch, cues, _) = orchestrator(&stub, ci_config("http://ci"), fast_timings());

        let monitor = orch.trigger().await.monitor.unwrap();
        orch.shutdown().await;

        assert_eq!(monitor.await.unwrap().outcome, DeployOutcome::Cancelled);
        assert_eq!(cues.count(CueEvent::BuildFailed), 0);
    }
}
