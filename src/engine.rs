use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{MonitorError, MonitorResult};
use crate::health::{evaluate, HealthPolicy};
use crate::models::{
    Directive, DirectiveEvent, HealthState, MonitorOutcome, MonitorStatus, StatisticsSnapshot,
    Target, TargetId,
};
use crate::probe::{ProbeError, ProbeHandle, ProbeSource};

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Receives one event per evaluation, `Directive::None` included.
pub type DirectiveSink = mpsc::UnboundedSender<DirectiveEvent>;

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub sample_interval: Duration,
    pub policy: HealthPolicy,
}

pub struct TargetMonitor<P: ProbeSource> {
    target: Target,
    source: Arc<P>,
    settings: MonitorSettings,
    state: Arc<Mutex<HealthState>>,
    status: watch::Sender<MonitorStatus>,
    shutdown: watch::Receiver<bool>,
    directives: Option<DirectiveSink>,
}

impl<P: ProbeSource> TargetMonitor<P> {
    pub fn new(
        target: Target,
        source: Arc<P>,
        settings: MonitorSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (status, _) = watch::channel(MonitorStatus::Idle);
        Self {
            target,
            source,
            settings,
            state: Arc::new(Mutex::new(HealthState::default())),
            status,
            shutdown,
            directives: None,
        }
    }

    pub fn with_directives(mut self, sink: DirectiveSink) -> Self {
        self.directives = Some(sink);
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn status(&self) -> MonitorStatus {
        *self.status.borrow()
    }

    pub async fn health(&self) -> HealthState {
        *self.state.lock().await
    }

    /// Run the monitor to a terminal state.
    pub async fn probe(&self) -> MonitorResult<MonitorOutcome> {
        let id = &self.target.id;

        let mut claimed = false;
        self.status.send_if_modified(|status| {
            if *status != MonitorStatus::Idle {
                return false;
            }
            *status = MonitorStatus::Running;
            claimed = true;
            true
        });
        if !claimed {
            return Err(MonitorError::AlreadyStarted(id.clone()));
        }

        let handle = match self.source.start(&self.target).await {
            Ok(handle) => Arc::new(handle),
            Err(source) => {
                self.status.send_replace(MonitorStatus::Failed);
                return Err(MonitorError::Start {
                    target: id.clone(),
                    source,
                });
            }
        };
        info!(
            target_id = %id,
            sample_interval_ms = self.settings.sample_interval.as_millis() as u64,
            "probing started"
        );

        let (done_tx, done_rx) = watch::channel(false);
        let sampler = Sampler {
            target: id.clone(),
            handle: Arc::clone(&handle),
            state: Arc::clone(&self.state),
            policy: self.settings.policy,
            directives: self.directives.clone(),
        };
        let sampler_task = tokio::spawn(sampler.run(self.settings.sample_interval, done_rx));

        let (result, cancelled) = self.drive(handle.as_ref()).await;

        let _ = done_tx.send(true);
        if let Err(e) = sampler_task.await {
            warn!(target_id = %id, error = %e, "sampler task ended abnormally");
        }
        log_summary(id, &handle.statistics());

        let (status, outcome) = match (result, cancelled) {
            (Ok(()), false) => (MonitorStatus::Completed, Ok(MonitorOutcome::Completed)),
            (Ok(()), true) => (MonitorStatus::Cancelled, Ok(MonitorOutcome::Cancelled)),
            (Err(source), _) => (
                MonitorStatus::Failed,
                Err(MonitorError::Run {
                    target: id.clone(),
                    source,
                }),
            ),
        };
        self.status.send_replace(status);
        info!(target_id = %id, ?status, "probing ended");
        outcome
    }

    /// Await the probe run, forwarding the first shutdown request as `stop`.
    async fn drive(&self, handle: &P::Handle) -> (Result<(), ProbeError>, bool) {
        let id = &self.target.id;
        let mut shutdown = self.shutdown.clone();
        let mut cancelled = false;

        if *shutdown.borrow_and_update() {
            info!(target_id = %id, "shutdown already requested, stopping probe");
            handle.stop();
            cancelled = true;
        }
        let mut listening = !cancelled;

        let run = handle.run();
        tokio::pin!(run);

        loop {
            tokio::select! {
                result = &mut run => return (result, cancelled),
                changed = shutdown.changed(), if listening => match changed {
                    Ok(()) => {
                        if *shutdown.borrow_and_update() {
                            info!(target_id = %id, "shutdown requested, stopping probe");
                            handle.stop();
                            cancelled = true;
                            listening = false;
                        }
                    }
                    // Sender gone: nobody can cancel us any more.
                    Err(_) => listening = false,
                },
            }
        }
    }
}

struct Sampler<H> {
    target: TargetId,
    handle: Arc<H>,
    state: Arc<Mutex<HealthState>>,
    policy: HealthPolicy,
    directives: Option<DirectiveSink>,
}

impl<H: ProbeHandle> Sampler<H> {
    async fn run(self, period: Duration, mut done: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                // Fires on `true` and when the sender is dropped.
                _ = done.changed() => break,
                _ = ticker.tick() => self.sample().await,
            }
        }
        debug!(target_id = %self.target, "sampler stopped");
    }

    async fn sample(&self) {
        let (stats, health, directive) = {
            let mut state = self.state.lock().await;
            let stats = self.handle.statistics();
            let (next, directive) = evaluate(&self.policy, *state, &stats);
            *state = next;
            (stats, next, directive)
        };

        match directive {
            Directive::StartRemediation => error!(
                target_id = %self.target,
                loss = stats.packet_loss,
                failures = health.consecutive_failures,
                "loss threshold crossed, starting remediation"
            ),
            Directive::StopRemediation => warn!(
                target_id = %self.target,
                loss = stats.packet_loss,
                successes = health.consecutive_successes,
                "target recovered, stopping remediation"
            ),
            Directive::None => debug!(
                target_id = %self.target,
                loss = stats.packet_loss,
                sent = stats.packets_sent,
                successes = health.consecutive_successes,
                failures = health.consecutive_failures,
                "sample evaluated"
            ),
        }

        if let Some(sink) = &self.directives {
            let _ = sink.send(DirectiveEvent {
                target: self.target.clone(),
                timestamp: Utc::now(),
                directive,
                health,
                stats,
            });
        }
    }
}

fn log_summary(id: &TargetId, stats: &StatisticsSnapshot) {
    let addr = stats
        .addr
        .map_or_else(|| id.host.clone(), |addr| addr.to_string());
    info!(
        target_id = %id,
        sent = stats.packets_sent,
        received = stats.packets_recv,
        duplicates = stats.packets_recv_duplicates,
        loss = stats.packet_loss,
        "--- {} ping statistics --- min/avg/max/stddev = {:?}/{:?}/{:?}/{:?}",
        addr,
        stats.min_rtt,
        stats.avg_rtt,
        stats.max_rtt,
        stats.std_dev_rtt
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::scripted::{Script, ScriptedProbe};

    fn settings() -> MonitorSettings {
        MonitorSettings {
            sample_interval: Duration::from_secs(1),
            policy: HealthPolicy::default(),
        }
    }

    fn monitor(
        probe: &Arc<ScriptedProbe>,
        host: &str,
        shutdown: watch::Receiver<bool>,
    ) -> (TargetMonitor<ScriptedProbe>, mpsc::UnboundedReceiver<DirectiveEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let monitor = TargetMonitor::new(Target::new(0, host), Arc::clone(probe), settings(), shutdown)
            .with_directives(tx);
        (monitor, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<DirectiveEvent>) -> Vec<DirectiveEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn loss_sequence_triggers_and_clears_remediation() {
        let losses = [90.0, 85.0, 95.0, 10.0, 10.0, 10.0, 10.0, 10.0];
        let probe = Arc::new(
            ScriptedProbe::default().with("a", Script::losses(&losses, Some(Duration::from_millis(8500)))),
        );
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (monitor, mut rx) = monitor(&probe, "a", shutdown_rx);

        let outcome = monitor.probe().await.unwrap();
        assert_eq!(outcome, MonitorOutcome::Completed);
        assert_eq!(monitor.status(), MonitorStatus::Completed);

        let directives: Vec<Directive> = drain(&mut rx).iter().map(|e| e.directive).collect();
        assert_eq!(
            directives,
            vec![
                Directive::None,
                Directive::None,
                Directive::StartRemediation,
                Directive::None,
                Directive::None,
                Directive::None,
                Directive::None,
                Directive::StopRemediation,
            ]
        );

        let health = monitor.health().await;
        assert!(!health.action_running);
        assert_eq!(health.consecutive_successes, 5);
        assert_eq!(health.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn events_carry_target_and_state() {
        let probe = Arc::new(
            ScriptedProbe::default().with("a", Script::losses(&[100.0], Some(Duration::from_millis(3500)))),
        );
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (monitor, mut rx) = monitor(&probe, "a", shutdown_rx);
        monitor.probe().await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        let last = events.last().unwrap();
        assert_eq!(last.target, monitor.target().id);
        assert_eq!(last.directive, Directive::StartRemediation);
        assert!(last.health.action_running);
        assert_eq!(last.health.consecutive_failures, 3);
        assert_eq!(last.stats.packet_loss, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_shutdown_cancels_once() {
        let probe = Arc::new(ScriptedProbe::default().with("a", Script::losses(&[0.0], None)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (monitor, mut rx) = monitor(&probe, "a", shutdown_rx);
        let monitor = Arc::new(monitor);

        let task = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            async move { monitor.probe().await }
        });

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(monitor.status(), MonitorStatus::Running);
        shutdown_tx.send(true).unwrap();
        let _ = shutdown_tx.send(true);

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, MonitorOutcome::Cancelled);
        assert_eq!(monitor.status(), MonitorStatus::Cancelled);
        assert_eq!(probe.stop_calls("a"), 1);
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_before_start_cancels_immediately() {
        let probe = Arc::new(ScriptedProbe::default().with("a", Script::losses(&[0.0], None)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();
        let (monitor, mut rx) = monitor(&probe, "a", shutdown_rx);

        let outcome = monitor.probe().await.unwrap();
        assert_eq!(outcome, MonitorOutcome::Cancelled);
        assert_eq!(probe.stop_calls("a"), 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sampler_stops_when_run_ends() {
        let probe = Arc::new(
            ScriptedProbe::default().with("a", Script::losses(&[0.0], Some(Duration::from_millis(2500)))),
        );
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (monitor, mut rx) = monitor(&probe, "a", shutdown_rx);

        monitor.probe().await.unwrap();
        assert_eq!(drain(&mut rx).len(), 2);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(monitor.health().await.consecutive_successes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn start_failure_skips_sampling() {
        let probe = Arc::new(ScriptedProbe::default().with("a", Script::FailStart));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (monitor, mut rx) = monitor(&probe, "a", shutdown_rx);

        let err = monitor.probe().await.unwrap_err();
        assert!(matches!(err, MonitorError::Start { .. }));
        assert_eq!(err.target(), &monitor.target().id);
        assert_eq!(monitor.status(), MonitorStatus::Failed);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(monitor.health().await, HealthState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn run_error_fails_monitor() {
        let probe = Arc::new(ScriptedProbe::default().with(
            "a",
            Script::Run {
                losses: vec![90.0],
                run_for: Some(Duration::from_millis(3500)),
                run_error: Some("link down".into()),
            },
        ));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (monitor, mut rx) = monitor(&probe, "a", shutdown_rx);

        let err = monitor.probe().await.unwrap_err();
        assert!(matches!(err, MonitorError::Run { .. }));
        assert!(err.to_string().contains("link down"));
        assert_eq!(monitor.status(), MonitorStatus::Failed);
        assert_eq!(drain(&mut rx).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_runs_only_once() {
        let probe = Arc::new(
            ScriptedProbe::default().with("a", Script::losses(&[0.0], Some(Duration::from_millis(500)))),
        );
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (monitor, _rx) = monitor(&probe, "a", shutdown_rx);

        monitor.probe().await.unwrap();
        let err = monitor.probe().await.unwrap_err();
        assert!(matches!(err, MonitorError::AlreadyStarted(_)));
        assert_eq!(monitor.status(), MonitorStatus::Completed);
    }
}
