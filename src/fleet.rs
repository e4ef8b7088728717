use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::engine::{DirectiveSink, MonitorSettings, TargetMonitor};
use crate::error::{MonitorError, MonitorResult};
use crate::models::{MonitorOutcome, Target, TargetId};
use crate::probe::ProbeSource;

#[derive(Debug)]
pub struct TargetReport {
    pub target: TargetId,
    pub result: MonitorResult<MonitorOutcome>,
}

#[derive(Debug, Default)]
pub struct FleetReport {
    pub targets: Vec<TargetReport>,
}

impl FleetReport {
    pub fn failures(&self) -> impl Iterator<Item = &MonitorError> {
        self.targets.iter().filter_map(|t| t.result.as_ref().err())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn summary(&self) -> String {
        format!("{} of {} targets failed", self.failures().count(), self.targets.len())
    }
}

pub struct Fleet<P: ProbeSource> {
    source: Arc<P>,
    settings: MonitorSettings,
    shutdown: watch::Receiver<bool>,
    directives: Option<DirectiveSink>,
}

impl<P: ProbeSource> Fleet<P> {
    pub fn new(source: Arc<P>, settings: MonitorSettings, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            source,
            settings,
            shutdown,
            directives: None,
        }
    }

    pub fn with_directives(mut self, sink: DirectiveSink) -> Self {
        self.directives = Some(sink);
        self
    }

    /// Each failure is logged as soon as its target ends.
    pub async fn run(&self, targets: Vec<Target>) -> FleetReport {
        info!(targets = targets.len(), "fleet monitoring started");
        let mut tasks = FuturesUnordered::new();

        for target in targets {
            let id = target.id.clone();
            let mut monitor = TargetMonitor::new(
                target,
                Arc::clone(&self.source),
                self.settings.clone(),
                self.shutdown.clone(),
            );
            if let Some(sink) = &self.directives {
                monitor = monitor.with_directives(sink.clone());
            }

            let handle = tokio::spawn(async move {
                let result = monitor.probe().await;
                let health = monitor.health().await;
                debug!(
                    target_id = %monitor.target().id,
                    status = ?monitor.status(),
                    ?health,
                    "monitor terminal"
                );
                result
            });
            tasks.push(async move {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(MonitorError::Aborted {
                        target: id.clone(),
                        reason: e.to_string(),
                    }),
                };
                TargetReport { target: id, result }
            });
        }

        let mut reports = Vec::with_capacity(tasks.len());
        while let Some(report) = tasks.next().await {
            match &report.result {
                Ok(outcome) => info!(target_id = %report.target, ?outcome, "target finished"),
                Err(e) => error!(target_id = %report.target, error = %e, "target failed"),
            }
            reports.push(report);
        }
        reports.sort_by_key(|r| r.target.slot);

        FleetReport { targets: reports }
    }
}
