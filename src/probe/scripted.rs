//! Scripted probe source for exercising monitors without raw sockets.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::{ProbeError, ProbeHandle, ProbeSource};
use crate::models::{StatisticsSnapshot, Target};

#[derive(Debug, Clone)]
pub enum Script {
    /// `start` fails as if the host did not resolve.
    FailStart,
    /// Each `statistics` call yields the next loss value; the last one repeats.
    Run {
        losses: Vec<f64>,
        /// `None` runs until stopped.
        run_for: Option<Duration>,
        run_error: Option<String>,
    },
}

impl Script {
    pub fn losses(losses: &[f64], run_for: Option<Duration>) -> Self {
        Self::Run {
            losses: losses.to_vec(),
            run_for,
            run_error: None,
        }
    }
}

/// Probe source keyed by host name.
#[derive(Default)]
pub struct ScriptedProbe {
    scripts: Mutex<HashMap<String, Script>>,
    stop_calls: Mutex<HashMap<String, Arc<AtomicUsize>>>,
}

impl ScriptedProbe {
    pub fn with(self, host: &str, script: Script) -> Self {
        self.scripts.lock().insert(host.to_string(), script);
        self
    }

    /// Number of `stop` calls received by handles for `host`.
    pub fn stop_calls(&self, host: &str) -> usize {
        self.stop_calls
            .lock()
            .get(host)
            .map_or(0, |calls| calls.load(Ordering::SeqCst))
    }
}

impl ProbeSource for ScriptedProbe {
    type Handle = ScriptedHandle;

    async fn start(&self, target: &Target) -> Result<ScriptedHandle, ProbeError> {
        let script = self.scripts.lock().get(target.host()).cloned();
        match script {
            None | Some(Script::FailStart) => Err(ProbeError::Unresolvable {
                host: target.host().to_string(),
                reason: "no such host".into(),
            }),
            Some(Script::Run {
                losses,
                run_for,
                run_error,
            }) => {
                let stop_calls = Arc::clone(
                    self.stop_calls
                        .lock()
                        .entry(target.host().to_string())
                        .or_default(),
                );
                let (stop_tx, _) = watch::channel(false);
                Ok(ScriptedHandle {
                    losses: Mutex::new(losses.into()),
                    samples: AtomicU64::new(0),
                    run_for,
                    run_error,
                    stop_tx,
                    stop_calls,
                })
            }
        }
    }
}

pub struct ScriptedHandle {
    losses: Mutex<VecDeque<f64>>,
    samples: AtomicU64,
    run_for: Option<Duration>,
    run_error: Option<String>,
    stop_tx: watch::Sender<bool>,
    stop_calls: Arc<AtomicUsize>,
}

impl ProbeHandle for ScriptedHandle {
    fn statistics(&self) -> StatisticsSnapshot {
        let mut losses = self.losses.lock();
        let loss = if losses.len() > 1 {
            losses.pop_front().unwrap_or_default()
        } else {
            losses.front().copied().unwrap_or_default()
        };
        let sent = self.samples.fetch_add(1, Ordering::SeqCst) + 1;
        StatisticsSnapshot {
            packets_sent: sent,
            packet_loss: loss,
            ..Default::default()
        }
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.stop_tx.send_replace(true);
    }

    async fn run(&self) -> Result<(), ProbeError> {
        let mut stopped = self.stop_tx.subscribe();
        if *stopped.borrow_and_update() {
            return Ok(());
        }
        let finished = async {
            match self.run_for {
                Some(run_for) => tokio::time::sleep(run_for).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = stopped.changed() => Ok(()),
            _ = finished => match &self.run_error {
                Some(msg) => Err(ProbeError::Transport(msg.clone())),
                None => Ok(()),
            },
        }
    }
}
