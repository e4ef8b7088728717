use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// Identity of a monitored endpoint. `slot` keeps repeated hosts apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId {
    pub slot: usize,
    pub host: String,
    pub interface: Option<String>,
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.interface {
            Some(iface) => write!(f, "#{} {}%{}", self.slot, self.host, iface),
            None => write!(f, "#{} {}", self.slot, self.host),
        }
    }
}

/// A host to probe plus its transmission parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Target {
    pub id: TargetId,
    /// `None` keeps probing until stopped.
    pub count: Option<u32>,
    pub size: usize,
    pub ttl: u8,
    /// Overall deadline for the probe run.
    pub timeout: Option<Duration>,
    pub interval: Duration,
    pub reply_timeout: Duration,
}

impl Target {
    pub const DEFAULT_SIZE: usize = 24;
    pub const DEFAULT_TTL: u8 = 64;
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

    pub fn new(slot: usize, host: impl Into<String>) -> Self {
        Self {
            id: TargetId {
                slot,
                host: host.into(),
                interface: None,
            },
            count: None,
            size: Self::DEFAULT_SIZE,
            ttl: Self::DEFAULT_TTL,
            timeout: None,
            interval: Self::DEFAULT_INTERVAL,
            reply_timeout: Self::DEFAULT_REPLY_TIMEOUT,
        }
    }

    pub fn host(&self) -> &str {
        &self.id.host
    }
}

/// Per-target health counters. At most one counter is non-zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthState {
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub action_running: bool,
}

/// Cumulative probe counters at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub packets_sent: u64,
    pub packets_recv: u64,
    /// Always 0 for the ICMP source: surge-ping hands each reply to a
    /// single waiting request and drops any repeat.
    pub packets_recv_duplicates: u64,
    /// Percentage in `[0, 100]`.
    pub packet_loss: f64,
    pub min_rtt: Duration,
    pub avg_rtt: Duration,
    pub max_rtt: Duration,
    pub std_dev_rtt: Duration,
    pub addr: Option<IpAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Directive {
    None,
    StartRemediation,
    StopRemediation,
}

/// One evaluation result, emitted for every sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectiveEvent {
    pub target: TargetId,
    pub timestamp: DateTime<Utc>,
    pub directive: Directive,
    pub health: HealthState,
    pub stats: StatisticsSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// How a monitor ended when probing did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    Completed,
    Cancelled,
}

/// Last directive event per target slot, as seen by the dispatcher.
#[derive(Debug, Default)]
pub struct MonitorState {
    pub last_events: BTreeMap<usize, DirectiveEvent>,
}
