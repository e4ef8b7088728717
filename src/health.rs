use serde::{Deserialize, Serialize};

use crate::models::{Directive, HealthState, StatisticsSnapshot};

pub const DEFAULT_FAILURE_LOSS_PERCENT: f64 = 80.0;
pub const DEFAULT_RECOVERY_LOSS_PERCENT: f64 = 20.0;
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_RECOVERY_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthPolicy {
    pub failure_loss_percent: f64,
    pub recovery_loss_percent: f64,
    /// Consecutive failing samples before remediation starts.
    pub failure_threshold: u32,
    /// Consecutive good samples before remediation is cleared.
    pub recovery_threshold: u32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failure_loss_percent: DEFAULT_FAILURE_LOSS_PERCENT,
            recovery_loss_percent: DEFAULT_RECOVERY_LOSS_PERCENT,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_threshold: DEFAULT_RECOVERY_THRESHOLD,
        }
    }
}

/// Loss between the recovery and failure bounds leaves the counters alone.
pub fn evaluate(
    policy: &HealthPolicy,
    state: HealthState,
    stats: &StatisticsSnapshot,
) -> (HealthState, Directive) {
    // NaN carries no signal; treat it like the dead-band.
    if stats.packet_loss.is_nan() {
        return (state, Directive::None);
    }
    let loss = stats.packet_loss.clamp(0.0, 100.0);
    let mut next = state;

    if loss >= policy.failure_loss_percent {
        next.consecutive_successes = 0;
        next.consecutive_failures = next.consecutive_failures.saturating_add(1);
        if next.consecutive_failures >= policy.failure_threshold && !next.action_running {
            next.action_running = true;
            return (next, Directive::StartRemediation);
        }
    } else if loss < policy.recovery_loss_percent {
        next.consecutive_failures = 0;
        next.consecutive_successes = next.consecutive_successes.saturating_add(1);
        if next.consecutive_successes >= policy.recovery_threshold && next.action_running {
            next.action_running = false;
            return (next, Directive::StopRemediation);
        }
    }

    (next, Directive::None)
}
