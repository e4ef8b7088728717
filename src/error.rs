use thiserror::Error;

use crate::models::TargetId;
use crate::probe::ProbeError;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("failed to start probing {target}: {source}")]
    Start {
        target: TargetId,
        source: ProbeError,
    },

    #[error("probing {target} failed: {source}")]
    Run {
        target: TargetId,
        source: ProbeError,
    },

    #[error("monitor for {0} was already started")]
    AlreadyStarted(TargetId),

    #[error("monitor task for {target} aborted: {reason}")]
    Aborted { target: TargetId, reason: String },
}

impl MonitorError {
    pub fn target(&self) -> &TargetId {
        match self {
            Self::Start { target, .. }
            | Self::Run { target, .. }
            | Self::Aborted { target, .. } => target,
            Self::AlreadyStarted(target) => target,
        }
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;
