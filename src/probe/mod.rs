//! Probe sources feeding the health evaluator.
//!
//! A [`ProbeSource`] turns a [`Target`] into a running [`ProbeHandle`]. The
//! handle keeps a cumulative [`StatisticsSnapshot`] that may be read at any
//! time while [`ProbeHandle::run`] drives the packet stream on another task.

pub mod icmp;
#[cfg(test)]
pub mod scripted;
pub mod stats;

use std::future::Future;
use std::io;

use thiserror::Error;

use crate::models::{StatisticsSnapshot, Target};

pub use icmp::IcmpProbe;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("cannot resolve {host}: {reason}")]
    Unresolvable { host: String, reason: String },

    #[error("permission denied opening ICMP socket: {0}")]
    PermissionDenied(#[source] io::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

pub trait ProbeSource: Send + Sync + 'static {
    type Handle: ProbeHandle;

    /// Resolve the target and prepare a probe stream for it.
    fn start(&self, target: &Target) -> impl Future<Output = Result<Self::Handle, ProbeError>> + Send;
}

pub trait ProbeHandle: Send + Sync + 'static {
    /// Latest cumulative counters. Never blocks on the packet stream.
    fn statistics(&self) -> StatisticsSnapshot;

    /// Ask [`run`](Self::run) to return. Calling it again has no effect.
    fn stop(&self);

    /// Drive the stream until the packet count is exhausted, the overall
    /// timeout elapses, or [`stop`](Self::stop) is called.
    fn run(&self) -> impl Future<Output = Result<(), ProbeError>> + Send;
}
