use std::net::IpAddr;
use std::time::Duration;

use crate::models::StatisticsSnapshot;

/// Running packet and round-trip counters for one probe stream.
///
/// Mean and variance are tracked with Welford's method so the snapshot
/// never has to keep every RTT around.
#[derive(Debug, Default)]
pub struct RttAccumulator {
    sent: u64,
    recv: u64,
    min: Option<Duration>,
    max: Duration,
    mean_secs: f64,
    m2: f64,
}

impl RttAccumulator {
    pub fn record_send(&mut self) {
        self.sent += 1;
    }

    pub fn record_reply(&mut self, rtt: Duration) {
        self.recv += 1;
        self.min = Some(self.min.map_or(rtt, |min| min.min(rtt)));
        self.max = self.max.max(rtt);

        let x = rtt.as_secs_f64();
        let delta = x - self.mean_secs;
        self.mean_secs += delta / self.recv as f64;
        self.m2 += delta * (x - self.mean_secs);
    }

    pub fn packet_loss(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        let lost = self.sent.saturating_sub(self.recv);
        lost as f64 / self.sent as f64 * 100.0
    }

    pub fn snapshot(&self, addr: Option<IpAddr>) -> StatisticsSnapshot {
        let std_dev = if self.recv > 0 {
            (self.m2 / self.recv as f64).sqrt()
        } else {
            0.0
        };
        StatisticsSnapshot {
            packets_sent: self.sent,
            packets_recv: self.recv,
            packets_recv_duplicates: 0,
            packet_loss: self.packet_loss(),
            min_rtt: self.min.unwrap_or_default(),
            avg_rtt: Duration::from_secs_f64(self.mean_secs.max(0.0)),
            max_rtt: self.max,
            std_dev_rtt: Duration::from_secs_f64(std_dev),
            addr,
        }
    }
}
