use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::engine::{MonitorSettings, DEFAULT_SAMPLE_INTERVAL};
use crate::health::HealthPolicy;
use crate::models::Target;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitorConfig {
    pub targets: Vec<TargetConfig>,
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,
    #[serde(default)]
    pub policy: HealthPolicy,
    pub webhook_url: Option<String>,
    /// `null` disables the status API.
    #[serde(default = "default_api_port")]
    pub api_port: Option<u16>,
}

fn default_sample_interval_secs() -> u64 { DEFAULT_SAMPLE_INTERVAL.as_secs() }
fn default_api_port() -> Option<u16> { Some(3000) }

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TargetConfig {
    /// Hostname, IP address, or CIDR block expanded to its hosts.
    pub host: String,
    #[serde(default)]
    pub interface: Option<String>,
    /// Packets to send; `null` probes until interrupted.
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default = "default_size")]
    pub size: usize,
    #[serde(default = "default_ttl")]
    pub ttl: u8,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
}

fn default_size() -> usize { Target::DEFAULT_SIZE }
fn default_ttl() -> u8 { Target::DEFAULT_TTL }
fn default_interval_ms() -> u64 { 1000 }
fn default_reply_timeout_ms() -> u64 { 1000 }

impl MonitorConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.targets.is_empty(), "at least one target is required");
        ensure!(self.sample_interval_secs > 0, "sample_interval_secs must be positive");

        let p = &self.policy;
        ensure!(p.failure_threshold > 0, "policy.failure_threshold must be positive");
        ensure!(p.recovery_threshold > 0, "policy.recovery_threshold must be positive");
        for (name, value) in [
            ("failure_loss_percent", p.failure_loss_percent),
            ("recovery_loss_percent", p.recovery_loss_percent),
        ] {
            ensure!(
                (0.0..=100.0).contains(&value),
                "policy.{name} must be within 0..=100, got {value}"
            );
        }
        ensure!(
            p.recovery_loss_percent <= p.failure_loss_percent,
            "policy.recovery_loss_percent ({}) exceeds failure_loss_percent ({})",
            p.recovery_loss_percent,
            p.failure_loss_percent
        );

        for target in &self.targets {
            ensure!(!target.host.trim().is_empty(), "target host must not be empty");
            ensure!(target.interval_ms > 0, "{}: interval_ms must be positive", target.host);
            ensure!(target.reply_timeout_ms > 0, "{}: reply_timeout_ms must be positive", target.host);
            ensure!(target.count != Some(0), "{}: count must be positive or null", target.host);
        }
        Ok(())
    }

    pub fn settings(&self) -> MonitorSettings {
        MonitorSettings {
            sample_interval: Duration::from_secs(self.sample_interval_secs),
            policy: self.policy,
        }
    }

    /// Expand the configured entries into slotted targets.
    pub fn targets(&self) -> Vec<Target> {
        let mut targets = Vec::new();
        for entry in &self.targets {
            let hosts = if let Ok(net) = entry.host.parse::<IpNet>() {
                net.hosts().map(|ip| ip.to_string()).collect::<Vec<_>>()
            } else {
                vec![entry.host.clone()]
            };
            for host in hosts {
                let target = entry.to_target(targets.len(), host);
                targets.push(target);
            }
        }
        targets
    }
}

impl TargetConfig {
    fn to_target(&self, slot: usize, host: String) -> Target {
        let mut target = Target::new(slot, host);
        target.id.interface = self.interface.clone().filter(|iface| !iface.is_empty());
        target.count = self.count;
        target.size = self.size;
        target.ttl = self.ttl;
        target.timeout = self.timeout_ms.map(Duration::from_millis);
        target.interval = Duration::from_millis(self.interval_ms);
        target.reply_timeout = Duration::from_millis(self.reply_timeout_ms);
        target
    }
}
