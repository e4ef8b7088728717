use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::models::{Directive, DirectiveEvent, MonitorState};

pub struct Dispatcher {
    state: Arc<Mutex<MonitorState>>,
    webhook_url: Option<String>,
    http_client: reqwest::Client,
}

impl Dispatcher {
    pub fn new(state: Arc<Mutex<MonitorState>>, webhook_url: Option<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            state,
            webhook_url,
            http_client,
        })
    }

    /// Drain events until every sender is gone.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<DirectiveEvent>) {
        while let Some(event) = events.recv().await {
            self.process(event).await;
        }
        info!("directive stream closed");
    }

    async fn process(&self, event: DirectiveEvent) {
        self.state
            .lock()
            .await
            .last_events
            .insert(event.target.slot, event.clone());

        match event.directive {
            Directive::None => return,
            Directive::StartRemediation => info!(target_id = %event.target, "remediation requested"),
            Directive::StopRemediation => info!(target_id = %event.target, "remediation released"),
        }

        if let Some(url) = &self.webhook_url {
            self.send_webhook(url, &event).await;
        }
    }

    async fn send_webhook(&self, url: &str, event: &DirectiveEvent) {
        let payload = webhook_payload(event);
        match self.http_client.post(url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(target_id = %event.target, "webhook delivered");
            }
            Ok(resp) => warn!(target_id = %event.target, status = %resp.status(), "webhook rejected"),
            Err(e) => warn!(target_id = %event.target, error = %e, "webhook delivery failed"),
        }
    }
}

fn webhook_payload(event: &DirectiveEvent) -> serde_json::Value {
    let (title, color) = match event.directive {
        Directive::StartRemediation => ("Remediation Started", 0xE74C3C),
        _ => ("Remediation Cleared", 0x2ECC71),
    };
    let stats = &event.stats;
    serde_json::json!({
        "username": "NetPulse Guard",
        "embeds": [{
            "title": title,
            "color": color,
            "fields": [
                { "name": "Target", "value": event.target.to_string(), "inline": true },
                { "name": "Address", "value": stats.addr.map_or("N/A".to_string(), |a| a.to_string()), "inline": true },
                { "name": "Packet Loss", "value": format!("{:.1}%", stats.packet_loss), "inline": true },
                { "name": "Sent / Received", "value": format!("{} / {}", stats.packets_sent, stats.packets_recv), "inline": true },
                { "name": "Avg RTT", "value": format!("{:.2}ms", stats.avg_rtt.as_secs_f64() * 1000.0), "inline": true },
                { "name": "Streak", "value": format!(
                    "{} failures / {} successes",
                    event.health.consecutive_failures,
                    event.health.consecutive_successes
                ), "inline": false }
            ],
            "timestamp": event.timestamp.to_rfc3339(),
            "footer": { "text": format!("NetPulse Guard - sent {}", Utc::now().to_rfc3339()) }
        }]
    })
}
