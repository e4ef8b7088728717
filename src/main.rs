use anyhow::{bail, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{error, info};

mod api;
mod config;
mod engine;
mod error;
mod fleet;
mod health;
mod models;
mod probe;
mod remediation;
mod utils;

use crate::config::MonitorConfig;
use crate::fleet::Fleet;
use crate::models::MonitorState;
use crate::probe::IcmpProbe;
use crate::remediation::Dispatcher;

#[tokio::main]
async fn main() -> Result<()> {
    utils::setup_console();
    utils::init_tracing();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.json".to_string());
    let config = MonitorConfig::load(&config_path)?;
    let targets = config.targets();

    let state = Arc::new(Mutex::new(MonitorState::default()));
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let dispatcher = Dispatcher::new(Arc::clone(&state), config.webhook_url.clone())?;
    let dispatcher_task = tokio::spawn(dispatcher.run(events_rx));

    if let Some(port) = config.api_port {
        let state_for_api = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = api::start_server(port, state_for_api).await {
                error!("Status API failed: {:#}", e);
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received. Stopping all probes...");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    info!(
        targets = targets.len(),
        sample_interval_secs = config.sample_interval_secs,
        "NetPulse Guard starting"
    );
    let fleet = Fleet::new(Arc::new(IcmpProbe::new()), config.settings(), shutdown_rx)
        .with_directives(events_tx);
    let report = fleet.run(targets).await;
    drop(fleet);
    if let Err(e) = dispatcher_task.await {
        error!("Directive dispatcher ended abnormally: {}", e);
    }

    if !report.is_clean() {
        bail!("{}", report.summary());
    }
    info!("All targets finished");
    Ok(())
}
