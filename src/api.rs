use axum::{
    extract::State,
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::models::{DirectiveEvent, MonitorState};

pub async fn get_targets(State(state): State<Arc<Mutex<MonitorState>>>) -> Json<Vec<DirectiveEvent>> {
    let state = state.lock().await;
    Json(state.last_events.values().cloned().collect())
}

pub fn create_router(state: Arc<Mutex<MonitorState>>) -> Router {
    Router::new()
        .route("/api/targets", get(get_targets))
        .with_state(state)
}

pub async fn start_server(port: u16, state: Arc<Mutex<MonitorState>>) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Status API: http://localhost:{}/api/targets", addr.port());
    axum::serve(listener, app).await?;
    Ok(())
}
