//! # Server Module
//!
//! Read-only HTTP surface for the keeper: liveness and the last cycle record.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::config::ExecutionMode;
use crate::keeper::Observer;
use crate::routes::health::{ping, status};

/// Application state shared across all route handlers
pub struct AppState {
    pub observer: Arc<Observer>,
    pub mode: ExecutionMode,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/status", get(status))
        .with_state(state)
}

/// Serve the health routes on `0.0.0.0:port` until `shutdown` fires.
pub async fn start(port: u16, state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind health server to {}", addr))?;

    tracing::info!("📡 Listening on http://{}", addr);
    tracing::info!("🏥 Health check available at http://{}/ping", addr);
    tracing::info!("📊 Keeper status available at http://{}/status", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("Health server failed")
}
