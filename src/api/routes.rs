//! Router construction and server lifecycle.

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::monitor::{CaseMonitor, MonitorError};

use super::cases;
use super::stats;

/// Shared application state.
pub struct AppState {
    pub monitor: Arc<CaseMonitor>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(monitor: Arc<CaseMonitor>) -> Self {
        Self {
            monitor,
            started_at: Instant::now(),
        }
    }
}

/// Map monitor errors onto HTTP statuses.
pub(super) fn error_response(e: MonitorError) -> (StatusCode, String) {
    let status = match &e {
        MonitorError::UnknownCase(_) => StatusCode::NOT_FOUND,
        MonitorError::InvalidCase(_) => StatusCode::BAD_REQUEST,
        MonitorError::Store(_) | MonitorError::Budget(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!("Request failed: {}", e);
    }
    (status, e.to_string())
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub cases: usize,
    pub persistent: bool,
}

async fn health(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, (StatusCode, String)> {
    let cases = state
        .monitor
        .list_cases()
        .await
        .map_err(error_response)?
        .len();
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        cases,
        persistent: state.monitor.store().is_persistent(),
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .nest("/api/cases", cases::routes())
        .route("/api/entries/recent", get(cases::recent_entries))
        .nest("/api/stats", stats::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server; returns once `shutdown` flips to `true`.
pub async fn serve(
    state: Arc<AppState>,
    addr: &str,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Dashboard listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;

    Ok(())
}

/// Wait for SIGINT/SIGTERM, then flip `shutdown`.
pub async fn shutdown_signal(shutdown: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping...");
    let _ = shutdown.send(true);
}
