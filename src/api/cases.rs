//! Case management API endpoints.
//!
//! Provides endpoints for managing monitored cases:
//! - List and add cases
//! - Remove a case
//! - Trigger an immediate check
//! - Toggle notifications

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::case::{MonitoredCase, Priority};
use crate::monitor::CheckOutcome;
use crate::store::StoredEntry;

use super::routes::{error_response, AppState};

/// Create case routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_cases))
        .route("/", post(add_case))
        .route("/:number", delete(remove_case))
        .route("/:number/check", post(check_case))
        .route("/:number/notifications", put(set_notifications))
}

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AddCaseRequest {
    pub case_number: String,
    pub court_id: String,
    /// Defaults to medium
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Deserialize)]
pub struct NotificationsRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_recent_limit")]
    pub limit: usize,
}

fn default_recent_limit() -> usize {
    20
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn list_cases(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<MonitoredCase>>, (StatusCode, String)> {
    state
        .monitor
        .list_cases()
        .await
        .map(Json)
        .map_err(error_response)
}

async fn add_case(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddCaseRequest>,
) -> Result<(StatusCode, Json<MonitoredCase>), (StatusCode, String)> {
    let case = state
        .monitor
        .add_case(&req.case_number, &req.court_id, req.priority)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(case)))
}

async fn remove_case(
    State(state): State<Arc<AppState>>,
    Path(number): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .monitor
        .remove_case(&number)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn check_case(
    State(state): State<Arc<AppState>>,
    Path(number): Path<String>,
) -> Result<Json<CheckOutcome>, (StatusCode, String)> {
    state
        .monitor
        .force_check(&number, Utc::now())
        .await
        .map(Json)
        .map_err(error_response)
}

async fn set_notifications(
    State(state): State<Arc<AppState>>,
    Path(number): Path<String>,
    Json(req): Json<NotificationsRequest>,
) -> Result<Json<MonitoredCase>, (StatusCode, String)> {
    state
        .monitor
        .set_notifications(&number, req.enabled)
        .await
        .map(Json)
        .map_err(error_response)
}

pub(super) async fn recent_entries(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<StoredEntry>>, (StatusCode, String)> {
    state
        .monitor
        .store()
        .recent_entries(query.limit.min(500))
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
