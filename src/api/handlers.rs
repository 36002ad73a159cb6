use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::registry::{Target, TargetRegistry};
use crate::state::{StatusBoard, TargetState};

/// Application state shared across handlers
pub struct AppState {
    pub registry: Arc<TargetRegistry>,
    pub board: Arc<StatusBoard>,
    pub notifications_enabled: bool,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub targets: usize,
    pub notifications_enabled: bool,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        targets: state.registry.len(),
        notifications_enabled: state.notifications_enabled,
    })
}

// ============================================================================
// Targets
// ============================================================================

#[derive(Serialize)]
pub struct TargetView {
    pub name: String,
    pub address: String,
    pub protocol: String,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub failure_threshold: u32,
    #[serde(flatten)]
    pub state: TargetState,
}

impl TargetView {
    fn new(target: &Target, state: TargetState) -> Self {
        Self {
            name: target.name.clone(),
            address: target.address.clone(),
            protocol: target.protocol.to_string(),
            interval_ms: target.interval.as_millis() as u64,
            timeout_ms: target.timeout.as_millis() as u64,
            failure_threshold: target.failure_threshold,
            state,
        }
    }
}

#[derive(Serialize)]
pub struct TargetsResponse {
    pub targets: Vec<TargetView>,
}

/// All targets in registry order. Targets not checked yet report UNKNOWN.
pub async fn list_targets(State(state): State<Arc<AppState>>) -> Json<TargetsResponse> {
    let targets = state
        .registry
        .targets()
        .iter()
        .map(|t| TargetView::new(t, state.board.get(&t.name).unwrap_or_default()))
        .collect();

    Json(TargetsResponse { targets })
}

pub async fn get_target(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<TargetView>, ApiError> {
    let target = state
        .registry
        .get(&name)
        .ok_or_else(|| ApiError::NotFound(format!("Target '{}' not found", name)))?;

    let current = state.board.get(&name).unwrap_or_default();
    Ok(Json(TargetView::new(&target, current)))
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
