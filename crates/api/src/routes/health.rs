//! Health Route

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    /// Incidents in the cache
    pub tracked_incidents: usize,
    /// Incidents still waiting for a problem ID
    pub unresolved_incidents: usize,
    pub custom_devices: usize,
}

/// Health check handler
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let incidents = state.controller.incidents().load().await;

    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        tracked_incidents: incidents.problems.len(),
        unresolved_incidents: incidents.unresolved().len(),
        custom_devices: state.controller.devices().devices().await.len(),
    })
}
