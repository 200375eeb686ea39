//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::directory::DirectoryStats;
use crate::router::RouterStatsSnapshot;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub connections: DirectoryStats,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: DirectoryStats,
    pub events: RouterStatsSnapshot,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        connections: state.directory.stats(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        connections: state.directory.stats(),
        events: state.router.stats(),
    })
}
