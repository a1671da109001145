use axum::{Json, extract::State};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub disk_usage_percent: f64,
    pub queue_depth: usize,
    pub active_downloads: usize,
    pub total_jobs: usize,
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.queue.stats().await;

    Json(HealthResponse {
        status: "online",
        disk_usage_percent: state.disk.usage_percent(),
        queue_depth: stats.queue_depth,
        active_downloads: stats.active_downloads,
        total_jobs: stats.total_jobs,
    })
}
