use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::{
    AppState,
    handlers::{files, health, jobs},
};

/// Create all v1 API routes
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        // Job submission and polling
        .route("/jobs", post(jobs::submit_job_handler))
        .route("/jobs/{id}", get(jobs::job_status_handler))
        // Retained output files
        .route("/files", get(files::list_files_handler))
        .route("/files/purge", post(files::purge_files_handler))
        .route("/files/{name}", get(files::fetch_file_handler))
        .route("/files/{name}", delete(files::delete_file_handler))
        // Probes
        .route("/health", get(health::health_handler))
}
