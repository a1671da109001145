use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use riptide_core::{JobSnapshot, validate::validate_source_url};

use crate::{
    AppState,
    errors::{AppError, AppResult},
};

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(default)]
    pub url: String,
}

/// Submit a URL for extraction.
///
/// Validation failures are rejected before anything is queued; the disk
/// guard runs (with one sweep attempt) before admission.
pub async fn submit_job_handler(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> AppResult<impl IntoResponse> {
    let url = validate_source_url(&request.url, &state.config.extractor.allowed_hosts)?;

    state.disk.check_admission(&state.sweeper).await?;

    let admission = state.queue.submit(url.to_string()).await?;
    info!(
        "accepted job {} at queue position {}",
        admission.job_id, admission.queue_position
    );

    Ok((StatusCode::ACCEPTED, Json(admission)))
}

/// Poll a job's current state.
///
/// Side effect: a terminal record older than the staleness horizon is
/// evicted by this read, after which the id answers 404.
pub async fn job_status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<JobSnapshot>> {
    let job_id = Uuid::parse_str(&id)
        .map_err(|_| AppError::not_found(format!("No job with id {id}")))?;

    match state.queue.status(job_id).await {
        Some(snapshot) => Ok(Json(snapshot)),
        None => Err(AppError::not_found(format!("No job with id {id}"))),
    }
}
