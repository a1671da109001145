use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::header::{self, HeaderValue},
    response::Response,
};
use serde::Serialize;
use serde_json::{Value, json};
use tokio_util::io::ReaderStream;
use tracing::info;

use riptide_core::{FileEntry, validate::safe_output_path};

use crate::{
    AppState,
    errors::{AppError, AppResult},
};

#[derive(Debug, Serialize)]
struct FileView {
    #[serde(flatten)]
    entry: FileEntry,
    url: String,
}

/// Pure listing of retained files, newest first. Eviction belongs to the
/// sweeper, never to this read.
pub async fn list_files_handler(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let files: Vec<FileView> = state
        .sweeper
        .list()
        .await?
        .into_iter()
        .map(|entry| FileView {
            url: format!("/api/v1/files/{}", entry.name),
            entry,
        })
        .collect();

    Ok(Json(json!({ "files": files })))
}

/// Stream one retained file as an audio attachment.
///
/// The name is neutralized before it touches the filesystem; a file swept
/// away between listing and retrieval answers 404, not a broken stream.
pub async fn fetch_file_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Response> {
    let path = safe_output_path(&state.config.storage.download_dir, &name)?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| AppError::not_found(format!("No file named {name}")))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|_| AppError::not_found(format!("No file named {name}")))?;

    let disposition =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", name.replace('"', "'")))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    let response = Response::builder()
        .header(header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"))
        .header(header::CONTENT_LENGTH, metadata.len())
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| AppError::internal(e.to_string()))?;

    Ok(response)
}

/// Delete one retained file.
pub async fn delete_file_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<Value>> {
    safe_output_path(&state.config.storage.download_dir, &name)?;
    state.sweeper.remove(&name).await?;

    Ok(Json(json!({ "success": true })))
}

/// Delete every retained file; reports how many went.
pub async fn purge_files_handler(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let deleted = state.sweeper.purge().await?;
    info!("purge removed {deleted} files");

    Ok(Json(json!({
        "success": true,
        "deleted_count": deleted,
    })))
}
