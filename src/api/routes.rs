//! Route handlers

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::io::ReaderStream;

use super::{ApiError, AppState};
use crate::extractors::AudioFormat;
use crate::jobs::{JobId, JobRecord, JobState};
use crate::resolver::ContentId;
use crate::utils::{format_duration, format_file_size};
use crate::ProxyError;

/// Request body for POST /info and POST /download
#[derive(Debug, Deserialize)]
pub struct UrlRequest {
    pub url: String,
}

/// Job fields visible to polling clients
#[derive(Debug, Serialize)]
pub struct JobView {
    pub job_id: JobId,
    pub status: JobState,
    pub progress: f64,
    pub message: String,
    pub content_id: Option<ContentId>,
    pub title: Option<String>,
    pub filename: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<JobRecord> for JobView {
    fn from(job: JobRecord) -> Self {
        Self {
            job_id: job.job_id,
            status: job.state,
            progress: (job.progress * 10.0).round() / 10.0,
            message: job.status_message,
            content_id: job.content_id,
            title: job.title,
            filename: job.filename,
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
            finished_at: job.finished_at,
        }
    }
}

/// One entry of GET /list
#[derive(Debug, Serialize)]
pub struct FileEntry {
    pub filename: String,
    pub content_id: Option<ContentId>,
    pub size: u64,
    pub size_human: String,
    pub modified: DateTime<Utc>,
}

/// POST /info - metadata for a URL without downloading
pub async fn media_info(
    State(state): State<AppState>,
    payload: Result<Json<UrlRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    let info = state.service.info(&request.url).await?;
    let metadata = info.metadata;

    Ok(Json(json!({
        "success": true,
        "content_id": info.content_id,
        "title": metadata.title,
        "uploader": metadata.uploader.unwrap_or_else(|| "Unknown".to_string()),
        "duration": format_duration(metadata.duration),
        "duration_seconds": metadata.duration.unwrap_or(0),
        "thumbnail": metadata.thumbnail,
        "view_count": metadata.view_count.unwrap_or(0),
        "already_downloaded": info.already_downloaded,
        "filename": info.filename,
    })))
}

/// POST /download - start a background download
pub async fn start_download(
    State(state): State<AppState>,
    payload: Result<Json<UrlRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    let job_id = state.service.submit(&request.url)?;
    Ok(Json(json!({ "success": true, "job_id": job_id })))
}

/// GET /progress/:job_id - poll a job
pub async fn job_progress(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match state.service.tracker().get(&JobId::from(job_id)) {
        Some(job) => Json(JobView::from(job)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "status": "error", "error": "Invalid ID" })),
        )
            .into_response(),
    }
}

/// POST /cancel/:job_id - cancel a queued or running job
pub async fn cancel_job(State(state): State<AppState>, Path(job_id): Path<String>) -> impl IntoResponse {
    let cancelled = state.service.cancel(&JobId::from(job_id));
    Json(json!({ "success": cancelled }))
}

/// GET /jobs - every tracked job, newest first
pub async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    let jobs: Vec<JobView> = state
        .service
        .tracker()
        .list()
        .into_iter()
        .map(JobView::from)
        .collect();
    Json(json!({ "jobs": jobs }))
}

/// GET /list - finished files, newest first
pub async fn list_files(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let files: Vec<FileEntry> = state
        .service
        .list_artifacts()
        .map_err(ProxyError::from)?
        .into_iter()
        .map(|artifact| FileEntry {
            size_human: format_file_size(artifact.size),
            filename: artifact.filename,
            content_id: artifact.content_id,
            size: artifact.size,
            modified: artifact.modified,
        })
        .collect();
    Ok(Json(json!({ "files": files })))
}

/// GET /play/:filename - stream for in-browser playback
pub async fn play_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    stream_artifact(&state, &filename, "inline").await
}

/// GET /file/:filename - download as an attachment
pub async fn download_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    stream_artifact(&state, &filename, "attachment").await
}

/// DELETE /file/:filename
pub async fn delete_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.service.delete_artifact(&filename) {
        Ok(()) => Ok(Json(json!({ "success": true }))),
        Err(ProxyError::NotFound(_)) => Err(ApiError::not_found("File not found")),
        Err(e) => Err(e.into()),
    }
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_jobs": state.service.tracker().active_count(),
    }))
}

async fn stream_artifact(state: &AppState, filename: &str, disposition: &str) -> Result<Response, ApiError> {
    let path = state
        .service
        .storage()
        .resolve_artifact(filename)
        .map_err(|_| ApiError::not_found("File not found"))?;
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("File not found"))?;
    let size = file.metadata().await.map(|m| m.len()).ok();

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(AudioFormat::Mp3.mime_type()),
    );
    if let Some(size) = size {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    }
    if let Ok(value) = HeaderValue::from_str(&content_disposition(disposition, filename)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}

/// `inline`/`attachment` header with an ASCII fallback name and the exact UTF-8 name
fn content_disposition(disposition: &str, filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .map(|c| if c == '"' || c == '\\' { '_' } else { c })
        .collect();
    format!(
        "{}; filename=\"{}\"; filename*=UTF-8''{}",
        disposition,
        fallback,
        urlencoding::encode(filename)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_is_ascii() {
        let value = content_disposition("attachment", "Café song_abc12345678.mp3");
        assert!(value.starts_with("attachment; filename=\"Caf_ song_abc12345678.mp3\""));
        assert!(value.ends_with("filename*=UTF-8''Caf%C3%A9%20song_abc12345678.mp3"));
        assert!(HeaderValue::from_str(&value).is_ok());
    }
}
