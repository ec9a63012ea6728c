//! HTTP server
//!
//! Thin JSON layer over [`AcquisitionService`]. Downloads run in the background;
//! clients poll `/progress/:job_id` and fetch the finished file from `/file/:filename`.

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::{AcquisitionService, Result};

mod error;
pub mod routes;
mod state;

pub use error::ApiError;
pub use state::AppState;

/// Create the router
///
/// - `POST /info` - metadata for a URL
/// - `POST /download` - start a download, returns a job id
/// - `GET /progress/:job_id` - poll a job
/// - `POST /cancel/:job_id` - cancel a job
/// - `GET /jobs` - all tracked jobs
/// - `GET /list` - finished files
/// - `GET /play/:filename` - stream inline
/// - `GET /file/:filename` - download as attachment
/// - `DELETE /file/:filename` - delete a file
/// - `GET /health` - health check
pub fn create_router(service: AcquisitionService) -> Router {
    Router::new()
        .route("/info", post(routes::media_info))
        .route("/download", post(routes::start_download))
        .route("/progress/:job_id", get(routes::job_progress))
        .route("/cancel/:job_id", post(routes::cancel_job))
        .route("/jobs", get(routes::list_jobs))
        .route("/list", get(routes::list_files))
        .route("/play/:filename", get(routes::play_file))
        .route(
            "/file/:filename",
            get(routes::download_file).delete(routes::delete_file),
        )
        .route("/health", get(routes::health_check))
        .with_state(AppState::new(service))
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve until `shutdown` resolves
pub async fn serve<F>(service: AcquisitionService, addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, create_router(service))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::testing::{Behavior, FakeStrategy};
    use crate::storage::Storage;
    use crate::transcode::{MockTranscoder, Transcoder};
    use crate::worker::ServiceOptions;
    use crate::StrategyChain;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_service(dir: &TempDir, behavior: Behavior) -> AcquisitionService {
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_transcode()
            .returning(|_, output, _| fs_err::write(output, b"mp3 data").map_err(Into::into));
        let transcoder: Arc<dyn Transcoder> = Arc::new(transcoder);

        let chain = StrategyChain::new(Duration::from_secs(5))
            .with_strategy(Box::new(FakeStrategy::new("fake", behavior)));
        AcquisitionService::new(Storage::new(dir.path()), chain, transcoder, ServiceOptions::default())
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>, axum::http::HeaderMap) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec(), headers)
    }

    fn json(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let app = create_router(test_service(&dir, Behavior::Succeed));

        let (status, body, _) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["status"], "ok");
    }

    #[tokio::test]
    async fn test_unknown_job_is_invalid_id() {
        let dir = TempDir::new().unwrap();
        let app = create_router(test_service(&dir, Behavior::Succeed));

        let (status, body, _) = send(&app, Method::GET, "/progress/does-not-exist", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let body = json(&body);
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "Invalid ID");
    }

    #[tokio::test]
    async fn test_download_rejects_bad_url() {
        let dir = TempDir::new().unwrap();
        let app = create_router(test_service(&dir, Behavior::Succeed));

        let request = serde_json::json!({ "url": "https://vimeo.com/123" });
        let (status, body, _) = send(&app, Method::POST, "/download", Some(request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["success"], false);
    }

    #[tokio::test]
    async fn test_malformed_body_is_json_error() {
        let dir = TempDir::new().unwrap();
        let app = create_router(test_service(&dir, Behavior::Succeed));

        for uri in ["/info", "/download"] {
            let (status, body, _) = send(&app, Method::POST, uri, Some(serde_json::json!({ "link": "x" }))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            let body = json(&body);
            assert_eq!(body["success"], false);
            assert!(body["error"].as_str().unwrap().contains("url"), "{}", body);
        }

        let request = Request::builder()
            .method(Method::POST)
            .uri("/download")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(json(&bytes)["success"], false);
    }

    #[tokio::test]
    async fn test_download_poll_and_fetch() {
        let dir = TempDir::new().unwrap();
        let service = test_service(&dir, Behavior::Succeed);
        let app = create_router(service.clone());

        let request = serde_json::json!({ "url": "https://youtu.be/abc12345678?list=PL123&index=2" });
        let (status, body, _) = send(&app, Method::POST, "/download", Some(request.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let job_id = json(&body)["job_id"].as_str().unwrap().to_string();

        let mut progress = Value::Null;
        for _ in 0..500 {
            let (_, body, _) = send(&app, Method::GET, &format!("/progress/{}", job_id), None).await;
            progress = json(&body);
            if progress["status"] == "succeeded" || progress["status"] == "failed" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(progress["status"], "succeeded");
        assert_eq!(progress["progress"], 100.0);
        let filename = progress["filename"].as_str().unwrap().to_string();
        assert_eq!(filename, "fake title_abc12345678.mp3");

        let (status, _, _) = send(&app, Method::POST, "/download", Some(request)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body, _) = send(&app, Method::GET, "/list", None).await;
        assert_eq!(status, StatusCode::OK);
        let files = json(&body)["files"].as_array().unwrap().clone();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0]["content_id"], "abc12345678");
        assert_eq!(files[0]["size_human"], "8 B");

        let encoded = urlencoding::encode(&filename).into_owned();
        let (status, body, headers) = send(&app, Method::GET, &format!("/file/{}", encoded), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"mp3 data");
        assert_eq!(headers[header::CONTENT_TYPE], "audio/mpeg");
        assert!(headers[header::CONTENT_DISPOSITION].to_str().unwrap().starts_with("attachment;"));

        let (_, _, headers) = send(&app, Method::GET, &format!("/play/{}", encoded), None).await;
        assert!(headers[header::CONTENT_DISPOSITION].to_str().unwrap().starts_with("inline;"));

        let (status, _, _) = send(&app, Method::DELETE, &format!("/file/{}", encoded), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body, _) = send(&app, Method::DELETE, &format!("/file/{}", encoded), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json(&body)["error"], "File not found");
    }

    #[tokio::test]
    async fn test_file_routes_reject_hidden_names() {
        let dir = TempDir::new().unwrap();
        fs_err::write(dir.path().join(".audioproxy-index.json"), b"{}").unwrap();
        let app = create_router(test_service(&dir, Behavior::Succeed));

        let (status, _, _) = send(&app, Method::GET, "/file/.audioproxy-index.json", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, _) = send(&app, Method::GET, "/play/..%2Fsecret.mp3", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_file_routes_ignore_non_artifacts() {
        let dir = TempDir::new().unwrap();
        fs_err::write(dir.path().join("stray.part"), b"partial").unwrap();
        fs_err::write(dir.path().join("notes.txt"), b"notes").unwrap();
        let app = create_router(test_service(&dir, Behavior::Succeed));

        for name in ["stray.part", "notes.txt"] {
            let (status, _, _) = send(&app, Method::GET, &format!("/file/{}", name), None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", name);
            let (status, _, _) = send(&app, Method::DELETE, &format!("/file/{}", name), None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", name);
            assert!(dir.path().join(name).exists());
        }
    }

    #[tokio::test]
    async fn test_info_and_cancel() {
        let dir = TempDir::new().unwrap();
        let app = create_router(test_service(&dir, Behavior::Hang));

        let request = serde_json::json!({ "url": "https://www.youtube.com/watch?v=abc12345678" });
        let (status, body, _) = send(&app, Method::POST, "/download", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        let job_id = json(&body)["job_id"].as_str().unwrap().to_string();

        let (_, body, _) = send(&app, Method::POST, &format!("/cancel/{}", job_id), None).await;
        assert_eq!(json(&body)["success"], true);

        let (_, body, _) = send(&app, Method::GET, "/jobs", None).await;
        assert_eq!(json(&body)["jobs"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_info_reports_metadata() {
        let dir = TempDir::new().unwrap();
        let app = create_router(test_service(&dir, Behavior::Succeed));

        let request = serde_json::json!({ "url": "https://youtu.be/abc12345678" });
        let (status, body, _) = send(&app, Method::POST, "/info", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["success"], true);
        assert_eq!(body["title"], "fake title");
        assert_eq!(body["duration"], "00:00");
        assert_eq!(body["already_downloaded"], false);
    }
}
