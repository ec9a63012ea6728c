//! Mapping of domain errors onto HTTP responses

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::ProxyError;

/// Error body `{success: false, error}` with a status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        let status = match &err {
            ProxyError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            ProxyError::AlreadyExists { .. } | ProxyError::AlreadyInProgress(_) => StatusCode::CONFLICT,
            ProxyError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::MetadataFetchFailed(_) | ProxyError::AllStrategiesFailed { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::TimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Cancelled => StatusCode::CONFLICT,
            ProxyError::TranscodeFailed(_) | ProxyError::Io(_) | ProxyError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {:#}", err);
        }
        Self::new(status, err.to_string())
    }
}

/// Malformed request bodies are the client's fault, whatever axum would say
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "success": false, "error": self.message }))).into_response()
    }
}
