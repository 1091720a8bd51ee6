// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cvsum_core::{EngineError, ExtractionError, ValidationError};
use cvsum_server_jobs::JobError;
use serde::Serialize;
use thiserror::Error;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => Self::JobNotFound(id),
            JobError::Validation(e) => Self::Validation(e),
            JobError::Extraction(e) => Self::Extraction(e),
            JobError::Engine(e) => Self::Engine(e),
            JobError::ShuttingDown => Self::Unavailable(JobError::ShuttingDown.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::JobNotFound(id) => {
                tracing::warn!(job_id = %id, "Job not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Job not found.", format!("Job ID: {id}")),
                )
            }
            ApiError::Validation(e) => {
                tracing::warn!(error = %e, "Rejected submission");
                (StatusCode::BAD_REQUEST, ErrorResponse::new(e.to_string()))
            }
            ApiError::Extraction(e) => {
                tracing::warn!(error = %e, "Text extraction failed");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Could not parse PDF file.", e.to_string()),
                )
            }
            ApiError::Engine(e) if e.is_timeout() => {
                tracing::error!(error = %e, "Inference timed out");
                (StatusCode::GATEWAY_TIMEOUT, ErrorResponse::new(e.to_string()))
            }
            ApiError::Engine(e) => {
                tracing::error!(error = %e, "Inference failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_details("Inference failed", e.to_string()),
                )
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", msg.clone()),
                )
            }
            ApiError::Unavailable(msg) => {
                tracing::warn!(message = %msg, "Service unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, ErrorResponse::new(msg.clone()))
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
