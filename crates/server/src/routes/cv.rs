// crates/server/src/routes/cv.rs
//! Document endpoints.
//!
//! - POST /cv/summarize — extract and answer in the request
//! - POST /cv/jobs — start a background job, 202 with its id
//! - GET /cv/jobs/{job_id} — current snapshot
//! - GET /cv/jobs/{job_id}/stream — SSE: `progress`, then one `result` or `failed`
//!
//! Both POST routes take multipart form data: `file` (a `.pdf` upload),
//! one `questions` field per question, and an optional `useMock` flag
//! (default `true`).

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use cvsum_core::text::normalize_questions;
use cvsum_core::{SummarizeResult, ValidationError};
use cvsum_server_jobs::JobProgress;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Body of a 202 from `POST /cv/jobs`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct JobCreatedResponse {
    pub job_id: String,
}

/// Raw multipart submission, before validation.
#[derive(Debug)]
pub struct CvUpload {
    pub filename: Option<String>,
    /// `None` when no `file` field was sent.
    pub document: Option<Vec<u8>>,
    pub questions: Vec<String>,
    pub use_mock: bool,
}

/// Submission that passed validation.
#[derive(Debug)]
pub struct ValidUpload {
    pub document: Vec<u8>,
    pub questions: Vec<String>,
    pub use_mock: bool,
}

impl CvUpload {
    pub async fn from_multipart(mut multipart: Multipart) -> ApiResult<Self> {
        let mut upload = CvUpload {
            filename: None,
            document: None,
            questions: Vec::new(),
            use_mock: true,
        };

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Could not read form data: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    upload.filename = field.file_name().map(str::to_string);
                    let bytes = field.bytes().await.map_err(|e| {
                        ApiError::BadRequest(format!("Could not read uploaded file: {e}"))
                    })?;
                    upload.document = Some(bytes.to_vec());
                }
                "questions" => {
                    let question = field.text().await.map_err(|e| {
                        ApiError::BadRequest(format!("Could not read question: {e}"))
                    })?;
                    upload.questions.push(question);
                }
                "useMock" => {
                    let raw = field.text().await.map_err(|e| {
                        ApiError::BadRequest(format!("Could not read useMock: {e}"))
                    })?;
                    upload.use_mock = parse_flag(&raw)?;
                }
                other => tracing::debug!(field = other, "ignoring unknown form field"),
            }
        }

        Ok(upload)
    }

    /// Questions are checked before the file.
    pub fn validate(self) -> Result<ValidUpload, ValidationError> {
        let questions = normalize_questions(self.questions)?;

        let document = match self.document {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => return Err(ValidationError::MissingDocument),
        };
        let filename = self.filename.unwrap_or_default();
        if !filename.to_lowercase().ends_with(".pdf") {
            return Err(ValidationError::UnsupportedDocument { filename });
        }

        Ok(ValidUpload {
            document,
            questions,
            use_mock: self.use_mock,
        })
    }
}

/// Accepts the usual spellings of a boolean form value; blank keeps the default.
fn parse_flag(raw: &str) -> ApiResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ApiError::BadRequest(format!(
            "useMock must be true or false (got {other:?})"
        ))),
    }
}

/// POST /api/cv/summarize
async fn summarize(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> ApiResult<Json<SummarizeResult>> {
    let upload = CvUpload::from_multipart(multipart).await?.validate()?;
    let result = state
        .executor
        .summarize_now(upload.document, upload.questions, upload.use_mock)
        .await?;
    Ok(Json(result))
}

/// POST /api/cv/jobs
async fn submit_job(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<JobCreatedResponse>)> {
    let upload = CvUpload::from_multipart(multipart).await?.validate()?;
    let job_id = state
        .executor
        .submit(upload.document, upload.questions, upload.use_mock)?;
    Ok((StatusCode::ACCEPTED, Json(JobCreatedResponse { job_id })))
}

/// GET /api/cv/jobs/{job_id}
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobProgress>> {
    Ok(Json(state.jobs().snapshot(&job_id)?))
}

/// GET /api/cv/jobs/{job_id}/stream
///
/// Ends after the terminal event. A client that disconnects early is
/// dropped from the job's subscribers on the next broadcast.
async fn stream_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let subscription = state.jobs().open_stream(&job_id)?;
    tracing::debug!(job_id = %job_id, "job stream opened");

    let stream = async_stream::stream! {
        let mut subscription = subscription;
        while let Some(event) = subscription.recv().await {
            match Event::default().event(event.name()).json_data(&event) {
                Ok(sse) => yield Ok(sse),
                Err(e) => tracing::error!(error = %e, job_id = %subscription.job_id(), "failed to encode job event"),
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Build the cv router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/cv/summarize", post(summarize))
        .route("/cv/jobs", post(submit_job))
        .route("/cv/jobs/{job_id}", get(get_job))
        .route("/cv/jobs/{job_id}/stream", get(stream_job))
}
