// crates/server/src/routes/mod.rs
//! API route handlers for the cvsum server.

pub mod cv;
pub mod health;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET  /api/health - Health check
/// - POST /api/cv/summarize - Synchronous summarize (multipart)
/// - POST /api/cv/jobs - Submit an asynchronous job (multipart), 202 + job id
/// - GET  /api/cv/jobs/{job_id} - Current job snapshot
/// - GET  /api/cv/jobs/{job_id}/stream - SSE stream of job events
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", cv::router())
        .with_state(state)
}
