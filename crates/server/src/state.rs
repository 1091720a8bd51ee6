// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use cvsum_server_jobs::{JobExecutor, JobRegistry};

use crate::config::DEFAULT_MAX_UPLOAD_BYTES;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Spawns and supervises document jobs; owns the job registry.
    pub executor: JobExecutor,
    /// Upper bound on a multipart request body.
    pub max_upload_bytes: usize,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(executor: JobExecutor) -> Arc<Self> {
        Self::with_upload_limit(executor, DEFAULT_MAX_UPLOAD_BYTES)
    }

    pub fn with_upload_limit(executor: JobExecutor, max_upload_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            executor,
            max_upload_bytes,
        })
    }

    pub fn jobs(&self) -> &JobRegistry {
        self.executor.registry()
    }

    /// Get server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
