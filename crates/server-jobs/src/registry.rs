// crates/server-jobs/src/registry.rs
//! Concurrent store of job records keyed by id.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::JobError;
use crate::state::{JobState, Subscription};
use crate::types::{JobId, JobProgress};

/// Owns every job for the lifetime of the process (or until evicted).
/// Callers hold job ids, never references into the map.
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<JobId, Arc<JobState>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh `Queued` job under a new unique id.
    pub fn create(&self) -> Arc<JobState> {
        let id = Uuid::new_v4().to_string();
        let state = Arc::new(JobState::new(id.clone()));
        self.jobs.insert(id, Arc::clone(&state));
        state
    }

    pub fn get(&self, id: &str) -> Option<Arc<JobState>> {
        self.jobs.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn snapshot(&self, id: &str) -> Result<JobProgress, JobError> {
        self.get(id)
            .map(|state| state.snapshot())
            .ok_or_else(|| JobError::not_found(id))
    }

    /// Subscribe to a job's events; `NotFound` for unknown ids.
    pub fn open_stream(&self, id: &str) -> Result<Subscription, JobError> {
        // Clone the Arc out so the shard lock is not held while subscribing.
        let state = self.get(id).ok_or_else(|| JobError::not_found(id))?;
        Ok(state.subscribe())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Drop jobs that finished more than `ttl` ago. Returns how many were removed.
    pub fn evict_finished(&self, ttl: Duration) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, state| match state.finished_at() {
            Some(finished) => finished.elapsed() < ttl,
            None => true,
        });
        let removed = before.saturating_sub(self.jobs.len());
        if removed > 0 {
            tracing::info!(removed, remaining = self.jobs.len(), "evicted finished jobs");
        }
        removed
    }

    /// Background sweep running `evict_finished(ttl)` every `every` until
    /// `shutdown` fires.
    pub fn spawn_eviction_loop(
        self: Arc<Self>,
        ttl: Duration,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(every) => {}
                }
                self.evict_finished(ttl);
                tracing::debug!(jobs = self.len(), "job eviction sweep done");
            }
        })
    }
}
