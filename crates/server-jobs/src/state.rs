// crates/server-jobs/src/state.rs
//! State and subscriber set for a single job.
//!
//! One mutex guards both the job record and its subscribers, so "read state
//! and register" and "transition and broadcast" can never interleave. A
//! subscriber either registers before a terminal transition (and receives
//! the terminal event from the broadcast) or observes the terminal state on
//! registration (and receives it from there). Never both, never neither.
//!
//! Subscriber queues are unbounded, so broadcasting never waits on a slow
//! consumer.

use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Instant;

use cvsum_core::SummarizeResult;
use futures_util::stream::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::types::{JobEvent, JobId, JobProgress, JobStatus};

pub const ACCEPTED_MESSAGE: &str = "Job accepted.";
pub const COMPLETED_MESSAGE: &str = "Processing completed.";
pub const DEFAULT_FAILURE_MESSAGE: &str = "Processing failed.";

/// A push to one subscriber failed because its receiving side is gone.
#[derive(Debug, Error)]
#[error("subscriber for job {job_id} disconnected")]
pub struct StreamDeliveryError {
    pub job_id: JobId,
}

struct Inner {
    status: JobStatus,
    progress: u8,
    message: String,
    result: Option<SummarizeResult>,
    error: Option<String>,
    finished_at: Option<Instant>,
    subscribers: Vec<mpsc::UnboundedSender<JobEvent>>,
}

pub struct JobState {
    id: JobId,
    created_at: Instant,
    inner: Mutex<Inner>,
}

impl JobState {
    /// New job in `Queued` at 0%.
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            inner: Mutex::new(Inner {
                status: JobStatus::Queued,
                progress: 0,
                message: ACCEPTED_MESSAGE.to_string(),
                result: None,
                error: None,
                finished_at: None,
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!(job_id = %self.id, "job state mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn snapshot_of(&self, inner: &Inner) -> JobProgress {
        JobProgress {
            job_id: self.id.clone(),
            status: inner.status,
            progress: inner.progress,
            message: inner.message.clone(),
        }
    }

    pub fn snapshot(&self) -> JobProgress {
        let inner = self.lock();
        self.snapshot_of(&inner)
    }

    pub fn status(&self) -> JobStatus {
        self.lock().status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn result(&self) -> Option<SummarizeResult> {
        self.lock().result.clone()
    }

    pub fn error_message(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// When the job reached a terminal state, if it has.
    pub fn finished_at(&self) -> Option<Instant> {
        self.lock().finished_at
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Report a `Running` update. Ignored once the job is terminal.
    pub fn report_running(&self, progress: u8, message: impl Into<String>) -> bool {
        let mut inner = self.lock();
        if !inner.status.can_transition_to(JobStatus::Running) {
            tracing::debug!(job_id = %self.id, status = inner.status.as_str(), "ignoring late progress");
            return false;
        }
        inner.status = JobStatus::Running;
        inner.progress = progress.min(100);
        inner.message = message.into();

        let event = JobEvent::Progress(self.snapshot_of(&inner));
        self.broadcast(&mut inner, &event);
        true
    }

    /// Record the result and move to `Completed`. Returns false if the job
    /// had already finished.
    pub fn complete(&self, result: SummarizeResult) -> bool {
        let mut inner = self.lock();
        if inner.status.is_terminal() {
            return false;
        }
        inner.status = JobStatus::Completed;
        inner.progress = 100;
        inner.message = COMPLETED_MESSAGE.to_string();
        inner.result = Some(result.clone());
        self.finish(&mut inner, JobEvent::Result(result));
        true
    }

    /// Record the error and move to `Failed`. A blank message is replaced by
    /// the generic default.
    pub fn fail(&self, error: impl Into<String>) -> bool {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = DEFAULT_FAILURE_MESSAGE.to_string();
        }

        let mut inner = self.lock();
        if inner.status.is_terminal() {
            return false;
        }
        inner.status = JobStatus::Failed;
        inner.progress = 100;
        inner.message = error.clone();
        inner.error = Some(error.clone());
        self.finish(&mut inner, JobEvent::Failed { error });
        true
    }

    /// Open a subscription.
    ///
    /// A live job yields its current snapshot first, then every later
    /// update. A finished job yields only its terminal event. Either way the
    /// stream ends right after the terminal event.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();

        match terminal_event(&inner) {
            Some(event) => {
                // tx dropped below: stream ends after this event
                let _ = tx.send(event);
            }
            None => {
                let _ = tx.send(JobEvent::Progress(self.snapshot_of(&inner)));
                inner.subscribers.push(tx);
            }
        }

        Subscription {
            job_id: self.id.clone(),
            inner: UnboundedReceiverStream::new(rx),
        }
    }

    /// Push the final snapshot and the terminal event, then detach everyone.
    fn finish(&self, inner: &mut Inner, terminal: JobEvent) {
        inner.finished_at = Some(Instant::now());
        let snapshot = JobEvent::Progress(self.snapshot_of(inner));
        self.broadcast(inner, &snapshot);
        self.broadcast(inner, &terminal);
        // dropping the senders closes every stream
        inner.subscribers.clear();
    }

    fn broadcast(&self, inner: &mut Inner, event: &JobEvent) {
        inner.subscribers.retain(|tx| match deliver(&self.id, tx, event) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "dropping subscriber");
                false
            }
        });
    }
}

fn deliver(
    job_id: &str,
    tx: &mpsc::UnboundedSender<JobEvent>,
    event: &JobEvent,
) -> Result<(), StreamDeliveryError> {
    tx.send(event.clone()).map_err(|_| StreamDeliveryError {
        job_id: job_id.to_string(),
    })
}

fn terminal_event(inner: &Inner) -> Option<JobEvent> {
    match inner.status {
        JobStatus::Completed => inner.result.clone().map(JobEvent::Result),
        JobStatus::Failed => Some(JobEvent::Failed {
            error: inner
                .error
                .clone()
                .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
        }),
        JobStatus::Queued | JobStatus::Running => None,
    }
}

/// Event stream for one subscriber. Dropping it unregisters the subscriber
/// on the next broadcast.
pub struct Subscription {
    job_id: JobId,
    inner: UnboundedReceiverStream<JobEvent>,
}

impl Subscription {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Next event, or `None` once the stream has closed.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        use tokio_stream::StreamExt;
        self.inner.next().await
    }
}

impl Stream for Subscription {
    type Item = JobEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn sample_result() -> SummarizeResult {
        SummarizeResult {
            mock_mode: true,
            summary: "summary".to_string(),
            answers: vec![],
            model_info: "mock-rule-engine-v1".to_string(),
        }
    }

    #[test]
    fn test_new_job_is_queued_at_zero() {
        let state = JobState::new("job-1".to_string());
        let snap = state.snapshot();
        assert_eq!(snap.status, JobStatus::Queued);
        assert_eq!(snap.progress, 0);
        assert_eq!(snap.message, "Job accepted.");
    }

    #[test]
    fn test_job_state_lifecycle() {
        let state = JobState::new("job-1".to_string());
        assert!(state.report_running(5, "Extracting text from PDF."));
        assert_eq!(state.snapshot().status, JobStatus::Running);
        assert!(state.report_running(250, "overflow"));
        assert_eq!(state.snapshot().progress, 100);

        assert!(state.complete(sample_result()));
        let snap = state.snapshot();
        assert_eq!(snap.status, JobStatus::Completed);
        assert_eq!(snap.message, "Processing completed.");
        assert!(state.finished_at().is_some());
        assert_eq!(state.result(), Some(sample_result()));
    }

    #[test]
    fn test_terminal_state_is_frozen() {
        let state = JobState::new("job-2".to_string());
        assert!(state.fail("Connection timeout"));
        assert!(!state.complete(sample_result()));
        assert!(!state.fail("again"));
        assert!(!state.report_running(50, "late"));

        let snap = state.snapshot();
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.message, "Connection timeout");
        assert_eq!(state.result(), None);
        assert_eq!(state.error_message().as_deref(), Some("Connection timeout"));
    }

    #[test]
    fn test_blank_failure_uses_default_message() {
        let state = JobState::new("job-3".to_string());
        state.fail("  ");
        assert_eq!(state.error_message().as_deref(), Some("Processing failed."));
    }

    #[tokio::test]
    async fn test_subscriber_sees_snapshot_updates_and_terminal_once() {
        let state = JobState::new("job-4".to_string());
        let mut sub = state.subscribe();

        state.report_running(5, "Extracting text from PDF.");
        state.complete(sample_result());

        let mut events = Vec::new();
        while let Some(event) = sub.recv().await {
            events.push(event);
        }
        let names: Vec<_> = events.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["progress", "progress", "progress", "result"]);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(state.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_only_terminal_event() {
        let state = JobState::new("job-5".to_string());
        state.report_running(20, "running");
        state.fail("boom");

        let mut sub = state.subscribe();
        assert_eq!(
            sub.recv().await,
            Some(JobEvent::Failed {
                error: "boom".to_string()
            })
        );
        assert_eq!(sub.recv().await, None);
        assert_eq!(state.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_removed_without_affecting_others() {
        let state = JobState::new("job-6".to_string());
        let dropped = state.subscribe();
        let mut kept = state.subscribe();
        assert_eq!(state.subscriber_count(), 2);

        drop(dropped);
        state.report_running(10, "still going");
        assert_eq!(state.subscriber_count(), 1);

        // initial snapshot, then the update
        assert_eq!(kept.recv().await.map(|e| e.name()), Some("progress"));
        match kept.recv().await {
            Some(JobEvent::Progress(p)) => assert_eq!(p.progress, 10),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_subscribe_racing_terminal_transition() {
        const SUBSCRIBERS: usize = 8;

        for round in 0..200 {
            let state = Arc::new(JobState::new(format!("race-{round}")));
            state.report_running(50, "running");
            let barrier = Arc::new(tokio::sync::Barrier::new(SUBSCRIBERS + 1));

            let subscribers: Vec<_> = (0..SUBSCRIBERS)
                .map(|_| {
                    let state = Arc::clone(&state);
                    let barrier = Arc::clone(&barrier);
                    tokio::spawn(async move {
                        barrier.wait().await;
                        let mut sub = state.subscribe();
                        let mut events = Vec::new();
                        while let Some(event) =
                            tokio::time::timeout(std::time::Duration::from_secs(5), sub.recv())
                                .await
                                .expect("subscription never closed")
                        {
                            events.push(event);
                        }
                        events
                    })
                })
                .collect();

            let finisher = {
                let state = Arc::clone(&state);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    state.complete(sample_result())
                })
            };

            assert!(finisher.await.unwrap());
            for handle in subscribers {
                let events = handle.await.unwrap();
                assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1, "round {round}");
                assert!(matches!(events.last(), Some(JobEvent::Result(_))), "round {round}");
            }
            assert_eq!(state.subscriber_count(), 0);
        }
    }
}
