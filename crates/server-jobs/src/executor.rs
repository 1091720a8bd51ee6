// crates/server-jobs/src/executor.rs
//! Runs one task per submitted job.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cvsum_core::text::normalize_questions;
use cvsum_core::{
    EngineKind, Engines, ExtractionError, NoopProgress, SummarizeContext, SummarizeResult,
    Summarizer, TextExtractor, ValidationError,
};
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::JobError;
use crate::registry::JobRegistry;
use crate::state::{JobState, DEFAULT_FAILURE_MESSAGE};
use crate::types::JobId;

pub const EXTRACTING_MESSAGE: &str = "Extracting text from PDF.";
pub const EXTRACTED_MESSAGE: &str = "PDF extracted. Starting inference.";
pub const SHUTDOWN_MESSAGE: &str = "Job cancelled: server shutting down.";

/// Map an engine's 0-100 progress into the job's 20-95 inference band.
pub fn remap_progress(engine_progress: u8) -> u8 {
    20 + (f64::from(engine_progress.min(100)) * 0.75).round() as u8
}

/// Spawns and supervises job tasks.
///
/// Cheap to clone; clones share the registry, the task tracker and the
/// shutdown token.
#[derive(Clone)]
pub struct JobExecutor {
    registry: Arc<JobRegistry>,
    engines: Engines,
    extractor: Arc<dyn TextExtractor>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl JobExecutor {
    pub fn new(
        registry: Arc<JobRegistry>,
        engines: Engines,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        Self {
            registry,
            engines,
            extractor,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Token cancelled by `shutdown`; background loops can hang off it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Number of job tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Validate, register a `Queued` job, and start it. Returns as soon as the
    /// job is visible in the registry.
    pub fn submit(
        &self,
        document: Vec<u8>,
        questions: Vec<String>,
        use_mock: bool,
    ) -> Result<JobId, JobError> {
        if self.shutdown.is_cancelled() {
            return Err(JobError::ShuttingDown);
        }
        let questions = validate(&document, questions)?;
        let engine = self.engines.select(EngineKind::from_use_mock(use_mock));

        // Registered before the task exists so a racing stream request finds it.
        let state = self.registry.create();
        let job_id = state.id().to_string();

        tracing::info!(
            job_id = %job_id,
            engine = engine.name(),
            questions = questions.len(),
            bytes = document.len(),
            "job submitted"
        );

        let task = JobTask {
            state,
            document,
            questions,
            engine,
            extractor: Arc::clone(&self.extractor),
            cancel: self.shutdown.child_token(),
        };
        self.tracker.spawn(task.run());

        Ok(job_id)
    }

    /// Synchronous path: extract and summarize without creating a job.
    pub async fn summarize_now(
        &self,
        document: Vec<u8>,
        questions: Vec<String>,
        use_mock: bool,
    ) -> Result<SummarizeResult, JobError> {
        if self.shutdown.is_cancelled() {
            return Err(JobError::ShuttingDown);
        }
        let questions = validate(&document, questions)?;
        let engine = self.engines.select(EngineKind::from_use_mock(use_mock));

        let text = extract(Arc::clone(&self.extractor), document).await?;
        let ctx = SummarizeContext::new(&NoopProgress, self.shutdown.child_token());
        let result = engine.summarize(&text, &questions, ctx).await?;
        tracing::info!(engine = engine.name(), answers = result.answers.len(), "summarized");
        Ok(result)
    }

    /// Stop accepting work, cancel every in-flight job, and wait up to
    /// `grace` for their tasks to record the failure and exit.
    pub async fn shutdown(&self, grace: Duration) {
        let in_flight = self.tracker.len();
        tracing::info!(in_flight, "job executor shutting down");
        self.tracker.close();
        self.shutdown.cancel();

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                remaining = self.tracker.len(),
                grace_ms = grace.as_millis() as u64,
                "job tasks still running after shutdown grace period"
            );
        }
    }
}

fn validate(document: &[u8], questions: Vec<String>) -> Result<Vec<String>, ValidationError> {
    if document.is_empty() {
        return Err(ValidationError::MissingDocument);
    }
    normalize_questions(questions)
}

/// Extraction is CPU-bound, so it runs on the blocking pool.
async fn extract(extractor: Arc<dyn TextExtractor>, document: Vec<u8>) -> Result<String, JobError> {
    let text = tokio::task::spawn_blocking(move || extractor.extract_text(&document))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "extraction task failed");
            ExtractionError::Panicked
        })??;
    Ok(text)
}

struct JobTask {
    state: Arc<JobState>,
    document: Vec<u8>,
    questions: Vec<String>,
    engine: Arc<dyn Summarizer>,
    extractor: Arc<dyn TextExtractor>,
    cancel: CancellationToken,
}

impl JobTask {
    async fn run(self) {
        let JobTask {
            state,
            document,
            questions,
            engine,
            extractor,
            cancel,
        } = self;
        let started = Instant::now();
        let job_id = state.id().to_string();

        let work = AssertUnwindSafe(process(
            &state,
            document,
            &questions,
            engine.as_ref(),
            extractor,
            cancel.clone(),
        ))
        .catch_unwind();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!(job_id = %job_id, "job cancelled by shutdown");
                state.fail(SHUTDOWN_MESSAGE);
                return;
            }
            outcome = work => outcome,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(result)) => {
                tracing::info!(job_id = %job_id, elapsed_ms, answers = result.answers.len(), "job completed");
                state.complete(result);
            }
            Ok(Err(e)) => {
                tracing::warn!(job_id = %job_id, elapsed_ms, error = %e, "job failed");
                state.fail(e.to_string());
            }
            Err(_) => {
                tracing::error!(job_id = %job_id, elapsed_ms, "job task panicked");
                state.fail(DEFAULT_FAILURE_MESSAGE);
            }
        }
    }
}

async fn process(
    state: &JobState,
    document: Vec<u8>,
    questions: &[String],
    engine: &dyn Summarizer,
    extractor: Arc<dyn TextExtractor>,
    cancel: CancellationToken,
) -> Result<SummarizeResult, JobError> {
    state.report_running(5, EXTRACTING_MESSAGE);
    let text = extract(extractor, document).await?;
    state.report_running(20, EXTRACTED_MESSAGE);

    let listener = |progress: u8, message: &str| {
        state.report_running(remap_progress(progress), message);
    };
    let ctx = SummarizeContext::new(&listener, cancel);
    Ok(engine.summarize(&text, questions, ctx).await?)
}
