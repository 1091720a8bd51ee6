// crates/core/src/engine/mod.rs
//! Engine adapter capability.
//!
//! Provides the `Summarizer` trait and the plumbing shared by its two
//! implementations:
//! - `HeuristicEngine` — in-process token-overlap scoring (the "mock" path)
//! - `InferenceBridge` — out-of-process worker driven over stdin/stdout/stderr

pub mod heuristic;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::types::SummarizeResult;

pub use heuristic::HeuristicEngine;

/// Receives engine progress on the engine's own 0-100 scale.
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, progress: u8, message: &str);
}

impl<F> ProgressListener for F
where
    F: Fn(u8, &str) + Send + Sync,
{
    fn on_progress(&self, progress: u8, message: &str) {
        self(progress, message)
    }
}

/// Listener that discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressListener for NoopProgress {
    fn on_progress(&self, _progress: u8, _message: &str) {}
}

static NOOP_PROGRESS: NoopProgress = NoopProgress;

/// Per-call context handed to an engine.
pub struct SummarizeContext<'a> {
    pub progress: &'a dyn ProgressListener,
    /// Cancelled when the caller's supervisor wants the work abandoned.
    /// Engines leave it cancelled so the caller can observe the signal.
    pub cancel: CancellationToken,
}

impl<'a> SummarizeContext<'a> {
    pub fn new(progress: &'a dyn ProgressListener, cancel: CancellationToken) -> Self {
        Self { progress, cancel }
    }

    /// Context with no listener and a token nobody else holds.
    pub fn detached() -> SummarizeContext<'static> {
        SummarizeContext {
            progress: &NOOP_PROGRESS,
            cancel: CancellationToken::new(),
        }
    }

    pub fn report(&self, progress: u8, message: &str) {
        self.progress.on_progress(progress.min(100), message);
    }
}

/// Text-analysis capability: answer `questions` about `text`.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        text: &str,
        questions: &[String],
        ctx: SummarizeContext<'_>,
    ) -> Result<SummarizeResult, EngineError>;

    /// Engine name for logging (e.g. "heuristic", "python-bridge").
    fn name(&self) -> &str;
}

/// Which engine a submission asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Heuristic,
    Bridge,
}

impl EngineKind {
    /// Maps the public `useMock` flag onto an engine.
    pub fn from_use_mock(use_mock: bool) -> Self {
        if use_mock {
            Self::Heuristic
        } else {
            Self::Bridge
        }
    }
}

/// The two interchangeable engines, resolved per call by `EngineKind`.
#[derive(Clone)]
pub struct Engines {
    heuristic: Arc<dyn Summarizer>,
    bridge: Arc<dyn Summarizer>,
}

impl Engines {
    pub fn new(heuristic: Arc<dyn Summarizer>, bridge: Arc<dyn Summarizer>) -> Self {
        Self { heuristic, bridge }
    }

    pub fn select(&self, kind: EngineKind) -> Arc<dyn Summarizer> {
        match kind {
            EngineKind::Heuristic => Arc::clone(&self.heuristic),
            EngineKind::Bridge => Arc::clone(&self.bridge),
        }
    }
}
