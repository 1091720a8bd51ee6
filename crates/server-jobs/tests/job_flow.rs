//! End-to-end job flows: submit, stream, terminal delivery, shutdown.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cvsum_core::bridge::{BridgeConfig, InferenceBridge};
use cvsum_core::{
    EngineError, Engines, HeuristicEngine, PdfTextExtractor, PlainTextExtractor, SummarizeContext,
    SummarizeResult, Summarizer, TextExtractor,
};
use cvsum_server_jobs::executor::SHUTDOWN_MESSAGE;
use cvsum_server_jobs::{
    JobError, JobEvent, JobExecutor, JobRegistry, JobStatus, Subscription,
};

const CV: &str = "Jane Doe is a backend engineer with eight years of Rust experience.\n\
    Led the payments platform team at Acme Corp.";

struct PanickingEngine;

#[async_trait]
impl Summarizer for PanickingEngine {
    async fn summarize(
        &self,
        _text: &str,
        _questions: &[String],
        _ctx: SummarizeContext<'_>,
    ) -> Result<SummarizeResult, EngineError> {
        panic!("engine exploded");
    }

    fn name(&self) -> &str {
        "panicking"
    }
}

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("worker.sh");
    std::fs::write(&path, body).unwrap();
    path
}

fn sh_bridge(script: PathBuf) -> Arc<dyn Summarizer> {
    Arc::new(InferenceBridge::new(BridgeConfig {
        executable: "sh".to_string(),
        script_path: script,
        base_dir: PathBuf::from("."),
        timeout: Duration::from_secs(30),
    }))
}

fn executor_with(bridge: Arc<dyn Summarizer>, extractor: Arc<dyn TextExtractor>) -> JobExecutor {
    let engines = Engines::new(Arc::new(HeuristicEngine::new()), bridge);
    JobExecutor::new(Arc::new(JobRegistry::new()), engines, extractor)
}

fn heuristic_executor() -> JobExecutor {
    executor_with(Arc::new(PanickingEngine), Arc::new(PlainTextExtractor))
}

fn questions(qs: &[&str]) -> Vec<String> {
    qs.iter().map(|q| q.to_string()).collect()
}

async fn collect(mut sub: Subscription) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Some(event) =
        tokio::time::timeout(Duration::from_secs(20), sub.recv()).await.expect("stream stalled")
    {
        events.push(event);
    }
    events
}

fn progress_events(events: &[JobEvent]) -> Vec<(JobStatus, u8)> {
    events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Progress(p) => Some((p.status, p.progress)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_heuristic_job_end_to_end() {
    let executor = heuristic_executor();
    let id = executor
        .submit(CV.as_bytes().to_vec(), questions(&["How many years of Rust?"]), true)
        .unwrap();

    // Current-thread runtime: the job task has not run yet.
    let snapshot = executor.registry().snapshot(&id).unwrap();
    assert_eq!(snapshot.status, JobStatus::Queued);
    assert_eq!(snapshot.progress, 0);

    let events = collect(executor.registry().open_stream(&id).unwrap()).await;
    let progress = progress_events(&events);

    let mut statuses: Vec<JobStatus> = progress.iter().map(|(s, _)| *s).collect();
    statuses.dedup();
    assert_eq!(
        statuses,
        vec![JobStatus::Queued, JobStatus::Running, JobStatus::Completed]
    );
    assert_eq!(progress[1], (JobStatus::Running, 5));
    assert_eq!(progress[2], (JobStatus::Running, 20));
    for (status, value) in &progress[2..] {
        assert!(*value >= 20 && *value <= 100, "{status:?} at {value}");
    }
    assert_eq!(progress.last(), Some(&(JobStatus::Completed, 100)));

    match events.last() {
        Some(JobEvent::Result(result)) => {
            assert!(result.mock_mode);
            assert_eq!(result.answers.len(), 1);
        }
        other => panic!("expected result event, got {other:?}"),
    }
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn test_late_subscriber_receives_only_terminal_event() {
    let executor = heuristic_executor();
    let id = executor
        .submit(CV.as_bytes().to_vec(), questions(&["Skills?"]), true)
        .unwrap();
    collect(executor.registry().open_stream(&id).unwrap()).await;

    let events = collect(executor.registry().open_stream(&id).unwrap()).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], JobEvent::Result(_)));
}

#[tokio::test]
async fn test_many_subscribers_each_get_terminal_once() {
    let executor = heuristic_executor();
    let id = executor
        .submit(CV.as_bytes().to_vec(), questions(&["Skills?", "Team?"]), true)
        .unwrap();

    let subs: Vec<_> = (0..5)
        .map(|_| executor.registry().open_stream(&id).unwrap())
        .collect();
    for sub in subs {
        let events = collect(sub).await;
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(events.last().is_some_and(JobEvent::is_terminal));
    }
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let executor = heuristic_executor();
    assert!(matches!(
        executor.registry().open_stream("missing"),
        Err(JobError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_validation_errors_never_create_jobs() {
    let executor = heuristic_executor();
    assert!(matches!(
        executor.submit(CV.as_bytes().to_vec(), questions(&[" ", ""]), true),
        Err(JobError::Validation(_))
    ));
    assert!(matches!(
        executor.submit(CV.as_bytes().to_vec(), vec![], true),
        Err(JobError::Validation(_))
    ));
    assert!(matches!(
        executor.submit(Vec::new(), questions(&["q"]), true),
        Err(JobError::Validation(_))
    ));
    assert!(executor.registry().is_empty());
}

#[tokio::test]
async fn test_extraction_failure_fails_job_before_inference() {
    let executor = executor_with(Arc::new(PanickingEngine), Arc::new(PdfTextExtractor));
    let id = executor
        .submit(b"not a pdf".to_vec(), questions(&["q"]), true)
        .unwrap();

    let events = collect(executor.registry().open_stream(&id).unwrap()).await;
    assert!(!progress_events(&events).iter().any(|(_, p)| *p == 20));
    match events.last() {
        Some(JobEvent::Failed { error }) => assert!(error.starts_with("Could not parse PDF file")),
        other => panic!("expected failed event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_engine_panic_is_recorded_as_generic_failure() {
    let executor = heuristic_executor();
    let id = executor
        .submit(CV.as_bytes().to_vec(), questions(&["q"]), false)
        .unwrap();

    let events = collect(executor.registry().open_stream(&id).unwrap()).await;
    assert_eq!(
        events.last(),
        Some(&JobEvent::Failed {
            error: "Processing failed.".to_string()
        })
    );
    assert_eq!(executor.registry().snapshot(&id).unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn test_summarize_now_returns_result_without_job() {
    let executor = heuristic_executor();
    let result = executor
        .summarize_now(CV.as_bytes().to_vec(), questions(&["Rust?"]), true)
        .await
        .unwrap();
    assert!(result.mock_mode);
    assert!(executor.registry().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_bridge_job_failure_carries_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "cat > /dev/null\necho boom >&2\nexit 1\n");
    let executor = executor_with(sh_bridge(script), Arc::new(PlainTextExtractor));

    let id = executor
        .submit(CV.as_bytes().to_vec(), questions(&["q"]), false)
        .unwrap();
    let events = collect(executor.registry().open_stream(&id).unwrap()).await;

    match events.last() {
        Some(JobEvent::Failed { error }) => assert!(error.contains("boom"), "{error}"),
        other => panic!("expected failed event, got {other:?}"),
    }
    let snapshot = executor.registry().snapshot(&id).unwrap();
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert!(snapshot.message.contains("boom"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_bridge_progress_is_remapped_into_inference_band() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "cat > /dev/null\n\
         echo 'PROGRESS:{\"progress\":0,\"message\":\"Loading\"}' >&2\n\
         echo 'PROGRESS:{\"progress\":100,\"message\":\"Done\"}' >&2\n\
         echo '{\"answers\":[{\"question\":\"q\",\"answer\":\"a\"}]}'\n",
    );
    let executor = executor_with(sh_bridge(script), Arc::new(PlainTextExtractor));

    let id = executor
        .submit(CV.as_bytes().to_vec(), questions(&["q"]), false)
        .unwrap();
    let events = collect(executor.registry().open_stream(&id).unwrap()).await;
    let progress: Vec<u8> = progress_events(&events).iter().map(|(_, p)| *p).collect();

    assert_eq!(progress, vec![0, 5, 20, 20, 95, 95, 100]);
    match events.last() {
        Some(JobEvent::Result(result)) => {
            assert!(!result.mock_mode);
            assert_eq!(result.answers[0].citations.len(), 1);
        }
        other => panic!("expected result event, got {other:?}"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_shutdown_fails_in_flight_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "cat > /dev/null\nexec sleep 30\n");
    let executor = executor_with(sh_bridge(script), Arc::new(PlainTextExtractor));

    let id = executor
        .submit(CV.as_bytes().to_vec(), questions(&["q"]), false)
        .unwrap();
    let mut sub = executor.registry().open_stream(&id).unwrap();

    // wait until the job reaches the inference phase
    loop {
        match sub.recv().await {
            Some(JobEvent::Progress(p)) if p.progress >= 20 => break,
            Some(_) => continue,
            None => panic!("stream closed early"),
        }
    }

    executor.shutdown(Duration::from_secs(5)).await;
    assert_eq!(executor.in_flight(), 0);

    let snapshot = executor.registry().snapshot(&id).unwrap();
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(snapshot.message, SHUTDOWN_MESSAGE);
    assert!(matches!(
        executor.submit(CV.as_bytes().to_vec(), questions(&["q"]), true),
        Err(JobError::ShuttingDown)
    ));
}
