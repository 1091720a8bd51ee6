// crates/core/src/bridge/mod.rs
//! Inference bridge — runs the external worker process for one request.
//!
//! The worker gets a JSON request on stdin and answers with one JSON
//! document on stdout. Progress updates arrive on stderr as `PROGRESS:`
//! lines interleaved with free-form diagnostics.
//!
//! Two background tasks drain stderr and stdout for the lifetime of the
//! process. The calling task writes the request, waits for exit under the
//! deadline, and forwards progress to the listener. Both readers share a
//! cancellation token so a killed or wedged worker never leaves them
//! blocked.

pub mod protocol;

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::engine::{SummarizeContext, Summarizer};
use crate::error::EngineError;
use crate::types::SummarizeResult;

use protocol::{parse_progress_line, parse_response, InferenceRequest, ProgressLine};

/// Upper bound on waiting for the pipe readers once the worker has exited.
pub const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

pub const DEFAULT_EXECUTABLE: &str = "python";
pub const DEFAULT_SCRIPT_PATH: &str = "python/gpu_infer.py";
pub const DEFAULT_BASE_DIR: &str = "backend";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest response document accepted on stdout.
pub const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;
/// Diagnostics keep only this many trailing bytes of stderr.
pub const MAX_DIAGNOSTIC_BYTES: usize = 64 * 1024;

const FINAL_PROGRESS_MESSAGE: &str = "Inference response parsed.";

/// How to launch the worker.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub executable: String,
    pub script_path: PathBuf,
    /// Directory a relative `script_path` is resolved against when it does
    /// not exist relative to the working directory.
    pub base_dir: PathBuf,
    pub timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            executable: DEFAULT_EXECUTABLE.to_string(),
            script_path: PathBuf::from(DEFAULT_SCRIPT_PATH),
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Absolute or existing path as given, else `base_dir/script_path` if that
/// exists, else the configured path unchanged.
pub fn resolve_script_path(config: &BridgeConfig) -> PathBuf {
    let configured = &config.script_path;
    if configured.is_absolute() || configured.exists() {
        return configured.clone();
    }
    let candidate = config.base_dir.join(configured);
    if candidate.exists() {
        return candidate;
    }
    configured.clone()
}

/// Out-of-process engine.
#[derive(Debug, Clone)]
pub struct InferenceBridge {
    config: BridgeConfig,
}

enum WaitOutcome {
    Exited(Result<ExitStatus, EngineError>),
    TimedOut,
    Cancelled,
}

impl InferenceBridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Run one request through the worker.
    ///
    /// Progress updates reach `ctx.progress` on the worker's own scale.
    /// Cancelling `ctx.cancel` kills the worker and yields
    /// `EngineError::Interrupted`; the token is left cancelled.
    pub async fn run_inference(
        &self,
        text: &str,
        questions: &[String],
        ctx: &SummarizeContext<'_>,
    ) -> Result<SummarizeResult, EngineError> {
        let payload = InferenceRequest::new(text, questions).to_json()?;
        let script = resolve_script_path(&self.config);
        let timeout_secs = self.config.timeout.as_secs();
        let deadline = Instant::now() + self.config.timeout;
        let t0 = std::time::Instant::now();

        tracing::info!(
            executable = %self.config.executable,
            script = %script.display(),
            timeout_secs,
            questions = questions.len(),
            "inference bridge: spawning worker"
        );

        let mut child = spawn_worker(&self.config.executable, &script)?;
        let (stdin, stdout, stderr) = take_pipes(&mut child)?;

        let readers_cancel = ctx.cancel.child_token();
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let stderr_task = tokio::spawn(drain_stderr(stderr, progress_tx, readers_cancel.clone()));
        let stdout_task = tokio::spawn(drain_stdout(stdout, readers_cancel.clone()));

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => WaitOutcome::Cancelled,
            res = timeout_at(deadline, exchange(&mut child, stdin, &payload, &mut progress_rx, ctx)) => {
                match res {
                    Ok(status) => WaitOutcome::Exited(status),
                    Err(_) => WaitOutcome::TimedOut,
                }
            }
        };

        let status = match outcome {
            WaitOutcome::Exited(Ok(status)) => status,
            WaitOutcome::Exited(Err(e)) => {
                reclaim(&mut child, &readers_cancel, [stderr_task.abort_handle(), stdout_task.abort_handle()]).await;
                return Err(e);
            }
            WaitOutcome::TimedOut => {
                tracing::error!(
                    elapsed_ms = t0.elapsed().as_millis() as u64,
                    timeout_secs,
                    "inference bridge: timed out, killing worker"
                );
                reclaim(&mut child, &readers_cancel, [stderr_task.abort_handle(), stdout_task.abort_handle()]).await;
                return Err(EngineError::Timeout { secs: timeout_secs });
            }
            WaitOutcome::Cancelled => {
                tracing::warn!("inference bridge: cancelled, killing worker");
                reclaim(&mut child, &readers_cancel, [stderr_task.abort_handle(), stdout_task.abort_handle()]).await;
                return Err(EngineError::Interrupted);
            }
        };

        let diagnostics = join_bounded(stderr_task, &readers_cancel, "stderr").await;
        let captured = join_bounded(stdout_task, &readers_cancel, "stdout").await;
        while let Ok((progress, message)) = progress_rx.try_recv() {
            ctx.report(progress, &message);
        }

        let elapsed_ms = t0.elapsed().as_millis() as u64;
        if !status.success() {
            tracing::error!(
                elapsed_ms,
                exit_code = ?status.code(),
                stderr = %truncate_for_log(&diagnostics),
                "inference bridge: non-zero exit"
            );
            let diagnostics = if diagnostics.is_empty() {
                format!("worker exited with {status}")
            } else {
                diagnostics
            };
            return Err(EngineError::ProcessExit {
                code: status.code(),
                diagnostics,
            });
        }

        if captured.overflowed {
            tracing::error!(elapsed_ms, limit = MAX_RESPONSE_BYTES, "inference bridge: response too large");
            return Err(EngineError::InvalidResponse(format!(
                "worker output exceeded {MAX_RESPONSE_BYTES} bytes"
            )));
        }

        let stdout = String::from_utf8_lossy(&captured.bytes);
        if stdout.trim().is_empty() {
            tracing::error!(elapsed_ms, "inference bridge: worker produced no output");
            return Err(EngineError::NoOutput);
        }

        let result = parse_response(&stdout, text).inspect_err(|e| {
            tracing::error!(elapsed_ms, error = %e, "inference bridge: unparseable response");
        })?;
        ctx.report(100, FINAL_PROGRESS_MESSAGE);
        tracing::info!(
            elapsed_ms,
            answers = result.answers.len(),
            model = %result.model_info,
            "inference bridge: done"
        );
        Ok(result)
    }
}

#[async_trait]
impl Summarizer for InferenceBridge {
    async fn summarize(
        &self,
        text: &str,
        questions: &[String],
        ctx: SummarizeContext<'_>,
    ) -> Result<SummarizeResult, EngineError> {
        self.run_inference(text, questions, &ctx).await
    }

    fn name(&self) -> &str {
        "python-bridge"
    }
}

fn spawn_worker(executable: &str, script: &Path) -> Result<Child, EngineError> {
    Command::new(executable)
        .arg(script)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            tracing::error!(error = %e, executable, "inference bridge: failed to spawn worker");
            EngineError::SpawnFailed(format!("{executable}: {e}"))
        })
}

fn take_pipes(child: &mut Child) -> Result<(ChildStdin, ChildStdout, ChildStderr), EngineError> {
    let missing = |name: &str| EngineError::SpawnFailed(format!("failed to capture worker {name}"));
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
    Ok((stdin, stdout, stderr))
}

/// Write the request, close stdin, then wait for exit while relaying progress.
async fn exchange(
    child: &mut Child,
    stdin: ChildStdin,
    payload: &[u8],
    progress_rx: &mut mpsc::UnboundedReceiver<(u8, String)>,
    ctx: &SummarizeContext<'_>,
) -> Result<ExitStatus, EngineError> {
    write_request(stdin, payload).await?;

    loop {
        tokio::select! {
            Some((progress, message)) = progress_rx.recv() => ctx.report(progress, &message),
            status = child.wait() => {
                return status.map_err(|e| EngineError::io("waiting for inference worker", e));
            }
        }
    }
}

async fn write_request(mut stdin: ChildStdin, payload: &[u8]) -> Result<(), EngineError> {
    let written = match stdin.write_all(payload).await {
        Ok(()) => stdin.shutdown().await,
        Err(e) => Err(e),
    };
    match written {
        Ok(()) => Ok(()),
        // The worker may exit without reading stdin; its exit status decides.
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            tracing::debug!("inference bridge: worker closed stdin early");
            Ok(())
        }
        Err(e) => Err(EngineError::io("writing inference request", e)),
    }
}

/// Drain stderr line by line. Progress lines go to `progress_tx`; everything
/// else non-blank is returned as diagnostic text.
async fn drain_stderr(
    stderr: ChildStderr,
    progress_tx: mpsc::UnboundedSender<(u8, String)>,
    cancel: CancellationToken,
) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut diagnostics = String::new();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "inference bridge: stderr read failed");
                break;
            }
        };

        match parse_progress_line(&line) {
            ProgressLine::Update { progress, message } => {
                // receiver gone means the caller stopped listening
                let _ = progress_tx.send((progress, message));
            }
            ProgressLine::Malformed => {
                tracing::debug!(line = %line, "inference bridge: ignoring malformed progress line");
            }
            ProgressLine::NotProgress => {
                push_diagnostic(&mut diagnostics, &line, MAX_DIAGNOSTIC_BYTES);
            }
        }
    }

    diagnostics
}

/// Append a non-blank stderr line, dropping the oldest text past `limit` bytes.
fn push_diagnostic(diagnostics: &mut String, line: &str, limit: usize) {
    let line = line.trim_end();
    if line.trim().is_empty() {
        return;
    }
    if !diagnostics.is_empty() {
        diagnostics.push('\n');
    }
    diagnostics.push_str(line);

    if diagnostics.len() > limit {
        let mut cut = diagnostics.len() - limit;
        while !diagnostics.is_char_boundary(cut) {
            cut += 1;
        }
        diagnostics.drain(..cut);
    }
}

#[derive(Debug, Default)]
struct StdoutCapture {
    bytes: Vec<u8>,
    overflowed: bool,
}

async fn drain_stdout(mut stdout: ChildStdout, cancel: CancellationToken) -> StdoutCapture {
    let mut capture = StdoutCapture::default();
    tokio::select! {
        _ = cancel.cancelled() => {}
        res = read_capped(&mut stdout, &mut capture.bytes, MAX_RESPONSE_BYTES) => {
            match res {
                Ok(overflowed) => capture.overflowed = overflowed,
                Err(e) => tracing::warn!(error = %e, "inference bridge: stdout read failed"),
            }
        }
    }
    capture
}

/// Read to EOF keeping at most `limit` bytes in `buf`. Anything past the limit
/// is discarded so the writer never blocks on a full pipe. Returns whether the
/// limit was exceeded. Bytes already read stay in `buf` if the future is dropped.
async fn read_capped<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
) -> std::io::Result<bool> {
    (&mut *reader).take(limit as u64 + 1).read_to_end(buf).await?;
    if buf.len() <= limit {
        return Ok(false);
    }
    buf.truncate(limit);
    tokio::io::copy(reader, &mut tokio::io::sink()).await?;
    Ok(true)
}

/// Wait up to `READER_JOIN_TIMEOUT` for a reader. On expiry, signal it to stop
/// and give it one more bounded wait before aborting.
async fn join_bounded<T: Default>(
    mut handle: JoinHandle<T>,
    cancel: &CancellationToken,
    stream: &str,
) -> T {
    if let Ok(joined) = timeout(READER_JOIN_TIMEOUT, &mut handle).await {
        return joined.unwrap_or_else(|e| {
            tracing::error!(error = %e, stream, "inference bridge: reader task failed");
            T::default()
        });
    }

    tracing::warn!(stream, "inference bridge: reader still open after exit, cancelling");
    cancel.cancel();
    match timeout(READER_JOIN_TIMEOUT, &mut handle).await {
        Ok(Ok(value)) => value,
        _ => {
            handle.abort();
            T::default()
        }
    }
}

/// Kill the worker, reap it, and stop both readers.
async fn reclaim(
    child: &mut Child,
    readers_cancel: &CancellationToken,
    readers: [AbortHandle; 2],
) {
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "inference bridge: kill failed (already exited?)");
    }
    if let Err(e) = child.wait().await {
        tracing::warn!(error = %e, "inference bridge: failed to reap worker");
    }
    readers_cancel.cancel();
    for reader in readers {
        reader.abort();
    }
}

fn truncate_for_log(text: &str) -> &str {
    match text.char_indices().nth(500) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
