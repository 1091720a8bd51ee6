// crates/server/src/main.rs
//! cvsum server binary.
//!
//! Wires the engines and the job executor, serves the API, and on SIGINT or
//! SIGTERM cancels in-flight jobs and drains open connections.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cvsum_core::{Engines, HeuristicEngine, InferenceBridge, PdfTextExtractor};
use cvsum_observability::init_tracing;
use cvsum_server::config::Config;
use cvsum_server::{create_app, AppState};
use cvsum_server_jobs::{JobExecutor, JobRegistry};

/// How often finished jobs are swept when a TTL is configured.
const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.log_format, "info,tower_http=info")?;

    let bridge_config = config.bridge_config();
    tracing::info!(
        python = %bridge_config.executable,
        script = %cvsum_core::bridge::resolve_script_path(&bridge_config).display(),
        timeout_secs = bridge_config.timeout.as_secs(),
        "inference bridge configured"
    );

    let engines = Engines::new(
        Arc::new(HeuristicEngine::new()),
        Arc::new(InferenceBridge::new(bridge_config)),
    );
    let registry = Arc::new(JobRegistry::new());
    let executor = JobExecutor::new(Arc::clone(&registry), engines, Arc::new(PdfTextExtractor));

    let sweeper = config.job_ttl().map(|ttl| {
        tracing::info!(ttl_secs = ttl.as_secs(), "finished-job eviction enabled");
        Arc::clone(&registry).spawn_eviction_loop(ttl, EVICTION_INTERVAL, executor.shutdown_token())
    });

    let state = AppState::with_upload_limit(executor.clone(), config.max_upload_bytes);
    let app = create_app(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, version = env!("CARGO_PKG_VERSION"), "cvsum listening");

    // Jobs are cancelled before connections drain: open SSE streams only
    // close once their job reaches a terminal state.
    let grace = config.shutdown_grace();
    let jobs = executor.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            jobs.shutdown(grace).await;
        })
        .await
        .context("server error")?;

    if let Some(sweeper) = sweeper {
        let _ = tokio::time::timeout(Duration::from_secs(1), sweeper).await;
    }
    tracing::info!("shutdown complete");
    Ok(())
}

/// Resolves on SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT, starting graceful shutdown"),
        () = terminate => tracing::info!("received SIGTERM, starting graceful shutdown"),
    }
}
