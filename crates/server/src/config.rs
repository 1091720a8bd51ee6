// crates/server/src/config.rs
//! Server configuration from command-line flags and environment variables.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use cvsum_core::bridge::{
    BridgeConfig, DEFAULT_BASE_DIR, DEFAULT_EXECUTABLE, DEFAULT_SCRIPT_PATH,
};
use cvsum_observability::LogFormat;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone, Parser)]
#[command(name = "cvsum", version, about = "Document question-answering job server")]
pub struct Config {
    /// Address to bind.
    #[arg(long, env = "CVSUM_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port to listen on (`PORT` is honoured as a fallback).
    #[arg(long, env = "CVSUM_PORT")]
    pub port: Option<u16>,

    /// Interpreter used to launch the inference worker.
    #[arg(long, env = "CVSUM_PYTHON", default_value = DEFAULT_EXECUTABLE)]
    pub python: String,

    /// Worker script, absolute or relative to the working directory or `--script-base-dir`.
    #[arg(long, env = "CVSUM_SCRIPT_PATH", default_value = DEFAULT_SCRIPT_PATH)]
    pub script_path: PathBuf,

    #[arg(long, env = "CVSUM_SCRIPT_BASE_DIR", default_value = DEFAULT_BASE_DIR)]
    pub script_base_dir: PathBuf,

    /// Hard deadline for one inference run.
    #[arg(long, env = "CVSUM_INFERENCE_TIMEOUT_SECS", default_value_t = 60)]
    pub inference_timeout_secs: u64,

    /// Evict finished jobs this many seconds after they finish. Unset keeps them forever.
    #[arg(long, env = "CVSUM_JOB_TTL_SECS")]
    pub job_ttl_secs: Option<u64>,

    #[arg(long, env = "CVSUM_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,

    #[arg(long, env = "CVSUM_LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    /// How long shutdown waits for in-flight jobs to record cancellation.
    #[arg(long, env = "CVSUM_SHUTDOWN_GRACE_SECS", default_value_t = 5)]
    pub shutdown_grace_secs: u64,
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
            .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port())
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            executable: self.python.clone(),
            script_path: self.script_path.clone(),
            base_dir: self.script_base_dir.clone(),
            timeout: Duration::from_secs(self.inference_timeout_secs),
        }
    }

    pub fn job_ttl(&self) -> Option<Duration> {
        self.job_ttl_secs.map(Duration::from_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["cvsum"]).unwrap();
        assert_eq!(config.python, "python");
        assert_eq!(config.inference_timeout_secs, 60);
        assert_eq!(config.max_upload_bytes, 20 * 1024 * 1024);
        assert_eq!(config.log_format, LogFormat::Compact);
        assert!(config.job_ttl().is_none());

        let bridge = config.bridge_config();
        assert_eq!(bridge.script_path, PathBuf::from("python/gpu_infer.py"));
        assert_eq!(bridge.base_dir, PathBuf::from("backend"));
        assert_eq!(bridge.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_flags_override() {
        let config = Config::try_parse_from([
            "cvsum",
            "--port",
            "9000",
            "--inference-timeout-secs",
            "5",
            "--job-ttl-secs",
            "600",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(config.port(), 9000);
        assert_eq!(config.bridge_config().timeout, Duration::from_secs(5));
        assert_eq!(config.job_ttl(), Some(Duration::from_secs(600)));
        assert_eq!(config.log_format, LogFormat::Json);
    }
}
