// crates/server-jobs/src/lib.rs
//! Asynchronous document jobs.
//!
//! Provides:
//! - `JobRegistry` — concurrent store of jobs keyed by id
//! - `JobState` — per-job record plus its subscriber set
//! - `JobExecutor` — one supervised task per submitted job
//! - `JobEvent` / `JobProgress` — events pushed to stream subscribers

pub mod error;
pub mod executor;
pub mod registry;
pub mod state;
pub mod types;

pub use error::JobError;
pub use executor::{remap_progress, JobExecutor};
pub use registry::JobRegistry;
pub use state::{JobState, StreamDeliveryError, Subscription};
pub use types::{JobEvent, JobId, JobProgress, JobStatus};
