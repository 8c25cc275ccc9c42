//! External fetch operation.
//!
//! The worker pool hands each claimed job to a `Fetcher`. The fetch is opaque
//! to the queue: it may run for minutes, and it is cancelled by dropping its
//! future (pool shutdown, timeout).

mod command;

use std::future::Future;
use std::path::PathBuf;

pub use command::{CommandFetcher, FetchError};

use crate::job_store::JobId;
use crate::retry::ErrorKind;

/// Everything a fetcher gets for one claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub job_id: JobId,
    pub locator: String,
    /// Attempts already recorded for the job (0 on the first run).
    pub attempts: u32,
    /// Directory results should land in.
    pub output_dir: PathBuf,
}

/// Failure reported by a fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl FetchFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Outcome of one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Fetched; `result_path` is where the result landed.
    Success { result_path: String },
    Failure(FetchFailure),
}

impl FetchOutcome {
    pub fn success(result_path: impl Into<String>) -> Self {
        FetchOutcome::Success {
            result_path: result_path.into(),
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        FetchOutcome::Failure(FetchFailure::new(kind, message))
    }
}

/// The external fetch operation.
///
/// Implementations must be cancel-safe: dropping the returned future must stop
/// (or detach from) the underlying work.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self, request: FetchRequest) -> impl Future<Output = FetchOutcome> + Send;
}
