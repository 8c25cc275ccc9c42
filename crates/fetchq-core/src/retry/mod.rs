//! Retry and backoff policy.
//!
//! Error classification (permanent vs transient) and exponential backoff
//! decisions, shared by the job store's retry transition and the worker pool.

mod classify;
mod policy;

pub use classify::{ErrorKind, FailureClass, FailureClassifier, PatternClassifier};
pub use policy::{RetryDecision, RetryPolicy};
