//! Worker pool.
//!
//! `max_concurrent` independent loops share the job store, the pause gate and
//! the fetch slots: wait while paused → take a slot → claim → fetch → resolve.
//! Background tasks run next to them: stale-claim reconciliation and,
//! optionally, the resource monitor and the concurrency governor.
//! The claim itself is a single atomic store statement, so workers need no
//! lock between them.

mod fetch_task;
mod guard;
mod pool;
mod reconcile;
mod resolve;
mod slots;
mod worker;

use std::time::Duration;

use crate::config::FetchqConfig;

pub use pool::{PoolHandle, ShutdownReport, WorkerPool};

/// Timing and sizing knobs for the pool (durations, so tests can run fast).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_concurrent: usize,
    pub paused_poll: Duration,
    pub idle_poll: Duration,
    pub store_retry: Duration,
    pub fetch_timeout: Duration,
    pub heartbeat: Duration,
    pub stale_claim_grace: Duration,
    pub reconcile_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from_config(&FetchqConfig::default())
    }
}

impl PoolSettings {
    pub fn from_config(cfg: &FetchqConfig) -> Self {
        let w = &cfg.worker;
        Self {
            max_concurrent: cfg.max_concurrent.max(1),
            paused_poll: Duration::from_millis(w.paused_poll_ms),
            idle_poll: Duration::from_millis(w.idle_poll_ms),
            store_retry: Duration::from_millis(w.store_retry_ms),
            fetch_timeout: Duration::from_secs(w.fetch_timeout_secs),
            heartbeat: Duration::from_secs(w.heartbeat_secs()),
            stale_claim_grace: Duration::from_secs(w.stale_claim_grace_secs),
            reconcile_interval: Duration::from_secs(w.reconcile_interval_secs),
            shutdown_grace: Duration::from_secs(w.shutdown_grace_secs),
        }
    }
}
