//! One worker loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::control::PauseController;
use crate::fetch::Fetcher;
use crate::job_store::{unix_timestamp, JobStore};
use crate::retry::{FailureClassifier, RetryPolicy};

use super::fetch_task::run_fetch;
use super::resolve::resolve_outcome;
use super::slots::FetchSlots;
use super::PoolSettings;

/// State shared by all workers of one pool.
pub(super) struct WorkerContext<F> {
    pub(super) store: JobStore,
    pub(super) fetcher: Arc<F>,
    pub(super) classifier: Arc<dyn FailureClassifier>,
    pub(super) policy: RetryPolicy,
    pub(super) pause: Arc<PauseController>,
    pub(super) slots: FetchSlots,
    pub(super) settings: PoolSettings,
    pub(super) output_dir: PathBuf,
}

/// Sleep for `d` unless stop is signalled first. Returns true on stop.
pub(super) async fn sleep_or_stop(d: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(d) => false,
        r = stop.changed() => r.is_err() || *stop.borrow(),
    }
}

pub(super) async fn worker_loop<F: Fetcher>(
    worker: usize,
    ctx: Arc<WorkerContext<F>>,
    mut stop: watch::Receiver<bool>,
) {
    tracing::debug!(worker, "worker started");
    loop {
        if *stop.borrow() {
            break;
        }
        if ctx.pause.is_paused() {
            if sleep_or_stop(ctx.settings.paused_poll, &mut stop).await {
                break;
            }
            continue;
        }
        let Some(slot) = ctx.slots.try_acquire() else {
            if sleep_or_stop(ctx.settings.paused_poll, &mut stop).await {
                break;
            }
            continue;
        };

        let job = match ctx.store.claim_next(unix_timestamp()).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                drop(slot);
                if sleep_or_stop(ctx.settings.idle_poll, &mut stop).await {
                    break;
                }
                continue;
            }
            Err(e) => {
                drop(slot);
                tracing::warn!(worker, "claim failed, retrying: {:#}", e);
                if sleep_or_stop(ctx.settings.store_retry, &mut stop).await {
                    break;
                }
                continue;
            }
        };

        tracing::debug!(
            worker,
            job_id = job.id,
            attempts = job.attempts,
            active = ctx.slots.active(),
            locator = %job.locator,
            "claimed job"
        );
        if let Some(outcome) = run_fetch(&ctx, &job).await {
            resolve_outcome(&ctx, &job, outcome).await;
        }
        drop(slot);
    }
    tracing::debug!(worker, "worker stopped");
}
