//! Run one fetch in its own task: timeout, panic capture, claim heartbeat.

use std::any::Any;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::fetch::{FetchOutcome, FetchRequest, Fetcher};
use crate::job_store::{unix_timestamp, Job};
use crate::retry::ErrorKind;

use super::guard::AbortOnDrop;
use super::worker::WorkerContext;

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Execute the fetch for a claimed job and turn every way it can end into a
/// `FetchOutcome`. Timeouts and panics become transient failures.
///
/// Returns `None` when the heartbeat finds the claim gone (reconciled and
/// possibly reclaimed elsewhere). The fetch is aborted and nothing must be
/// recorded for it.
pub(super) async fn run_fetch<F: Fetcher>(
    ctx: &WorkerContext<F>,
    job: &Job,
) -> Option<FetchOutcome> {
    let request = FetchRequest {
        job_id: job.id,
        locator: job.locator.clone(),
        attempts: job.attempts,
        output_dir: ctx.output_dir.clone(),
    };
    let fetcher = ctx.fetcher.clone();
    let task = AbortOnDrop(tokio::spawn(async move { fetcher.fetch(request).await }));
    let fetch = tokio::time::timeout(ctx.settings.fetch_timeout, task);
    tokio::pin!(fetch);

    // interval() panics on a zero period.
    let period = ctx.settings.heartbeat.max(Duration::from_millis(10));
    let mut heartbeat = tokio::time::interval(period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    let claim = job.claim();
    let joined = loop {
        tokio::select! {
            r = &mut fetch => break r,
            _ = heartbeat.tick() => {
                match ctx.store.touch_claim(claim, unix_timestamp()).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(job_id = job.id, "claim lost while fetching, abandoning fetch");
                        return None;
                    }
                    Err(e) => tracing::warn!(job_id = job.id, "claim heartbeat failed: {:#}", e),
                }
            }
        }
    };

    let outcome = match joined {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) if e.is_panic() => {
            let payload = e.into_panic();
            let msg = panic_message(payload.as_ref());
            tracing::warn!(job_id = job.id, "fetch panicked: {}", msg);
            FetchOutcome::failure(ErrorKind::Other, format!("fetch panicked: {msg}"))
        }
        Ok(Err(_)) => FetchOutcome::failure(ErrorKind::Other, "fetch task cancelled"),
        Err(_) => FetchOutcome::failure(
            ErrorKind::Timeout,
            format!(
                "fetch timed out after {}s",
                ctx.settings.fetch_timeout.as_secs_f64()
            ),
        ),
    };
    Some(outcome)
}
