//! Apply a fetch outcome to the job store.

use anyhow::Result;

use crate::fetch::{FetchFailure, FetchOutcome, Fetcher};
use crate::job_store::{unix_timestamp, Job, Resolution};
use crate::retry::{ErrorKind, FailureClass};

use super::worker::WorkerContext;

#[derive(Debug)]
enum Transition {
    Complete(String),
    Retry(String),
    Fail(String),
}

impl Transition {
    fn classify<F: Fetcher>(ctx: &WorkerContext<F>, outcome: FetchOutcome) -> Self {
        match outcome {
            FetchOutcome::Success { result_path } if result_path.trim().is_empty() => {
                let f = FetchFailure::new(
                    ErrorKind::Other,
                    "fetch reported success without a result location",
                );
                Transition::Retry(f.to_string())
            }
            FetchOutcome::Success { result_path } => Transition::Complete(result_path),
            FetchOutcome::Failure(f) => match ctx.classifier.classify(&f) {
                FailureClass::Permanent => Transition::Fail(f.to_string()),
                FailureClass::Transient => Transition::Retry(f.to_string()),
            },
        }
    }

    async fn apply<F: Fetcher>(&self, ctx: &WorkerContext<F>, job: &Job) -> Result<Resolution> {
        let now = unix_timestamp();
        match self {
            Transition::Complete(path) => ctx.store.resolve_success(job.claim(), path, now).await,
            Transition::Retry(err) => {
                ctx.store
                    .resolve_retry(job.claim(), err, now, &ctx.policy)
                    .await
            }
            Transition::Fail(err) => ctx.store.resolve_permanent(job.claim(), err, now).await,
        }
    }
}

/// Record the outcome, retrying the store call until it goes through.
/// A store outage is never turned into a job failure.
pub(super) async fn resolve_outcome<F: Fetcher>(
    ctx: &WorkerContext<F>,
    job: &Job,
    outcome: FetchOutcome,
) -> Resolution {
    let transition = Transition::classify(ctx, outcome);
    let resolution = loop {
        match transition.apply(ctx, job).await {
            Ok(r) => break r,
            Err(e) => {
                tracing::warn!(job_id = job.id, "recording outcome failed, retrying: {:#}", e);
                tokio::time::sleep(ctx.settings.store_retry).await;
            }
        }
    };

    match (&resolution, &transition) {
        (Resolution::Completed, Transition::Complete(path)) => {
            tracing::info!(job_id = job.id, result = %path, "job completed")
        }
        (
            Resolution::Rescheduled {
                attempts,
                next_eligible_at,
            },
            Transition::Retry(err),
        ) => tracing::warn!(
            job_id = job.id,
            attempts,
            next_eligible_at,
            "transient failure, rescheduled: {}",
            err
        ),
        (Resolution::Failed, Transition::Retry(err) | Transition::Fail(err)) => {
            tracing::warn!(job_id = job.id, "job failed: {}", err)
        }
        (Resolution::Ignored, _) => {
            tracing::debug!(job_id = job.id, "job no longer claimed, outcome dropped")
        }
        (r, t) => tracing::debug!(job_id = job.id, "resolved {:?} via {:?}", r, t),
    }
    resolution
}
