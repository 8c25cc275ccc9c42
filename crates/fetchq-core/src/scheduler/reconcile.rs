//! Periodic stale-claim reconciliation.

use std::time::Duration;
use tokio::sync::watch;

use crate::job_store::{unix_timestamp, JobStore};

/// One pass; returns how many claims went back to pending (0 on store error).
pub(super) async fn reconcile_once(store: &JobStore, grace: Duration) -> u64 {
    match store.reconcile_stale_claims(unix_timestamp(), grace).await {
        Ok(0) => 0,
        Ok(n) => {
            tracing::info!(count = n, "returned stale claims to pending");
            n
        }
        Err(e) => {
            tracing::warn!("stale-claim reconciliation failed: {:#}", e);
            0
        }
    }
}

pub(super) async fn reconcile_loop(
    store: JobStore,
    grace: Duration,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            r = stop.changed() => {
                if r.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
        reconcile_once(&store, grace).await;
    }
}
