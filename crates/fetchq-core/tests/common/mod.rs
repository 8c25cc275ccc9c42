//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod scripted_fetcher;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fetchq_core::job_store::{Job, JobId, JobStatus, JobStore};
use fetchq_core::scheduler::PoolSettings;

/// Pool settings with millisecond polls so tests finish quickly.
pub fn fast_settings(max_concurrent: usize) -> PoolSettings {
    PoolSettings {
        max_concurrent,
        paused_poll: Duration::from_millis(10),
        idle_poll: Duration::from_millis(10),
        store_retry: Duration::from_millis(10),
        fetch_timeout: Duration::from_secs(10),
        heartbeat: Duration::from_secs(1),
        stale_claim_grace: Duration::from_secs(300),
        reconcile_interval: Duration::from_secs(60),
        shutdown_grace: Duration::from_secs(2),
    }
}

/// Poll until the job reaches `status`, panicking after five seconds.
pub async fn wait_for_status(store: &JobStore, id: JobId, status: JobStatus) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = store.get_job(id).await.unwrap().expect("job exists");
        if job.status == status {
            return job;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("job {id} stuck in {} waiting for {status}", job.status);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until `cond` holds, panicking after five seconds.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Current time as Unix seconds, matching the store's timestamps.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}
