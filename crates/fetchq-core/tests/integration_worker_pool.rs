//! Integration tests: worker pool against an on-disk job store with a
//! scripted fetcher standing in for the external fetch.

mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::scripted_fetcher::{ScriptedFetcher, Step};
use common::{fast_settings, now_secs, wait_for_status, wait_until};
use fetchq_core::dedup::Admission;
use fetchq_core::governor::{ConcurrencyGovernor, LoadSample};
use fetchq_core::job_store::{JobId, JobStatus, JobStore, Resolution};
use fetchq_core::monitor::ResourceMonitor;
use fetchq_core::queue::FetchQueue;
use fetchq_core::retry::{ErrorKind, PatternClassifier, RetryPolicy};
use fetchq_core::scheduler::WorkerPool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::ConnectOptions;
use tempfile::{tempdir, TempDir};

async fn open_store() -> (TempDir, JobStore) {
    let dir = tempdir().unwrap();
    let store = JobStore::open_at(dir.path().join("jobs.db")).await.unwrap();
    (dir, store)
}

async fn submit(queue: &FetchQueue, locator: &str) -> JobId {
    match queue.submit(locator).await.unwrap() {
        Admission::Admitted(id) => id,
        Admission::Rejected(id) => panic!("{locator} rejected as duplicate of {id}"),
    }
}

fn no_backoff(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries, Duration::ZERO)
}

#[tokio::test]
async fn pool_completes_all_jobs_within_concurrency() {
    let (dir, store) = open_store().await;
    let queue = FetchQueue::new(store.clone());
    let fetcher = ScriptedFetcher::new();
    let mut ids = Vec::new();
    for i in 0..6 {
        let locator = format!("https://example.com/v/{i}");
        fetcher.script(&locator, [Step::Sleep(Duration::from_millis(30))]);
        ids.push(submit(&queue, &locator).await);
    }

    let pool = WorkerPool::new(store.clone(), fetcher.clone(), fast_settings(2))
        .with_output_dir(dir.path())
        .start()
        .await
        .unwrap();
    for &id in &ids {
        let job = wait_for_status(&store, id, JobStatus::Completed).await;
        assert_eq!(
            job.result_path.as_deref(),
            Some(dir.path().join(id.to_string()).display().to_string().as_str())
        );
        assert_eq!(job.attempts, 0);
    }
    let report = pool.shutdown().await;
    assert_eq!(report.abandoned, 0);

    assert_eq!(fetcher.calls().len(), 6);
    assert!(fetcher.max_in_flight() <= 2);
}

#[tokio::test]
async fn transient_failures_retry_then_complete() {
    let (_dir, store) = open_store().await;
    let queue = FetchQueue::new(store.clone());
    let fetcher = ScriptedFetcher::new();
    let locator = "https://example.com/flaky";
    fetcher.script(
        locator,
        [
            Step::Fail(ErrorKind::Connection, "connection reset".into()),
            Step::Fail(ErrorKind::Timeout, "read timed out".into()),
            Step::Succeed("/data/flaky.mp4".into()),
        ],
    );
    let id = submit(&queue, locator).await;

    let pool = WorkerPool::new(store.clone(), fetcher.clone(), fast_settings(1))
        .with_policy(no_backoff(3))
        .start()
        .await
        .unwrap();
    let job = wait_for_status(&store, id, JobStatus::Completed).await;
    pool.shutdown().await;

    assert_eq!(job.attempts, 2);
    assert_eq!(job.result_path.as_deref(), Some("/data/flaky.mp4"));
    assert!(job.last_error.unwrap().contains("read timed out"));
    assert_eq!(fetcher.calls_for(locator), vec![0, 1, 2]);
}

#[tokio::test]
async fn exhausted_retries_end_failed() {
    let (_dir, store) = open_store().await;
    let queue = FetchQueue::new(store.clone());
    let fetcher = ScriptedFetcher::new();
    let locator = "https://example.com/down";
    fetcher.script(
        locator,
        (0..5).map(|_| Step::Fail(ErrorKind::Connection, "refused".into())),
    );
    let id = submit(&queue, locator).await;

    let pool = WorkerPool::new(store.clone(), fetcher.clone(), fast_settings(2))
        .with_policy(no_backoff(1))
        .start()
        .await
        .unwrap();
    let job = wait_for_status(&store, id, JobStatus::Failed).await;
    // Give idle workers a chance to (wrongly) pick it up again.
    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.shutdown().await;

    assert_eq!(job.attempts, 1);
    assert_eq!(job.next_eligible_at, None);
    assert_eq!(fetcher.calls_for(locator), vec![0, 1]);
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let (_dir, store) = open_store().await;
    let queue = FetchQueue::new(store.clone());
    let fetcher = ScriptedFetcher::new();
    let locator = "https://example.com/private";
    fetcher.script(
        locator,
        [Step::Fail(ErrorKind::Other, "ERROR: Private video. Sign in".into())],
    );
    let id = submit(&queue, locator).await;

    let pool = WorkerPool::new(store.clone(), fetcher.clone(), fast_settings(1))
        .with_policy(no_backoff(5))
        .with_classifier(Arc::new(PatternClassifier::new(["private video"])))
        .start()
        .await
        .unwrap();
    let job = wait_for_status(&store, id, JobStatus::Failed).await;
    pool.shutdown().await;

    assert_eq!(job.attempts, 0);
    assert!(job.last_error.unwrap().contains("Private video"));
    assert_eq!(fetcher.calls_for(locator).len(), 1);
}

#[tokio::test]
async fn panic_and_empty_result_count_as_transient() {
    let (_dir, store) = open_store().await;
    let queue = FetchQueue::new(store.clone());
    let fetcher = ScriptedFetcher::new();
    let panics = "https://example.com/panics";
    let empty = "https://example.com/empty";
    fetcher.script(panics, [Step::Panic]);
    fetcher.script(empty, [Step::Succeed(String::new())]);
    let a = submit(&queue, panics).await;
    let b = submit(&queue, empty).await;

    let pool = WorkerPool::new(store.clone(), fetcher.clone(), fast_settings(2))
        .with_policy(no_backoff(3))
        .start()
        .await
        .unwrap();
    let ja = wait_for_status(&store, a, JobStatus::Completed).await;
    let jb = wait_for_status(&store, b, JobStatus::Completed).await;
    pool.shutdown().await;

    assert_eq!(ja.attempts, 1);
    assert!(ja.last_error.unwrap().contains("panicked"));
    assert_eq!(jb.attempts, 1);
}

#[tokio::test]
async fn timed_out_fetch_is_retried() {
    let (_dir, store) = open_store().await;
    let queue = FetchQueue::new(store.clone());
    let fetcher = ScriptedFetcher::new();
    let locator = "https://example.com/slow";
    fetcher.script(locator, [Step::Hang]);
    let id = submit(&queue, locator).await;

    let mut settings = fast_settings(1);
    settings.fetch_timeout = Duration::from_millis(100);
    let pool = WorkerPool::new(store.clone(), fetcher.clone(), settings)
        .with_policy(no_backoff(2))
        .start()
        .await
        .unwrap();
    let job = wait_for_status(&store, id, JobStatus::Completed).await;
    pool.shutdown().await;

    assert_eq!(job.attempts, 1);
    assert!(job.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn pause_mid_fetch_blocks_new_claims_only() {
    let (_dir, store) = open_store().await;
    let queue = FetchQueue::new(store.clone());
    let fetcher = ScriptedFetcher::new();
    let release = Arc::new(tokio::sync::Notify::new());
    let first = "https://example.com/long";
    let second = "https://example.com/next";
    fetcher.script(first, [Step::WaitFor(Arc::clone(&release))]);
    let a = submit(&queue, first).await;

    let pool = WorkerPool::new(store.clone(), fetcher.clone(), fast_settings(2))
        .with_pause(queue.pause_controller())
        .start()
        .await
        .unwrap();
    wait_for_status(&store, a, JobStatus::Claimed).await;

    assert!(queue.pause());
    // Let every idle worker observe the pause before new work arrives.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let b = submit(&queue, second).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.get_job(b).await.unwrap().unwrap().status, JobStatus::Pending);

    // The in-flight job still resolves while paused.
    release.notify_one();
    wait_for_status(&store, a, JobStatus::Completed).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.get_job(b).await.unwrap().unwrap().status, JobStatus::Pending);
    assert!(fetcher.calls_for(second).is_empty());

    queue.resume();
    wait_for_status(&store, b, JobStatus::Completed).await;
    pool.shutdown().await;
}

#[tokio::test]
async fn low_capacity_pauses_until_recovery() {
    let (_dir, store) = open_store().await;
    let queue = FetchQueue::new(store.clone());
    let fetcher = ScriptedFetcher::new();
    let free = Arc::new(AtomicU64::new(0));
    let probe_free = Arc::clone(&free);
    let probe = move || -> anyhow::Result<u64> { Ok(probe_free.load(Ordering::SeqCst)) };
    let monitor = Arc::new(
        ResourceMonitor::new(Arc::new(probe), 1_000).with_interval(Duration::from_millis(20)),
    );
    let id = submit(&queue, "https://example.com/big").await;

    let pool = WorkerPool::new(store.clone(), fetcher.clone(), fast_settings(1))
        .with_pause(queue.pause_controller())
        .with_monitor(monitor)
        .start()
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(queue.is_paused());
    assert_eq!(store.get_job(id).await.unwrap().unwrap().status, JobStatus::Pending);

    free.store(10_000, Ordering::SeqCst);
    wait_for_status(&store, id, JobStatus::Completed).await;
    assert!(!queue.is_paused());
    pool.shutdown().await;
}

#[tokio::test]
async fn abandoned_claim_is_recovered_on_restart() {
    let (_dir, store) = open_store().await;
    let queue = FetchQueue::new(store.clone());
    let fetcher = ScriptedFetcher::new();
    let locator = "https://example.com/stuck";
    fetcher.script(locator, [Step::Hang]);
    let id = submit(&queue, locator).await;

    let mut settings = fast_settings(1);
    settings.shutdown_grace = Duration::from_millis(100);
    let pool = WorkerPool::new(store.clone(), fetcher.clone(), settings.clone())
        .start()
        .await
        .unwrap();
    wait_for_status(&store, id, JobStatus::Claimed).await;
    let report = pool.shutdown().await;
    assert_eq!(report.abandoned, 1);

    // Left claimed, attempts untouched.
    let job = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Claimed);
    assert_eq!(job.attempts, 0);

    // A restart with a zero grace treats the claim as stale and reruns it.
    settings.stale_claim_grace = Duration::ZERO;
    let pool = WorkerPool::new(store.clone(), fetcher.clone(), settings)
        .start()
        .await
        .unwrap();
    let job = wait_for_status(&store, id, JobStatus::Completed).await;
    pool.shutdown().await;
    assert_eq!(job.attempts, 0);
    assert_eq!(fetcher.calls_for(locator).len(), 2);
}

#[tokio::test]
async fn two_pools_on_one_store_never_double_fetch() {
    let (_dir, store) = open_store().await;
    let queue = FetchQueue::new(store.clone());
    let fetcher = ScriptedFetcher::new();
    let mut ids = Vec::new();
    for i in 0..20 {
        ids.push(submit(&queue, &format!("https://example.com/item/{i}")).await);
    }

    let p1 = WorkerPool::new(store.clone(), fetcher.clone(), fast_settings(3))
        .start()
        .await
        .unwrap();
    let p2 = WorkerPool::new(store.clone(), fetcher.clone(), fast_settings(3))
        .start()
        .await
        .unwrap();
    for &id in &ids {
        wait_for_status(&store, id, JobStatus::Completed).await;
    }
    p1.shutdown().await;
    p2.shutdown().await;

    let mut fetched: Vec<_> = fetcher.calls().into_iter().map(|c| c.job_id).collect();
    fetched.sort_unstable();
    assert_eq!(fetched, ids);
}

#[tokio::test]
async fn jobs_survive_store_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("jobs.db");
    let id = {
        let store = JobStore::open_at(&path).await.unwrap();
        let queue = FetchQueue::new(store.clone());
        let id = submit(&queue, "https://example.com/persisted").await;
        store.close().await;
        id
    };

    let store = JobStore::open_at(&path).await.unwrap();
    let queue = FetchQueue::new(store.clone());
    assert_eq!(
        queue.submit("https://example.com/persisted/").await.unwrap(),
        Admission::Rejected(id)
    );
    let pool = WorkerPool::new(store.clone(), ScriptedFetcher::new(), fast_settings(1))
        .start()
        .await
        .unwrap();
    wait_for_status(&store, id, JobStatus::Completed).await;
    pool.shutdown().await;
}

#[tokio::test]
async fn reclaimed_job_aborts_the_stale_fetch() {
    let (_dir, store) = open_store().await;
    let queue = FetchQueue::new(store.clone());
    let fetcher = ScriptedFetcher::new();
    let locator = "https://example.com/wedged";
    fetcher.script(locator, [Step::Hang]);
    let id = submit(&queue, locator).await;

    let mut settings = fast_settings(1);
    settings.heartbeat = Duration::from_millis(20);
    let pool = WorkerPool::new(store.clone(), fetcher.clone(), settings)
        .with_pause(queue.pause_controller())
        .start()
        .await
        .unwrap();
    wait_for_status(&store, id, JobStatus::Claimed).await;
    wait_until("fetch to start", || fetcher.in_flight() == 1).await;

    // Keep the worker from claiming again, then hand the job to a new owner
    // the way another process's reconciliation would.
    queue.pause();
    let later = now_secs() + 1_000;
    assert_eq!(
        store
            .reconcile_stale_claims(later, Duration::from_secs(300))
            .await
            .unwrap(),
        1
    );
    let owner = store.claim_next(later).await.unwrap().unwrap();

    // The worker's heartbeat notices and drops its fetch without recording anything.
    wait_until("stale fetch to be aborted", || fetcher.in_flight() == 0).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let job = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Claimed);
    assert_eq!(job.claim_seq, owner.claim_seq);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.last_error, None);

    assert_eq!(
        store
            .resolve_success(owner.claim(), "/data/wedged.mp4", later)
            .await
            .unwrap(),
        Resolution::Completed
    );
    pool.shutdown().await;
    assert_eq!(fetcher.calls_for(locator).len(), 1);
}

#[tokio::test]
async fn store_outage_delays_but_never_fails_a_job() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("jobs.db");
    let store = JobStore::open_with_busy_timeout(&path, Duration::from_millis(20))
        .await
        .unwrap();
    let queue = FetchQueue::new(store.clone());
    let fetcher = ScriptedFetcher::new();
    let release = Arc::new(tokio::sync::Notify::new());
    let locator = "https://example.com/during-outage";
    fetcher.script(locator, [Step::WaitFor(Arc::clone(&release))]);
    let id = submit(&queue, locator).await;

    // Two workers: one holds the claim, the other keeps polling for work and
    // runs into the outage on its claim attempts.
    let pool = WorkerPool::new(store.clone(), fetcher.clone(), fast_settings(2))
        .with_policy(no_backoff(0))
        .start()
        .await
        .unwrap();
    wait_for_status(&store, id, JobStatus::Claimed).await;

    // Another connection holds the write lock; every store write now fails busy.
    let mut locker = SqliteConnectOptions::new()
        .filename(&path)
        .journal_mode(SqliteJournalMode::Wal)
        .connect()
        .await
        .unwrap();
    sqlx::query("BEGIN EXCLUSIVE")
        .execute(&mut locker)
        .await
        .unwrap();

    release.notify_one();
    wait_until("fetch to finish", || {
        fetcher.calls_for(locator).len() == 1 && fetcher.in_flight() == 0
    })
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The outcome is waiting on the store, not recorded as a failure.
    let job = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Claimed);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.last_error, None);

    sqlx::query("ROLLBACK").execute(&mut locker).await.unwrap();
    let job = wait_for_status(&store, id, JobStatus::Completed).await;
    pool.shutdown().await;

    assert_eq!(job.attempts, 0);
    assert_eq!(job.last_error, None);
    assert_eq!(fetcher.calls_for(locator).len(), 1);
}

#[tokio::test]
async fn governor_limits_fetches_under_pressure() {
    let (_dir, store) = open_store().await;
    let queue = FetchQueue::new(store.clone());
    let fetcher = ScriptedFetcher::new();
    let cpu = Arc::new(AtomicU64::new(100));
    let probe_cpu = Arc::clone(&cpu);
    let probe = move || -> anyhow::Result<LoadSample> {
        Ok(LoadSample {
            cpu_percent: probe_cpu.load(Ordering::SeqCst) as f64,
            disk_percent: 10.0,
        })
    };
    let governor = Arc::new(
        ConcurrencyGovernor::new(Arc::new(probe), 1, 3)
            .with_thresholds(80.0, 90.0)
            .with_interval(Duration::from_millis(10)),
    );

    let mut busy = Vec::new();
    for i in 0..4 {
        let locator = format!("https://example.com/busy/{i}");
        fetcher.script(&locator, [Step::Sleep(Duration::from_millis(30))]);
        busy.push(submit(&queue, &locator).await);
    }
    let pool = WorkerPool::new(store.clone(), fetcher.clone(), fast_settings(3))
        .with_governor(Arc::clone(&governor))
        .start()
        .await
        .unwrap();
    for &id in &busy {
        wait_for_status(&store, id, JobStatus::Completed).await;
    }
    assert_eq!(governor.target(), 1);
    assert_eq!(fetcher.max_in_flight(), 1);

    // Load drops: the governor widens to three slots and all three run at once.
    cpu.store(10, Ordering::SeqCst);
    wait_until("governor to widen", || governor.target() == 3).await;
    let mut gates = Vec::new();
    let mut calm = Vec::new();
    for i in 0..3 {
        let gate = Arc::new(tokio::sync::Notify::new());
        let locator = format!("https://example.com/calm/{i}");
        fetcher.script(&locator, [Step::WaitFor(Arc::clone(&gate))]);
        calm.push(submit(&queue, &locator).await);
        gates.push(gate);
    }
    wait_until("three concurrent fetches", || fetcher.in_flight() == 3).await;
    for gate in &gates {
        gate.notify_one();
    }
    for &id in &calm {
        wait_for_status(&store, id, JobStatus::Completed).await;
    }
    pool.shutdown().await;
    assert_eq!(fetcher.max_in_flight(), 3);
}
