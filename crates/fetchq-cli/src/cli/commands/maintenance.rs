//! `fetchq purge` and `fetchq retry-failed`.

use anyhow::Result;
use fetchq_core::queue::FetchQueue;

pub async fn run_purge(queue: &FetchQueue) -> Result<()> {
    let n = queue.purge_terminal().await?;
    println!("Purged {n} completed/failed job(s)");
    Ok(())
}

pub async fn run_retry_failed(queue: &FetchQueue) -> Result<()> {
    let n = queue.requeue_failed().await?;
    println!("Requeued {n} failed job(s)");
    Ok(())
}
