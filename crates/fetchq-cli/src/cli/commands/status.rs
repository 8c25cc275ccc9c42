//! `fetchq status` – per-status counts and an optional job listing.

use anyhow::Result;
use fetchq_core::job_store::{Job, JobStatus};
use fetchq_core::queue::FetchQueue;

fn detail(job: &Job) -> &str {
    match job.status {
        JobStatus::Completed => job.result_path.as_deref().unwrap_or("-"),
        _ => job.last_error.as_deref().unwrap_or("-"),
    }
}

pub async fn run_status(queue: &FetchQueue, list: Option<JobStatus>, limit: u32) -> Result<()> {
    let summary = queue.status_summary().await?;
    for status in JobStatus::ALL {
        println!("{:<10} {}", status.as_str(), summary.get(status));
    }

    if let Some(status) = list {
        let jobs = queue.list_by_status(status, limit).await?;
        if jobs.is_empty() {
            println!("\nNo {status} jobs.");
            return Ok(());
        }
        println!("\n{:<6} {:<9} {:<8} {}", "ID", "STATUS", "ATTEMPTS", "LOCATOR");
        for j in jobs {
            println!(
                "{:<6} {:<9} {:<8} {}  [{}]",
                j.id,
                j.status.as_str(),
                j.attempts,
                j.locator,
                detail(&j)
            );
        }
    }
    Ok(())
}
