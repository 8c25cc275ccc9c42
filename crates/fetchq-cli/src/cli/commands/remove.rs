//! `fetchq remove <id>` – delete one job unless a worker holds it.

use anyhow::{bail, Result};
use fetchq_core::job_store::{JobId, JobStatus};
use fetchq_core::queue::FetchQueue;

pub async fn run_remove(queue: &FetchQueue, id: JobId) -> Result<()> {
    let Some(job) = queue.get_job(id).await? else {
        bail!("no job with id {id}");
    };
    if job.status == JobStatus::Claimed || !queue.remove_job(id).await? {
        bail!("job {id} is being fetched; pause or stop the pool first");
    }
    println!("Removed job {id}");
    Ok(())
}
