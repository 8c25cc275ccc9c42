//! `fetchq add <locator>...` – queue locators through the dedup gate.

use anyhow::Result;
use fetchq_core::dedup::Admission;
use fetchq_core::queue::FetchQueue;

pub async fn run_add(queue: &FetchQueue, locators: &[String]) -> Result<()> {
    for locator in locators {
        match queue.submit(locator).await? {
            Admission::Admitted(id) => println!("Added job {id}: {locator}"),
            Admission::Rejected(existing) => {
                println!("Skipped {locator}: duplicate of job {existing}")
            }
        }
    }
    Ok(())
}
