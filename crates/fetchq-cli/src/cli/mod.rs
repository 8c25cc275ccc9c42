//! CLI for the fetchq download queue.

mod commands;
mod control_socket;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fetchq_core::config;
use fetchq_core::dedup::RuleIdentity;
use fetchq_core::job_store::{JobId, JobStatus, JobStore};
use fetchq_core::queue::FetchQueue;
use std::path::PathBuf;
use std::sync::Arc;

use commands::{
    run_add, run_pause, run_pool, run_purge, run_remove, run_resume, run_retry_failed,
    run_status,
};

/// Top-level CLI for the fetchq download queue.
#[derive(Debug, Parser)]
#[command(name = "fetchq")]
#[command(about = "fetchq: durable download queue with a bounded worker pool", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Queue one or more locators (duplicates are reported, not added).
    Add {
        /// Locators (URLs) to fetch.
        #[arg(required = true, num_args = 1..)]
        locators: Vec<String>,
    },

    /// Run the worker pool until interrupted (Ctrl-C).
    Run {
        /// Number of workers (overrides `max_concurrent` from the config).
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,
        /// Directory results are written to (overrides `download_dir`).
        #[arg(long, value_name = "DIR")]
        download_dir: Option<PathBuf>,
    },

    /// Show job counts per status, optionally listing jobs in one status.
    Status {
        /// List jobs in this status (pending, claimed, completed, failed).
        #[arg(long, value_name = "STATUS")]
        list: Option<JobStatus>,
        /// Maximum number of jobs to list.
        #[arg(long, default_value = "20", value_name = "N")]
        limit: u32,
    },

    /// Pause a running pool: no new jobs are claimed.
    Pause,

    /// Resume a paused pool (refused while free space is below the floor).
    Resume {
        /// Resume even if free space is still below the floor.
        #[arg(long)]
        force: bool,
    },

    /// Delete all completed and failed jobs.
    Purge,

    /// Put every failed job back in the queue with a fresh retry budget.
    RetryFailed,

    /// Remove one job by ID (refused while a worker holds it).
    Remove {
        /// Job identifier.
        id: JobId,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        // Pause/resume only talk to a running pool; no store needed.
        match cli.command {
            CliCommand::Pause => return run_pause().await,
            CliCommand::Resume { force } => return run_resume(force).await,
            _ => {}
        }

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let store = JobStore::open_default().await?;
        let queue = FetchQueue::new(store)
            .with_identity(Arc::new(RuleIdentity::from_config(&cfg.identity)));

        match cli.command {
            CliCommand::Add { locators } => run_add(&queue, &locators).await?,
            CliCommand::Run { jobs, download_dir } => {
                run_pool(queue.clone(), cfg, jobs, download_dir).await?
            }
            CliCommand::Status { list, limit } => run_status(&queue, list, limit).await?,
            CliCommand::Purge => run_purge(&queue).await?,
            CliCommand::RetryFailed => run_retry_failed(&queue).await?,
            CliCommand::Remove { id } => run_remove(&queue, id).await?,
            CliCommand::Pause | CliCommand::Resume { .. } => {}
        }

        queue.store().close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
