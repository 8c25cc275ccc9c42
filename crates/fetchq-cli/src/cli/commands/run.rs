//! `fetchq run` – run the worker pool until Ctrl-C.

use anyhow::{Context, Result};
use fetchq_core::config::FetchqConfig;
use fetchq_core::fetch::CommandFetcher;
use fetchq_core::governor::{ConcurrencyGovernor, SystemLoadProbe};
use fetchq_core::monitor::{DiskSpaceProbe, ResourceMonitor};
use fetchq_core::queue::FetchQueue;
use fetchq_core::retry::PatternClassifier;
use fetchq_core::scheduler::{PoolSettings, WorkerPool};
use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::control_socket;

pub async fn run_pool(
    queue: FetchQueue,
    mut cfg: FetchqConfig,
    jobs: Option<usize>,
    download_dir: Option<PathBuf>,
) -> Result<()> {
    if let Some(n) = jobs {
        cfg.max_concurrent = n;
        cfg.governor.min_concurrent = cfg.governor.min_concurrent.min(n);
        cfg.validate()?;
    }
    let download_dir = match download_dir.or_else(|| cfg.download_dir.clone()) {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    tokio::fs::create_dir_all(&download_dir)
        .await
        .with_context(|| format!("create download dir: {}", download_dir.display()))?;

    let monitor = Arc::new(ResourceMonitor::from_config(
        Arc::new(DiskSpaceProbe::new(&download_dir)),
        &cfg.monitor,
    ));
    let queue = queue.with_monitor(Arc::clone(&monitor));

    let mut pool = WorkerPool::new(
        queue.store().clone(),
        CommandFetcher::from_config(&cfg.fetch),
        PoolSettings::from_config(&cfg),
    )
    .with_classifier(Arc::new(PatternClassifier::new(
        &cfg.fetch.permanent_error_patterns,
    )))
    .with_policy(cfg.retry.policy())
    .with_pause(queue.pause_controller())
    .with_monitor(monitor)
    .with_output_dir(&download_dir);
    if cfg.governor.enabled {
        pool = pool.with_governor(Arc::new(ConcurrencyGovernor::from_config(
            Arc::new(SystemLoadProbe::new(&download_dir)),
            &cfg.governor,
            cfg.max_concurrent,
        )));
    }
    let pool = pool.start().await?;

    let socket_path = fetchq_core::control::default_control_socket_path().ok();
    let listener = match &socket_path {
        Some(path) => match control_socket::spawn_control_listener(queue.clone(), path) {
            Ok(handle) => {
                tracing::debug!(path = %path.display(), "control socket listening");
                Some(handle)
            }
            Err(e) => {
                tracing::warn!("control socket unavailable: {:#}", e);
                None
            }
        },
        None => None,
    };

    let listening = listener.is_some();
    let summary = queue.status_summary().await?;
    println!(
        "Running {} worker(s) into {} ({} pending). Ctrl-C to stop.",
        cfg.max_concurrent,
        download_dir.display(),
        summary.pending
    );

    tokio::signal::ctrl_c()
        .await
        .context("wait for Ctrl-C")?;
    println!("Stopping: waiting up to {}s for in-flight fetches...", cfg.worker.shutdown_grace_secs);

    let report = pool.shutdown().await;
    if let Some(handle) = listener {
        handle.abort();
    }
    // Only remove the socket this process bound; another `run` may own it.
    if let (Some(path), true) = (socket_path, listening) {
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::debug!(path = %path.display(), "remove control socket: {}", e);
        }
    }
    if report.abandoned > 0 {
        println!(
            "Abandoned {} in-flight fetch(es); they will be retried after the stale-claim grace.",
            report.abandoned
        );
    }
    Ok(())
}
