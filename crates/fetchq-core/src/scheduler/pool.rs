//! Pool construction, startup and shutdown.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::control::PauseController;
use crate::fetch::Fetcher;
use crate::governor::ConcurrencyGovernor;
use crate::job_store::{unix_timestamp, JobStore};
use crate::monitor::ResourceMonitor;
use crate::retry::{FailureClassifier, PatternClassifier, RetryPolicy};

use super::reconcile::reconcile_loop;
use super::slots::FetchSlots;
use super::worker::{worker_loop, WorkerContext};
use super::PoolSettings;

/// Builder for a running pool of workers over one job store.
pub struct WorkerPool<F: Fetcher> {
    store: JobStore,
    fetcher: Arc<F>,
    classifier: Arc<dyn FailureClassifier>,
    policy: RetryPolicy,
    pause: Arc<PauseController>,
    monitor: Option<Arc<ResourceMonitor>>,
    governor: Option<Arc<ConcurrencyGovernor>>,
    settings: PoolSettings,
    output_dir: PathBuf,
}

impl<F: Fetcher> WorkerPool<F> {
    pub fn new(store: JobStore, fetcher: F, settings: PoolSettings) -> Self {
        Self {
            store,
            fetcher: Arc::new(fetcher),
            classifier: Arc::new(PatternClassifier::default()),
            policy: RetryPolicy::default(),
            pause: Arc::new(PauseController::new()),
            monitor: None,
            governor: None,
            settings,
            output_dir: PathBuf::from("."),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Share a pause gate (e.g. the one a `FetchQueue` exposes to operators).
    pub fn with_pause(mut self, pause: Arc<PauseController>) -> Self {
        self.pause = pause;
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<ResourceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Let a governor narrow the number of concurrent fetches below
    /// `max_concurrent`. The pool runs its sampling loop.
    pub fn with_governor(mut self, governor: Arc<ConcurrencyGovernor>) -> Self {
        self.governor = Some(governor);
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Reconcile stale claims, take a first capacity reading, then spawn the
    /// workers and background tasks.
    pub async fn start(self) -> Result<PoolHandle> {
        let recovered = self
            .store
            .reconcile_stale_claims(unix_timestamp(), self.settings.stale_claim_grace)
            .await
            .context("startup reconciliation")?;
        if recovered > 0 {
            tracing::info!(count = recovered, "recovered stale claims at startup");
        }
        if let Some(monitor) = &self.monitor {
            monitor.check(&self.pause);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let shutdown_grace = self.settings.shutdown_grace;
        let workers_n = self.settings.max_concurrent.max(1);

        let mut background = JoinSet::new();
        background.spawn(reconcile_loop(
            self.store.clone(),
            self.settings.stale_claim_grace,
            self.settings.reconcile_interval,
            stop_rx.clone(),
        ));
        if let Some(monitor) = self.monitor {
            let pause = Arc::clone(&self.pause);
            let stop = stop_rx.clone();
            background.spawn(async move { monitor.run(pause, stop).await });
        }
        if let Some(governor) = &self.governor {
            let governor = Arc::clone(governor);
            let stop = stop_rx.clone();
            background.spawn(async move { governor.run(stop).await });
        }

        let ctx = Arc::new(WorkerContext {
            store: self.store,
            fetcher: self.fetcher,
            classifier: self.classifier,
            policy: self.policy,
            pause: Arc::clone(&self.pause),
            slots: FetchSlots::new(workers_n, self.governor),
            settings: self.settings,
            output_dir: self.output_dir,
        });
        let mut workers = JoinSet::new();
        for worker in 0..workers_n {
            workers.spawn(worker_loop(worker, Arc::clone(&ctx), stop_rx.clone()));
        }
        tracing::info!(workers = workers_n, "worker pool started");

        Ok(PoolHandle {
            stop_tx,
            workers,
            background,
            pause: self.pause,
            shutdown_grace,
        })
    }
}

/// What happened to the workers at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that finished within the grace period.
    pub drained: usize,
    /// Workers aborted mid-fetch; their jobs stay claimed until reconciled.
    pub abandoned: usize,
}

/// Handle to a running pool.
pub struct PoolHandle {
    stop_tx: watch::Sender<bool>,
    workers: JoinSet<()>,
    background: JoinSet<()>,
    pause: Arc<PauseController>,
    shutdown_grace: std::time::Duration,
}

impl PoolHandle {
    pub fn pause_controller(&self) -> Arc<PauseController> {
        Arc::clone(&self.pause)
    }

    /// Number of worker loops still running.
    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    /// Stop claiming, give in-flight fetches `shutdown_grace` to finish, then
    /// abort whatever is left.
    pub async fn shutdown(mut self) -> ShutdownReport {
        let _ = self.stop_tx.send(true);
        let total = self.workers.len();
        let mut drained = 0usize;

        let workers = &mut self.workers;
        let drain = async {
            while let Some(res) = workers.join_next().await {
                if let Err(e) = res {
                    tracing::warn!("worker task ended abnormally: {}", e);
                }
                drained += 1;
            }
        };
        if tokio::time::timeout(self.shutdown_grace, drain).await.is_err() {
            tracing::warn!(
                remaining = self.workers.len(),
                "shutdown grace elapsed, abandoning in-flight fetches"
            );
            self.workers.abort_all();
            while self.workers.join_next().await.is_some() {}
        }

        self.background.abort_all();
        while self.background.join_next().await.is_some() {}

        let report = ShutdownReport {
            drained,
            abandoned: total - drained,
        };
        tracing::info!(
            drained = report.drained,
            abandoned = report.abandoned,
            "worker pool stopped"
        );
        report
    }
}
