//! Queue facade: the surface producers and operators talk to.
//!
//! Wraps the job store with the dedup gate on the way in and the pause
//! controller for operator commands.

use anyhow::{bail, Result};
use std::sync::Arc;

use crate::control::{CapacityStatus, PauseController, ResumeOutcome};
use crate::dedup::{self, locator_hash, Admission, IdentityExtractor, NoIdentity};
use crate::job_store::{Job, JobId, JobStatus, JobStore, NewJob, StatusSummary};
use crate::monitor::ResourceMonitor;

#[derive(Clone)]
pub struct FetchQueue {
    store: JobStore,
    identity: Arc<dyn IdentityExtractor>,
    pause: Arc<PauseController>,
    monitor: Option<Arc<ResourceMonitor>>,
}

impl FetchQueue {
    pub fn new(store: JobStore) -> Self {
        Self {
            store,
            identity: Arc::new(NoIdentity),
            pause: Arc::new(PauseController::new()),
            monitor: None,
        }
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityExtractor>) -> Self {
        self.identity = identity;
        self
    }

    /// Monitor consulted by [`FetchQueue::resume`].
    pub fn with_monitor(mut self, monitor: Arc<ResourceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn pause_controller(&self) -> Arc<PauseController> {
        Arc::clone(&self.pause)
    }

    pub fn monitor(&self) -> Option<Arc<ResourceMonitor>> {
        self.monitor.clone()
    }

    /// Submit a locator. Duplicates (by normalized hash or identity key) are
    /// reported as `Rejected` with the existing job id.
    pub async fn submit(&self, locator: &str) -> Result<Admission> {
        let locator = locator.trim();
        if locator.is_empty() {
            bail!("empty locator");
        }
        let mut job = NewJob::new(locator).with_dedup_hash(locator_hash(locator));
        if let Some(key) = self.identity.identity_key(locator) {
            job = job.with_identity_key(key);
        }

        let admission = dedup::admit(&self.store, &job).await?;
        match admission {
            Admission::Admitted(id) => tracing::info!(job_id = id, locator, "job admitted"),
            Admission::Rejected(existing) => {
                tracing::info!(existing, locator, "duplicate rejected")
            }
        }
        Ok(admission)
    }

    pub async fn status_summary(&self) -> Result<StatusSummary> {
        self.store.summary().await
    }

    pub async fn list_by_status(&self, status: JobStatus, limit: u32) -> Result<Vec<Job>> {
        self.store.list_by_status(status, limit).await
    }

    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        self.store.get_job(id).await
    }

    pub async fn purge_terminal(&self) -> Result<u64> {
        let n = self.store.purge_terminal().await?;
        tracing::info!(removed = n, "purged terminal jobs");
        Ok(n)
    }

    pub async fn requeue_failed(&self) -> Result<u64> {
        let n = self
            .store
            .requeue_failed(crate::job_store::unix_timestamp())
            .await?;
        tracing::info!(requeued = n, "failed jobs requeued");
        Ok(n)
    }

    pub async fn remove_job(&self, id: JobId) -> Result<bool> {
        self.store.remove_job(id).await
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    pub fn pause(&self) -> bool {
        let changed = self.pause.pause();
        if changed {
            tracing::warn!("workers paused by operator");
        }
        changed
    }

    /// Resume after a fresh capacity check; refused while capacity is low.
    pub fn resume(&self) -> ResumeOutcome {
        let capacity = self
            .monitor
            .as_ref()
            .map(|m| m.capacity_status())
            .unwrap_or(CapacityStatus::Unknown);
        let outcome = self.pause.resume(capacity);
        match outcome {
            ResumeOutcome::Resumed => tracing::info!("workers resumed"),
            ResumeOutcome::CapacityLow { available, floor } => {
                tracing::warn!(available, floor, "resume refused: capacity below floor")
            }
            ResumeOutcome::NotPaused => {}
        }
        outcome
    }

    pub fn force_resume(&self) -> ResumeOutcome {
        let outcome = self.pause.force_resume();
        if outcome == ResumeOutcome::Resumed {
            tracing::warn!("workers force-resumed");
        }
        outcome
    }
}
