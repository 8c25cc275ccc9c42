//! Deduplication gate.
//!
//! A locator is admitted unless an existing job (in any status) shares its
//! dedup hash or its identity key. The hash catches exact and near-duplicate
//! URLs; the identity key catches different URLs for the same content.

mod identity;
mod normalize;

use anyhow::Result;

use crate::job_store::{Insertion, JobId, JobStore, NewJob};

pub use identity::{IdentityExtractor, NoIdentity, RuleIdentity};
pub use normalize::{locator_hash, normalize_locator};

/// Verdict of a read-only admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Admit,
    Reject(JobId),
}

/// Outcome of a submission through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// New job created with this id.
    Admitted(JobId),
    /// Duplicate of the existing job with this id.
    Rejected(JobId),
}

impl Admission {
    pub fn job_id(self) -> JobId {
        match self {
            Admission::Admitted(id) | Admission::Rejected(id) => id,
        }
    }

    pub fn is_admitted(self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}

/// Read-only check: would a job with these keys be admitted?
pub async fn check(
    store: &JobStore,
    dedup_hash: Option<&str>,
    identity_key: Option<&str>,
) -> Result<Verdict> {
    Ok(match store.find_duplicate(dedup_hash, identity_key).await? {
        Some(id) => Verdict::Reject(id),
        None => Verdict::Admit,
    })
}

/// Check and insert in one atomic store operation.
pub async fn admit(store: &JobStore, job: &NewJob) -> Result<Admission> {
    Ok(match store.insert_unless_duplicate(job).await? {
        Insertion::Inserted(job) => Admission::Admitted(job.id),
        Insertion::Duplicate(id) => Admission::Rejected(id),
    })
}
