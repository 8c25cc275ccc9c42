//! Types used by the job store.

use std::fmt;
use std::str::FromStr;

/// Job identifier.
pub type JobId = i64;

/// Lifecycle state of a job, stored as a lowercase string in the database.
///
/// `Pending → Claimed → {Completed | Pending (retry) | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Claimed,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Claimed,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Claimed => "claimed",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Completed and Failed are terminal: nothing resolves them again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "claimed" => Ok(JobStatus::Claimed),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Full job record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub locator: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub created_at: i64,
    pub updated_at: i64,
    pub next_eligible_at: Option<i64>,
    pub result_path: Option<String>,
    pub last_error: Option<String>,
    pub dedup_hash: Option<String>,
    pub identity_key: Option<String>,
    /// Bumped by every claim. Identifies which claim a resolution belongs to.
    pub claim_seq: i64,
}

impl Job {
    /// Token for the claim this record was read under.
    pub fn claim(&self) -> Claim {
        Claim {
            job_id: self.id,
            seq: self.claim_seq,
        }
    }
}

/// Ownership of one claim on a job. Resolutions and heartbeats presented
/// with an outdated token are ignored, so a worker whose claim was
/// reconciled away cannot touch the job's next claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub job_id: JobId,
    pub seq: i64,
}

/// Fields supplied by the producer when a job is created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewJob {
    pub locator: String,
    pub dedup_hash: Option<String>,
    pub identity_key: Option<String>,
}

impl NewJob {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            ..Self::default()
        }
    }

    pub fn with_dedup_hash(mut self, hash: impl Into<String>) -> Self {
        self.dedup_hash = Some(hash.into());
        self
    }

    pub fn with_identity_key(mut self, key: impl Into<String>) -> Self {
        self.identity_key = Some(key.into());
        self
    }
}

/// Job counts per status, used for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub pending: u64,
    pub claimed: u64,
    pub completed: u64,
    pub failed: u64,
}

impl StatusSummary {
    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Claimed => self.claimed,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
        }
    }

    pub(crate) fn set(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Pending => self.pending = count,
            JobStatus::Claimed => self.claimed = count,
            JobStatus::Completed => self.completed = count,
            JobStatus::Failed => self.failed = count,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.claimed + self.completed + self.failed
    }
}

/// What a resolve call did to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Job is now Completed.
    Completed,
    /// Job went back to Pending with a new eligibility time.
    Rescheduled { attempts: u32, next_eligible_at: i64 },
    /// Job is now Failed (permanent error or retries exhausted).
    Failed,
    /// Job was not Claimed (already terminal, or reclaimed); nothing changed.
    Ignored,
}
