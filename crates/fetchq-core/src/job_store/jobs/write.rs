//! Job write operations: insert, claim, resolve, reconcile, purge.
//!
//! Every transition out of `claimed` is guarded on the current status and
//! the claim token, so a duplicate or late resolution (e.g. from an abandoned
//! fetch whose job was since reclaimed) is a no-op.

use anyhow::{bail, Result};
use sqlx::Row;
use std::time::Duration;

use super::super::db::{unix_timestamp, JobStore};
use super::super::types::{Claim, Job, JobId, JobStatus, NewJob, Resolution};
use super::read::job_from_row;
use super::JOB_COLUMNS;
use crate::retry::{RetryDecision, RetryPolicy};

/// Result of an insert that is gated by deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insertion {
    /// New job created.
    Inserted(Job),
    /// A job with the same dedup hash or identity key already exists.
    Duplicate(JobId),
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().filter(|s| !s.is_empty())
}

/// Whole seconds for a backoff delay, rounding sub-second remainders up.
fn delay_secs(d: Duration) -> i64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    i64::try_from(secs).unwrap_or(i64::MAX)
}

impl JobStore {
    /// Insert a new pending job unconditionally (attempts 0).
    pub async fn insert(&self, job: &NewJob) -> Result<Job> {
        let now = unix_timestamp();
        let sql = format!(
            r#"
            INSERT INTO jobs (locator, status, attempts, created_at, updated_at, dedup_hash, identity_key)
            VALUES (?1, 'pending', 0, ?2, ?2, ?3, ?4)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&job.locator)
            .bind(now)
            .bind(non_empty(&job.dedup_hash))
            .bind(non_empty(&job.identity_key))
            .fetch_one(&self.pool)
            .await?;
        job_from_row(&row)
    }

    /// Insert a new pending job unless one (in any status) already carries the
    /// same dedup hash or identity key.
    ///
    /// The existence check and the insert are one statement, so two concurrent
    /// submissions of the same content cannot both be admitted.
    pub async fn insert_unless_duplicate(&self, job: &NewJob) -> Result<Insertion> {
        let sql = format!(
            r#"
            INSERT INTO jobs (locator, status, attempts, created_at, updated_at, dedup_hash, identity_key)
            SELECT ?1, 'pending', 0, ?2, ?2, ?3, ?4
            WHERE NOT EXISTS (SELECT 1 FROM jobs WHERE ?3 IS NOT NULL AND dedup_hash = ?3)
              AND NOT EXISTS (SELECT 1 FROM jobs WHERE ?4 IS NOT NULL AND identity_key = ?4)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let dedup_hash = non_empty(&job.dedup_hash);
        let identity_key = non_empty(&job.identity_key);

        // A duplicate can be purged between the insert and the lookup; retry then.
        for _ in 0..3 {
            let row = sqlx::query(&sql)
                .bind(&job.locator)
                .bind(unix_timestamp())
                .bind(dedup_hash)
                .bind(identity_key)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = row {
                return Ok(Insertion::Inserted(job_from_row(&row)?));
            }
            if let Some(existing) = self.find_duplicate(dedup_hash, identity_key).await? {
                return Ok(Insertion::Duplicate(existing));
            }
        }
        bail!("insert of {} kept racing with concurrent removal", job.locator)
    }

    /// Atomically claim the oldest eligible pending job.
    ///
    /// Eligible means `next_eligible_at` is unset or not after `now`. The
    /// select and the `pending → claimed` transition are a single UPDATE, so
    /// concurrent callers (or processes) never receive the same job.
    pub async fn claim_next(&self, now: i64) -> Result<Option<Job>> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'claimed',
                next_eligible_at = NULL,
                updated_at = ?1,
                claim_seq = claim_seq + 1
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending'
                  AND (next_eligible_at IS NULL OR next_eligible_at <= ?1)
                ORDER BY created_at ASC, id ASC
                LIMIT 1
            )
              AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    /// Mark a claimed job completed with its result location.
    pub async fn resolve_success(
        &self,
        claim: Claim,
        result_path: &str,
        now: i64,
    ) -> Result<Resolution> {
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                result_path = ?1,
                updated_at = ?2
            WHERE id = ?3 AND status = 'claimed' AND claim_seq = ?4
            "#,
        )
        .bind(result_path)
        .bind(now)
        .bind(claim.job_id)
        .bind(claim.seq)
        .execute(&self.pool)
        .await?;
        Ok(if r.rows_affected() == 1 {
            Resolution::Completed
        } else {
            Resolution::Ignored
        })
    }

    /// Record a transient failure on a claimed job.
    ///
    /// With `attempts < max_retries` the job returns to pending with
    /// `attempts + 1` and `next_eligible_at = now + base_delay * 2^attempts`
    /// (pre-increment exponent). Otherwise it becomes failed with no further
    /// eligibility. The update is a compare-and-swap on (status, attempts, claim).
    pub async fn resolve_retry(
        &self,
        claim: Claim,
        error: &str,
        now: i64,
        policy: &RetryPolicy,
    ) -> Result<Resolution> {
        let row = sqlx::query("SELECT status, attempts, claim_seq FROM jobs WHERE id = ?1")
            .bind(claim.job_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(Resolution::Ignored);
        };
        let status: String = row.try_get("status")?;
        let claim_seq: i64 = row.try_get("claim_seq")?;
        if status != JobStatus::Claimed.as_str() || claim_seq != claim.seq {
            return Ok(Resolution::Ignored);
        }
        let attempts: i64 = row.try_get("attempts")?;
        let attempts_u = u32::try_from(attempts).unwrap_or(u32::MAX);

        match policy.decide(attempts_u) {
            RetryDecision::NoRetry => {
                let r = sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'failed',
                        next_eligible_at = NULL,
                        last_error = ?1,
                        updated_at = ?2
                    WHERE id = ?3 AND status = 'claimed' AND attempts = ?4 AND claim_seq = ?5
                    "#,
                )
                .bind(error)
                .bind(now)
                .bind(claim.job_id)
                .bind(attempts)
                .bind(claim.seq)
                .execute(&self.pool)
                .await?;
                Ok(if r.rows_affected() == 1 {
                    Resolution::Failed
                } else {
                    Resolution::Ignored
                })
            }
            RetryDecision::RetryAfter(delay) => {
                let next_eligible_at = now.saturating_add(delay_secs(delay));
                let r = sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'pending',
                        attempts = attempts + 1,
                        next_eligible_at = ?1,
                        last_error = ?2,
                        updated_at = ?3
                    WHERE id = ?4 AND status = 'claimed' AND attempts = ?5 AND claim_seq = ?6
                    "#,
                )
                .bind(next_eligible_at)
                .bind(error)
                .bind(now)
                .bind(claim.job_id)
                .bind(attempts)
                .bind(claim.seq)
                .execute(&self.pool)
                .await?;
                Ok(if r.rows_affected() == 1 {
                    Resolution::Rescheduled {
                        attempts: attempts_u.saturating_add(1),
                        next_eligible_at,
                    }
                } else {
                    Resolution::Ignored
                })
            }
        }
    }

    /// Record a permanent failure: failed immediately, whatever `attempts` is.
    pub async fn resolve_permanent(
        &self,
        claim: Claim,
        error: &str,
        now: i64,
    ) -> Result<Resolution> {
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                next_eligible_at = NULL,
                last_error = ?1,
                updated_at = ?2
            WHERE id = ?3 AND status = 'claimed' AND claim_seq = ?4
            "#,
        )
        .bind(error)
        .bind(now)
        .bind(claim.job_id)
        .bind(claim.seq)
        .execute(&self.pool)
        .await?;
        Ok(if r.rows_affected() == 1 {
            Resolution::Failed
        } else {
            Resolution::Ignored
        })
    }

    /// Refresh `updated_at` on a claimed job so reconciliation sees it as live.
    /// Returns false if this claim no longer owns the job.
    pub async fn touch_claim(&self, claim: Claim, now: i64) -> Result<bool> {
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET updated_at = ?1
            WHERE id = ?2 AND status = 'claimed' AND claim_seq = ?3
            "#,
        )
        .bind(now)
        .bind(claim.job_id)
        .bind(claim.seq)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    /// Return claimed jobs whose last update is at least `grace` old to pending.
    ///
    /// Recovers jobs stranded by a crash or an abandoned shutdown. Attempts are
    /// not incremented: the interrupted run never produced an outcome.
    pub async fn reconcile_stale_claims(&self, now: i64, grace: Duration) -> Result<u64> {
        let cutoff = now.saturating_sub(i64::try_from(grace.as_secs()).unwrap_or(i64::MAX));
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                updated_at = ?1
            WHERE status = 'claimed' AND updated_at <= ?2
            "#,
        )
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }

    /// Delete every completed or failed job. Returns the number removed.
    pub async fn purge_terminal(&self) -> Result<u64> {
        let r = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('completed', 'failed')
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }

    /// Put every failed job back to pending with a fresh retry budget.
    pub async fn requeue_failed(&self, now: i64) -> Result<u64> {
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                attempts = 0,
                next_eligible_at = NULL,
                last_error = NULL,
                updated_at = ?1
            WHERE status = 'failed'
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }

    /// Permanently remove one job. Claimed jobs are refused (a worker owns them).
    /// Returns true if a row was deleted.
    pub async fn remove_job(&self, id: JobId) -> Result<bool> {
        let r = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE id = ?1 AND status != 'claimed'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }
}
