//! Job read operations: get, list, summary, duplicate lookup.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::super::db::JobStore;
use super::super::types::{Job, JobId, JobStatus, StatusSummary};
use super::JOB_COLUMNS;

/// Map a row selected with `JOB_COLUMNS` into a `Job`.
pub(crate) fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let status: String = row.try_get("status")?;
    let attempts: i64 = row.try_get("attempts")?;
    Ok(Job {
        id: row.try_get("id")?,
        locator: row.try_get("locator")?,
        status: status.parse().context("decode job status")?,
        attempts: u32::try_from(attempts).unwrap_or(0),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        next_eligible_at: row.try_get("next_eligible_at")?,
        result_path: row.try_get("result_path")?,
        last_error: row.try_get("last_error")?,
        dedup_hash: row.try_get("dedup_hash")?,
        identity_key: row.try_get("identity_key")?,
        claim_seq: row.try_get("claim_seq")?,
    })
}

impl JobStore {
    /// Fetch a single job by id.
    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    /// Jobs in `status`, oldest first (claim order), at most `limit` rows.
    pub async fn list_by_status(&self, status: JobStatus, limit: u32) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 \
             ORDER BY created_at ASC, id ASC LIMIT ?2"
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    /// All jobs, newest first, at most `limit` rows.
    pub async fn list_jobs(&self, limit: u32) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, id DESC LIMIT ?1"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    /// Counts per status. Statuses with no jobs report zero.
    pub async fn summary(&self) -> Result<StatusSummary> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS n
            FROM jobs
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut summary = StatusSummary::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            let status: JobStatus = status.parse().context("decode job status")?;
            summary.set(status, u64::try_from(n).unwrap_or(0));
        }
        Ok(summary)
    }

    /// Id of the oldest job (any status) sharing `dedup_hash` or `identity_key`.
    ///
    /// Either match is enough. Absent or empty keys never match. Both lookups
    /// hit their own index.
    pub async fn find_duplicate(
        &self,
        dedup_hash: Option<&str>,
        identity_key: Option<&str>,
    ) -> Result<Option<JobId>> {
        if let Some(hash) = dedup_hash.filter(|h| !h.is_empty()) {
            let id: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM jobs WHERE dedup_hash = ?1 ORDER BY id ASC LIMIT 1",
            )
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
            if id.is_some() {
                return Ok(id);
            }
        }
        if let Some(key) = identity_key.filter(|k| !k.is_empty()) {
            let id: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM jobs WHERE identity_key = ?1 ORDER BY id ASC LIMIT 1",
            )
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
            return Ok(id);
        }
        Ok(None)
    }
}
