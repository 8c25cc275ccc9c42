//! Job reads (`read`) and atomic transitions (`write`).

mod read;
mod write;

pub use write::Insertion;

/// Column list shared by every query that materializes a full `Job`.
pub(super) const JOB_COLUMNS: &str = "id, locator, status, attempts, created_at, updated_at, \
     next_eligible_at, result_path, last_error, dedup_hash, identity_key, claim_seq";
