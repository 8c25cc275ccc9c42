//! Persistent job store (SQLite via sqlx).
//!
//! One `jobs` table holds every fetch job. All state transitions are single
//! atomic statements (or guarded compare-and-swap updates) so concurrent
//! workers, and separate processes sharing the same file, never see a job
//! claimed twice.

mod db;
mod jobs;
mod types;

pub use db::JobStore;
pub(crate) use db::unix_timestamp;
pub use jobs::Insertion;
pub use types::*;

#[cfg(test)]
pub(crate) use db::open_memory;
