pub mod config;
pub mod logging;

pub mod control;
pub mod dedup;
pub mod fetch;
pub mod governor;
pub mod job_store;
pub mod monitor;
pub mod queue;
pub mod retry;
pub mod scheduler;
