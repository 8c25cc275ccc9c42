//! CLI command handlers, one file per command.

mod add;
mod maintenance;
mod pause;
mod remove;
mod resume;
mod run;
mod status;

pub use add::run_add;
pub use maintenance::{run_purge, run_retry_failed};
pub use pause::run_pause;
pub use remove::run_remove;
pub use resume::run_resume;
pub use run::run_pool;
pub use status::run_status;
