//! Fetcher that runs an external program per job (e.g. yt-dlp, curl, aria2c).
//!
//! Arguments may contain `{locator}` and `{dir}` placeholders. The last
//! non-empty stdout line is taken as the result location; a non-zero exit is a
//! failure carrying the tail of stderr.

use std::future::Future;
use std::path::Path;
use std::process::{Output, Stdio};

use tokio::process::Command;

use super::{FetchOutcome, FetchRequest, Fetcher};
use crate::config::FetchConfig;
use crate::retry::ErrorKind;

/// Lines of stderr kept in a failure message.
const STDERR_TAIL_LINES: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("no fetch program configured")]
    NoProgram,
    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs `program args...` for every job.
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    program: String,
    args: Vec<String>,
}

impl CommandFetcher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(cfg: &FetchConfig) -> Self {
        Self::new(cfg.program.clone(), cfg.args.clone())
    }

    /// Arguments with placeholders substituted for one request.
    pub fn expand_args(&self, locator: &str, dir: &Path) -> Vec<String> {
        let dir = dir.to_string_lossy();
        self.args
            .iter()
            .map(|a| a.replace("{locator}", locator).replace("{dir}", &dir))
            .collect()
    }

    async fn run(&self, request: &FetchRequest) -> Result<Output, FetchError> {
        if self.program.trim().is_empty() {
            return Err(FetchError::NoProgram);
        }
        let args = self.expand_args(&request.locator, &request.output_dir);
        tracing::debug!(job_id = request.job_id, program = %self.program, ?args, "spawning fetch");
        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FetchError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        child
            .wait_with_output()
            .await
            .map_err(|source| FetchError::Wait {
                program: self.program.clone(),
                source,
            })
    }
}

/// Outcome for a finished process.
fn outcome_from_output(output: &Output) -> FetchOutcome {
    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        return match stdout.lines().map(str::trim).filter(|l| !l.is_empty()).last() {
            Some(path) => FetchOutcome::success(path),
            None => FetchOutcome::failure(
                ErrorKind::Other,
                "fetch exited successfully but printed no result location",
            ),
        };
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join(" | ");
    let message = if tail.is_empty() {
        format!("fetch exited with {}", output.status)
    } else {
        format!("fetch exited with {}: {}", output.status, tail)
    };
    FetchOutcome::failure(ErrorKind::Other, message)
}

impl Fetcher for CommandFetcher {
    fn fetch(&self, request: FetchRequest) -> impl Future<Output = FetchOutcome> + Send {
        async move {
            match self.run(&request).await {
                Ok(output) => outcome_from_output(&output),
                Err(e) => FetchOutcome::failure(ErrorKind::Other, e.to_string()),
            }
        }
    }
}
