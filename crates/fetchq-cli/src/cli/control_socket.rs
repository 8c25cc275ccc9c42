//! Control socket: server (during `fetchq run`) and client (`fetchq pause`/`resume`).
//! Protocol: one command per line (`pause`, `resume`, `force-resume`, `status`);
//! the server answers each with one line.

use anyhow::{bail, Context, Result};
use fetchq_core::control::{ControlCommand, ResumeOutcome};
use fetchq_core::queue::FetchQueue;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

fn resume_reply(outcome: ResumeOutcome) -> String {
    match outcome {
        ResumeOutcome::Resumed => "resumed".to_string(),
        ResumeOutcome::NotPaused => "not paused".to_string(),
        ResumeOutcome::CapacityLow { available, floor } => format!(
            "refused: {available} bytes free, below the floor of {floor} (use --force)"
        ),
    }
}

/// Apply one protocol line to the queue and build the reply.
pub(crate) fn handle_line(queue: &FetchQueue, line: &str) -> String {
    let cmd = match line.parse::<ControlCommand>() {
        Ok(cmd) => cmd,
        Err(e) => return format!("error: {e}"),
    };
    match cmd {
        ControlCommand::Pause => {
            if queue.pause() {
                "paused".to_string()
            } else {
                "already paused".to_string()
            }
        }
        ControlCommand::Resume => resume_reply(queue.resume()),
        ControlCommand::ForceResume => resume_reply(queue.force_resume()),
        ControlCommand::Status => match queue.pause_controller().reason() {
            Some(reason) => format!("paused ({reason})"),
            None => "running".to_string(),
        },
    }
}

/// Binds `path` and serves control commands against `queue` until aborted.
/// Fails if another live process is already serving on `path`.
pub fn spawn_control_listener(
    queue: FetchQueue,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create socket dir: {}", dir.display()))?;
    }
    // A socket that still accepts connections belongs to a live `fetchq run`.
    // Anything else at the path is left over from a run that did not exit cleanly.
    if std::os::unix::net::UnixStream::connect(path).is_ok() {
        bail!(
            "pool already running: control socket {} is in use",
            path.display()
        );
    }
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed stale control socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::debug!(path = %path.display(), "remove stale control socket: {}", e),
    }
    let listener = UnixListener::bind(path)
        .with_context(|| format!("bind control socket: {}", path.display()))?;

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let queue = queue.clone();
                    tokio::spawn(async move {
                        let (read, mut write) = stream.into_split();
                        let mut lines = BufReader::new(read).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            if line.trim().is_empty() {
                                continue;
                            }
                            let reply = handle_line(&queue, &line);
                            if write.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
                                break;
                            }
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

/// Sends one command to the running pool and returns its reply line.
pub async fn send_command(cmd: ControlCommand) -> Result<String> {
    let path = fetchq_core::control::default_control_socket_path()?;
    send_command_to(&path, cmd).await
}

pub(crate) async fn send_command_to(socket_path: &Path, cmd: ControlCommand) -> Result<String> {
    if !socket_path.exists() {
        bail!(
            "no running `fetchq run` found (control socket {} missing)",
            socket_path.display()
        );
    }
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("connect control socket: {}", socket_path.display()))?;
    let (read, mut write) = stream.into_split();
    write
        .write_all(format!("{}\n", cmd.as_str()).as_bytes())
        .await?;
    let mut lines = BufReader::new(read).lines();
    match lines.next_line().await? {
        Some(reply) => Ok(reply),
        None => bail!("control socket closed without a reply"),
    }
}
