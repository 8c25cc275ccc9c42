//! `fetchq resume [--force]` – let a paused pool claim jobs again.

use anyhow::Result;
use fetchq_core::control::ControlCommand;

use crate::cli::control_socket;

pub async fn run_resume(force: bool) -> Result<()> {
    let cmd = if force {
        ControlCommand::ForceResume
    } else {
        ControlCommand::Resume
    };
    let reply = control_socket::send_command(cmd).await?;
    println!("{reply}");
    Ok(())
}
