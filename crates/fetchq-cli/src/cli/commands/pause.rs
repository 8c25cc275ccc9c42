//! `fetchq pause` – stop a running pool from claiming new jobs.

use anyhow::Result;
use fetchq_core::control::ControlCommand;

use crate::cli::control_socket;

pub async fn run_pause() -> Result<()> {
    let reply = control_socket::send_command(ControlCommand::Pause).await?;
    println!("{reply}");
    Ok(())
}
