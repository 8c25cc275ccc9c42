//! Pause/resume control for the worker pool, plus the control-socket protocol.
//!
//! The pause flag gates new claims only; in-flight fetches are never
//! interrupted by a pause. A pause remembers why it was set so the resource
//! monitor only lifts pauses it caused itself.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

const RUNNING: u8 = 0;
const PAUSED_OPERATOR: u8 = 1;
const PAUSED_CAPACITY: u8 = 2;

/// Why the pool is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// Explicit pause request.
    Operator,
    /// The resource monitor saw capacity below the floor.
    LowCapacity,
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PauseReason::Operator => "operator",
            PauseReason::LowCapacity => "low capacity",
        })
    }
}

/// Capacity reading supplied to [`PauseController::resume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityStatus {
    /// Available capacity is at or above the floor.
    Sufficient { available: u64, floor: u64 },
    /// Available capacity is below the floor.
    Low { available: u64, floor: u64 },
    /// No monitor configured, or the probe failed.
    Unknown,
}

/// Result of a resume request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    Resumed,
    NotPaused,
    /// Refused: capacity is still below the floor.
    CapacityLow { available: u64, floor: u64 },
}

/// Shared pause flag consulted by every worker before claiming.
#[derive(Debug, Default)]
pub struct PauseController {
    state: AtomicU8,
}

impl PauseController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.state.load(Ordering::Acquire) != RUNNING
    }

    pub fn reason(&self) -> Option<PauseReason> {
        match self.state.load(Ordering::Acquire) {
            PAUSED_OPERATOR => Some(PauseReason::Operator),
            PAUSED_CAPACITY => Some(PauseReason::LowCapacity),
            _ => None,
        }
    }

    /// Operator pause. Also takes over a capacity pause, so the monitor will
    /// not lift it. Returns true if the pool was running.
    pub fn pause(&self) -> bool {
        self.state.swap(PAUSED_OPERATOR, Ordering::AcqRel) == RUNNING
    }

    /// Capacity pause; no-op if already paused for any reason.
    pub fn pause_for_capacity(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, PAUSED_CAPACITY, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Resume unless capacity is known to be low.
    pub fn resume(&self, capacity: CapacityStatus) -> ResumeOutcome {
        if !self.is_paused() {
            return ResumeOutcome::NotPaused;
        }
        if let CapacityStatus::Low { available, floor } = capacity {
            return ResumeOutcome::CapacityLow { available, floor };
        }
        if self.state.swap(RUNNING, Ordering::AcqRel) == RUNNING {
            ResumeOutcome::NotPaused
        } else {
            ResumeOutcome::Resumed
        }
    }

    /// Resume regardless of capacity.
    pub fn force_resume(&self) -> ResumeOutcome {
        if self.state.swap(RUNNING, Ordering::AcqRel) == RUNNING {
            ResumeOutcome::NotPaused
        } else {
            ResumeOutcome::Resumed
        }
    }

    /// Lift a capacity pause (monitor only). Operator pauses are left alone.
    pub fn lift_capacity_pause(&self) -> bool {
        self.state
            .compare_exchange(PAUSED_CAPACITY, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// One line of the control-socket protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
    ForceResume,
    Status,
}

impl ControlCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlCommand::Pause => "pause",
            ControlCommand::Resume => "resume",
            ControlCommand::ForceResume => "force-resume",
            ControlCommand::Status => "status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown control command: {0:?}")]
pub struct UnknownCommand(pub String);

impl FromStr for ControlCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pause" => Ok(ControlCommand::Pause),
            "resume" => Ok(ControlCommand::Resume),
            "force-resume" => Ok(ControlCommand::ForceResume),
            "status" => Ok(ControlCommand::Status),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

/// Default path for the control socket (next to the job database).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("fetchq")?.get_state_home();
    Ok(dir.join("fetchq").join("control.sock"))
}
