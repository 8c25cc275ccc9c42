//! Resource monitor: probes free capacity and drives capacity pauses.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::MonitorConfig;
use crate::control::{CapacityStatus, PauseController, PauseReason};

/// Source of the "available capacity" figure (bytes for disk probes).
pub trait CapacityProbe: Send + Sync + 'static {
    fn available_capacity(&self) -> Result<u64>;
}

impl<F> CapacityProbe for F
where
    F: Fn() -> Result<u64> + Send + Sync + 'static,
{
    fn available_capacity(&self) -> Result<u64> {
        self()
    }
}

/// Free bytes (available to unprivileged users) on the filesystem holding `path`.
#[derive(Debug, Clone)]
pub struct DiskSpaceProbe {
    path: PathBuf,
}

impl DiskSpaceProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The download dir may not exist yet; probe its nearest existing ancestor.
fn existing_ancestor(path: &Path) -> &Path {
    match path.ancestors().find(|p| p.as_os_str().is_empty() || p.exists()) {
        Some(p) if !p.as_os_str().is_empty() => p,
        Some(_) => Path::new("."),
        None => Path::new("/"),
    }
}

/// Filesystem statistics for `path` (or its nearest existing ancestor).
#[cfg(unix)]
pub(crate) fn statvfs(path: &Path) -> Result<libc::statvfs> {
    use anyhow::Context;
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let target = existing_ancestor(path);
    let c_path = CString::new(target.as_os_str().as_bytes())
        .with_context(|| format!("path contains NUL: {}", target.display()))?;
    let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
    let r = unsafe { libc::statvfs(c_path.as_ptr(), &mut st) };
    if r != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("statvfs: {}", target.display()));
    }
    Ok(st)
}

impl CapacityProbe for DiskSpaceProbe {
    #[cfg(unix)]
    fn available_capacity(&self) -> Result<u64> {
        let st = statvfs(&self.path)?;
        #[allow(clippy::unnecessary_cast)]
        Ok((st.f_bavail as u64).saturating_mul(st.f_frsize as u64))
    }

    #[cfg(not(unix))]
    fn available_capacity(&self) -> Result<u64> {
        anyhow::bail!(
            "disk space probe is not supported on this platform ({})",
            existing_ancestor(&self.path).display()
        )
    }
}

/// Compares a probe against a floor and sets or lifts capacity pauses.
pub struct ResourceMonitor {
    probe: Arc<dyn CapacityProbe>,
    floor: u64,
    auto_resume: bool,
    interval: Duration,
}

impl ResourceMonitor {
    pub fn new(probe: Arc<dyn CapacityProbe>, floor: u64) -> Self {
        Self {
            probe,
            floor,
            auto_resume: true,
            interval: Duration::from_secs(30),
        }
    }

    pub fn from_config(probe: Arc<dyn CapacityProbe>, cfg: &MonitorConfig) -> Self {
        Self {
            probe,
            floor: cfg.min_free_bytes,
            auto_resume: cfg.auto_resume,
            interval: Duration::from_secs(cfg.interval_secs),
        }
    }

    pub fn with_auto_resume(mut self, auto_resume: bool) -> Self {
        self.auto_resume = auto_resume;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn floor(&self) -> u64 {
        self.floor
    }

    /// Fresh capacity reading. A failing probe reads as `Unknown`.
    pub fn capacity_status(&self) -> CapacityStatus {
        match self.probe.available_capacity() {
            Ok(available) if available < self.floor => CapacityStatus::Low {
                available,
                floor: self.floor,
            },
            Ok(available) => CapacityStatus::Sufficient {
                available,
                floor: self.floor,
            },
            Err(e) => {
                tracing::warn!("capacity probe failed: {:#}", e);
                CapacityStatus::Unknown
            }
        }
    }

    /// Probe once and update the pause gate.
    ///
    /// Low capacity sets a capacity pause. Recovered capacity lifts it only if
    /// auto-resume is enabled and the current pause was set by this monitor.
    pub fn check(&self, pause: &PauseController) -> CapacityStatus {
        let status = self.capacity_status();
        match status {
            CapacityStatus::Low { available, floor } => {
                if pause.pause_for_capacity() {
                    tracing::warn!(available, floor, "capacity below floor, pausing workers");
                }
            }
            CapacityStatus::Sufficient { available, .. } => {
                if self.auto_resume
                    && pause.reason() == Some(PauseReason::LowCapacity)
                    && pause.lift_capacity_pause()
                {
                    tracing::info!(available, "capacity recovered, resuming workers");
                }
            }
            CapacityStatus::Unknown => {}
        }
        status
    }

    /// Check every interval until `stop` flips to true.
    pub async fn run(&self, pause: Arc<PauseController>, mut stop: watch::Receiver<bool>) {
        loop {
            self.check(&pause);
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                r = stop.changed() => {
                    if r.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("resource monitor stopped");
    }
}
