//! Concurrency governor: narrows the number of fetch slots under CPU or disk
//! pressure and widens it again once the machine has headroom.
//!
//! Each sample moves the target by at most one slot, bounded by
//! `[min, max]`. Pressure is the larger of `cpu / cpu_threshold` and
//! `disk / disk_threshold`: at or above 1.0 the target drops, below
//! [`RELAX_PRESSURE`] it rises, and in between it holds.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::GovernorConfig;

/// Pressure below which the governor adds a slot back.
pub const RELAX_PRESSURE: f64 = 0.85;

/// One utilization reading, both as percentages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSample {
    pub cpu_percent: f64,
    pub disk_percent: f64,
}

/// Source of utilization readings.
pub trait LoadProbe: Send + Sync + 'static {
    fn sample(&self) -> Result<LoadSample>;
}

impl<F> LoadProbe for F
where
    F: Fn() -> Result<LoadSample> + Send + Sync + 'static,
{
    fn sample(&self) -> Result<LoadSample> {
        self()
    }
}

/// One-minute load average over the core count, and used space on the
/// filesystem holding `path`.
#[derive(Debug, Clone)]
pub struct SystemLoadProbe {
    path: PathBuf,
}

impl SystemLoadProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[cfg(unix)]
fn cpu_percent() -> Result<f64> {
    let mut load = [0f64; 1];
    let n = unsafe { libc::getloadavg(load.as_mut_ptr(), 1) };
    if n < 1 {
        anyhow::bail!("getloadavg returned no samples");
    }
    let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
    Ok(load[0] / cores as f64 * 100.0)
}

#[cfg(unix)]
fn disk_percent(path: &std::path::Path) -> Result<f64> {
    let st = crate::monitor::statvfs(path)?;
    #[allow(clippy::unnecessary_cast)]
    let (blocks, free, avail) = (st.f_blocks as u64, st.f_bfree as u64, st.f_bavail as u64);
    // Same basis as `df`: reserved blocks count neither as used nor available.
    let used = blocks.saturating_sub(free);
    let usable = used.saturating_add(avail);
    if usable == 0 {
        return Ok(0.0);
    }
    Ok(used as f64 / usable as f64 * 100.0)
}

impl LoadProbe for SystemLoadProbe {
    #[cfg(unix)]
    fn sample(&self) -> Result<LoadSample> {
        Ok(LoadSample {
            cpu_percent: cpu_percent()?,
            disk_percent: disk_percent(&self.path)?,
        })
    }

    #[cfg(not(unix))]
    fn sample(&self) -> Result<LoadSample> {
        anyhow::bail!(
            "load probe is not supported on this platform ({})",
            self.path.display()
        )
    }
}

/// Recommends how many fetches may run at once.
pub struct ConcurrencyGovernor {
    probe: Arc<dyn LoadProbe>,
    min: usize,
    max: usize,
    cpu_threshold: f64,
    disk_threshold: f64,
    interval: Duration,
    target: AtomicUsize,
}

impl ConcurrencyGovernor {
    /// Starts at `min` slots. `max` is at least 1 and `min` is clamped into
    /// `[1, max]`.
    pub fn new(probe: Arc<dyn LoadProbe>, min: usize, max: usize) -> Self {
        let max = max.max(1);
        let min = min.clamp(1, max);
        Self {
            probe,
            min,
            max,
            cpu_threshold: 85.0,
            disk_threshold: 90.0,
            interval: Duration::from_secs(5),
            target: AtomicUsize::new(min),
        }
    }

    pub fn from_config(probe: Arc<dyn LoadProbe>, cfg: &GovernorConfig, max: usize) -> Self {
        Self::new(probe, cfg.min_concurrent, max)
            .with_thresholds(cfg.cpu_threshold, cfg.disk_threshold)
            .with_interval(Duration::from_secs(cfg.interval_secs))
    }

    pub fn with_thresholds(mut self, cpu: f64, disk: f64) -> Self {
        self.cpu_threshold = cpu;
        self.disk_threshold = disk;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Current slot recommendation.
    pub fn target(&self) -> usize {
        self.target.load(Ordering::SeqCst)
    }

    pub fn bounds(&self) -> (usize, usize) {
        (self.min, self.max)
    }

    pub fn pressure(&self, sample: &LoadSample) -> f64 {
        let cpu = sample.cpu_percent / self.cpu_threshold.max(1.0);
        let disk = sample.disk_percent / self.disk_threshold.max(1.0);
        cpu.max(disk)
    }

    /// Move the target one step according to `sample`; returns the new target.
    pub fn apply(&self, sample: &LoadSample) -> usize {
        let pressure = self.pressure(sample);
        let current = self.target();
        let next = if pressure >= 1.0 && current > self.min {
            current - 1
        } else if pressure < RELAX_PRESSURE && current < self.max {
            current + 1
        } else {
            current
        };

        if next != current {
            self.target.store(next, Ordering::SeqCst);
            if next < current {
                tracing::info!(slots = next, pressure, "load high, lowering fetch slots");
            } else {
                tracing::debug!(slots = next, pressure, "load relaxed, raising fetch slots");
            }
        }
        next
    }

    /// Sample once and adjust. A failing probe leaves the target unchanged.
    pub fn check(&self) -> usize {
        match self.probe.sample() {
            Ok(sample) => self.apply(&sample),
            Err(e) => {
                tracing::warn!("load probe failed: {:#}", e);
                self.target()
            }
        }
    }

    /// Check every interval until `stop` flips to true.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        loop {
            self.check();
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                r = stop.changed() => {
                    if r.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("concurrency governor stopped");
    }
}
