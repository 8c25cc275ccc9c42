use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_concurrent must be between 1 and 100 (got {0})")]
    MaxConcurrent(usize),
    #[error("{field} must be greater than zero")]
    ZeroInterval { field: &'static str },
    #[error(
        "worker.stale_claim_grace_secs ({grace}) must exceed the claim heartbeat ({heartbeat}s)"
    )]
    GraceTooShort { grace: u64, heartbeat: u64 },
    #[error("identity rule for host {0:?} needs query_param or path_prefix")]
    IdentityRule(String),
    #[error("governor.min_concurrent must be between 1 and max_concurrent ({max}) (got {min})")]
    MinConcurrent { min: usize, max: usize },
    #[error("{field} must be above 0 and at most 100")]
    Threshold { field: &'static str },
}

/// Retry policy parameters (`[retry]` in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Base delay in seconds; the k-th retry waits `base_delay_secs * 2^k`.
    pub base_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_secs: 60,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.base_delay_secs))
    }
}

/// Worker loop timing (`[worker]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Poll interval while the pool is paused.
    pub paused_poll_ms: u64,
    /// Poll interval when no job is eligible.
    pub idle_poll_ms: u64,
    /// Wait before retrying a store call that failed.
    pub store_retry_ms: u64,
    /// Upper bound for one fetch.
    pub fetch_timeout_secs: u64,
    /// Claimed jobs untouched for this long are returned to pending.
    pub stale_claim_grace_secs: u64,
    /// How often the stale-claim reconciliation runs while the pool is up.
    pub reconcile_interval_secs: u64,
    /// How long shutdown waits for in-flight fetches before abandoning them.
    pub shutdown_grace_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            paused_poll_ms: 1_000,
            idle_poll_ms: 2_000,
            store_retry_ms: 1_000,
            fetch_timeout_secs: 3_600,
            stale_claim_grace_secs: 300,
            reconcile_interval_secs: 60,
            shutdown_grace_secs: 30,
        }
    }
}

impl WorkerConfig {
    /// Interval at which a worker refreshes its claim during a long fetch.
    pub fn heartbeat_secs(&self) -> u64 {
        (self.stale_claim_grace_secs / 3).max(1)
    }
}

/// Resource monitor (`[monitor]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Pause the pool when free bytes in the download dir drop below this.
    pub min_free_bytes: u64,
    /// Seconds between background capacity checks.
    pub interval_secs: u64,
    /// Lift a capacity-triggered pause once a fresh check shows recovery.
    /// Operator pauses are never lifted automatically.
    pub auto_resume: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            min_free_bytes: 50 * 1024 * 1024 * 1024,
            interval_secs: 30,
            auto_resume: true,
        }
    }
}

/// Concurrency governor (`[governor]`): between `min_concurrent` and
/// `max_concurrent` fetch slots, one step down while CPU or disk usage is over
/// its threshold, one step up once both are comfortably below.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub enabled: bool,
    /// Slots the pool starts with and never drops below.
    pub min_concurrent: usize,
    /// CPU load (percent of all cores) counted as full pressure.
    pub cpu_threshold: f64,
    /// Disk usage (percent) of the download filesystem counted as full pressure.
    pub disk_threshold: f64,
    /// Seconds between samples.
    pub interval_secs: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_concurrent: 2,
            cpu_threshold: 85.0,
            disk_threshold: 90.0,
            interval_secs: 5,
        }
    }
}

/// External fetch program (`[fetch]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub program: String,
    /// Arguments; `{locator}` and `{dir}` are substituted per job.
    pub args: Vec<String>,
    /// Failure messages containing one of these (case-insensitive) are permanent.
    pub permanent_error_patterns: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            args: vec![
                "--no-playlist".to_string(),
                "--no-progress".to_string(),
                "-o".to_string(),
                "{dir}/%(title)s.%(ext)s".to_string(),
                "--print".to_string(),
                "after_move:filepath".to_string(),
                "{locator}".to_string(),
            ],
            permanent_error_patterns: vec![
                "unavailable".to_string(),
                "has been removed".to_string(),
                "private video".to_string(),
                "HTTP Error 404".to_string(),
                "HTTP Error 410".to_string(),
            ],
        }
    }
}

/// One identity rule (`[[identity]]`): locators on `host` (or a subdomain)
/// map to `<label>:<value>` where value comes from a query parameter or the
/// path segment following `path_prefix`. `label` defaults to `host`, so two
/// hosts serving the same content can share one label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRuleConfig {
    pub host: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub query_param: Option<String>,
    #[serde(default)]
    pub path_prefix: Option<String>,
}

/// Global configuration loaded from `~/.config/fetchq/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchqConfig {
    /// Number of worker loops.
    pub max_concurrent: usize,
    /// Where fetch results land (None = current directory at `run`).
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub identity: Vec<IdentityRuleConfig>,
}

impl Default for FetchqConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            download_dir: None,
            retry: RetryConfig::default(),
            worker: WorkerConfig::default(),
            monitor: MonitorConfig::default(),
            governor: GovernorConfig::default(),
            fetch: FetchConfig::default(),
            identity: Vec::new(),
        }
    }
}

impl FetchqConfig {
    /// Check ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.max_concurrent) {
            return Err(ConfigError::MaxConcurrent(self.max_concurrent));
        }
        let w = &self.worker;
        for (field, v) in [
            ("worker.paused_poll_ms", w.paused_poll_ms),
            ("worker.idle_poll_ms", w.idle_poll_ms),
            ("worker.store_retry_ms", w.store_retry_ms),
            ("worker.fetch_timeout_secs", w.fetch_timeout_secs),
            ("worker.reconcile_interval_secs", w.reconcile_interval_secs),
        ] {
            if v == 0 {
                return Err(ConfigError::ZeroInterval { field });
            }
        }
        if w.stale_claim_grace_secs <= w.heartbeat_secs() {
            return Err(ConfigError::GraceTooShort {
                grace: w.stale_claim_grace_secs,
                heartbeat: w.heartbeat_secs(),
            });
        }
        if self.monitor.interval_secs == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "monitor.interval_secs",
            });
        }
        let g = &self.governor;
        if g.enabled {
            if !(1..=self.max_concurrent).contains(&g.min_concurrent) {
                return Err(ConfigError::MinConcurrent {
                    min: g.min_concurrent,
                    max: self.max_concurrent,
                });
            }
            for (field, v) in [
                ("governor.cpu_threshold", g.cpu_threshold),
                ("governor.disk_threshold", g.disk_threshold),
            ] {
                if !(v > 0.0 && v <= 100.0) {
                    return Err(ConfigError::Threshold { field });
                }
            }
            if g.interval_secs == 0 {
                return Err(ConfigError::ZeroInterval {
                    field: "governor.interval_secs",
                });
            }
        }
        for rule in &self.identity {
            if rule.query_param.is_none() && rule.path_prefix.is_none() {
                return Err(ConfigError::IdentityRule(rule.host.clone()));
            }
        }
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("fetchq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<FetchqConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = FetchqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: FetchqConfig = toml::from_str(&data)?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = FetchqConfig::default();
        assert_eq!(cfg.max_concurrent, 4);
        assert_eq!(cfg.retry.max_retries, 5);
        assert_eq!(cfg.retry.base_delay_secs, 60);
        assert_eq!(cfg.worker.paused_poll_ms, 1_000);
        assert_eq!(cfg.worker.idle_poll_ms, 2_000);
        assert!(cfg.monitor.auto_resume);
        assert!(cfg.governor.enabled);
        assert_eq!(cfg.governor.min_concurrent, 2);
        assert_eq!(cfg.governor.cpu_threshold, 85.0);
        assert_eq!(cfg.governor.disk_threshold, 90.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = FetchqConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: FetchqConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_concurrent, cfg.max_concurrent);
        assert_eq!(parsed.fetch.args, cfg.fetch.args);
        assert_eq!(parsed.monitor.min_free_bytes, cfg.monitor.min_free_bytes);
    }

    #[test]
    fn config_toml_minimal_uses_section_defaults() {
        let cfg: FetchqConfig = toml::from_str("max_concurrent = 8").unwrap();
        assert_eq!(cfg.max_concurrent, 8);
        assert!(cfg.download_dir.is_none());
        assert_eq!(cfg.retry.max_retries, 5);
        assert_eq!(cfg.worker.stale_claim_grace_secs, 300);
        assert!(cfg.identity.is_empty());
    }

    #[test]
    fn config_toml_custom_sections() {
        let toml = r#"
            max_concurrent = 2
            download_dir = "/srv/media"

            [retry]
            max_retries = 3
            base_delay_secs = 1

            [worker]
            idle_poll_ms = 500

            [monitor]
            min_free_bytes = 1_000_000
            auto_resume = false

            [governor]
            min_concurrent = 1
            disk_threshold = 75.5

            [fetch]
            program = "curl"
            args = ["-sSfLO", "--output-dir", "{dir}", "{locator}"]

            [[identity]]
            host = "youtube.com"
            query_param = "v"

            [[identity]]
            host = "vimeo.com"
            path_prefix = "/"
        "#;
        let cfg: FetchqConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.download_dir.as_deref(), Some(std::path::Path::new("/srv/media")));
        assert_eq!(cfg.retry.policy(), RetryPolicy::new(3, Duration::from_secs(1)));
        assert_eq!(cfg.worker.idle_poll_ms, 500);
        assert_eq!(cfg.worker.paused_poll_ms, 1_000);
        assert_eq!(cfg.monitor.min_free_bytes, 1_000_000);
        assert!(!cfg.monitor.auto_resume);
        assert_eq!(cfg.governor.min_concurrent, 1);
        assert_eq!(cfg.governor.disk_threshold, 75.5);
        assert_eq!(cfg.governor.cpu_threshold, 85.0);
        assert_eq!(cfg.fetch.program, "curl");
        assert!(!cfg.fetch.permanent_error_patterns.is_empty());
        assert_eq!(cfg.identity.len(), 2);
        assert_eq!(cfg.identity[0].query_param.as_deref(), Some("v"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = FetchqConfig::default();
        cfg.max_concurrent = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::MaxConcurrent(0)));

        let mut cfg = FetchqConfig::default();
        cfg.worker.idle_poll_ms = 0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ZeroInterval {
                field: "worker.idle_poll_ms"
            })
        );

        let mut cfg = FetchqConfig::default();
        cfg.worker.stale_claim_grace_secs = 1;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::GraceTooShort { .. })
        ));

        let mut cfg = FetchqConfig::default();
        cfg.identity.push(IdentityRuleConfig {
            host: "example.com".to_string(),
            label: None,
            query_param: None,
            path_prefix: None,
        });
        assert!(matches!(cfg.validate(), Err(ConfigError::IdentityRule(_))));

        let mut cfg = FetchqConfig::default();
        cfg.max_concurrent = 1;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::MinConcurrent { min: 2, max: 1 })
        );
        cfg.governor.enabled = false;
        assert!(cfg.validate().is_ok());

        let mut cfg = FetchqConfig::default();
        cfg.governor.cpu_threshold = 0.0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::Threshold {
                field: "governor.cpu_threshold"
            })
        );
        cfg.governor.cpu_threshold = 101.0;
        assert!(cfg.validate().is_err());
    }
}
