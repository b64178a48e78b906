//! Configuration
//!
//! Settings live in `$XDG_CONFIG_HOME/flowstate/config.toml`. Every section
//! and key is optional:
//!
//! ```toml
//! [dashboard]
//! default_period = "last_3_months"
//! data_dir = "/srv/flow/rows"
//!
//! [metrics]
//! rolling_window = 4
//! top_hours = 6
//! epoch = "2020-01-01"
//!
//! [cache]
//! enabled = true
//! ttl_secs = 600
//! persist = true
//!
//! [logging]
//! level = "info"
//! max_files = 5
//! ```
//!
//! Row files default to `$XDG_DATA_HOME/flowstate/`, logs go to
//! `$XDG_STATE_HOME/flowstate/` and persisted query results to
//! `$XDG_CACHE_HOME/flowstate/queries/`.

use crate::error::{Error, Result};
use crate::period::{default_epoch, PeriodKey, PeriodResolver};
use crate::region::DEFAULT_TOP_HOURS;
use crate::window::DEFAULT_ROLLING_WINDOW;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// `$var`, or `~/<fallback>` when unset or empty.
fn xdg_base(var: &str, fallback: &str) -> PathBuf {
    match std::env::var_os(var) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => home_dir().join(fallback),
    }
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Dashboard defaults
    #[serde(default)]
    pub dashboard: DashboardConfig,

    /// Metric computation settings
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Query cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Dashboard defaults applied by the calling layer
#[derive(Debug, Deserialize)]
pub struct DashboardConfig {
    /// Period used when none is requested
    #[serde(default = "default_period")]
    pub default_period: String,

    /// Directory holding `<dataset>.jsonl` row files
    pub data_dir: Option<PathBuf>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            default_period: default_period(),
            data_dir: None,
        }
    }
}

fn default_period() -> String {
    PeriodKey::Last3Months.as_str().to_string()
}

/// Metric computation settings
#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    /// Buckets in the rolling average window
    #[serde(default = "default_rolling_window")]
    pub rolling_window: usize,

    /// Busiest hours kept per entity for region inference
    #[serde(default = "default_top_hours")]
    pub top_hours: usize,

    /// First day of data for `all_time` (YYYY-MM-DD)
    #[serde(default = "default_epoch_string")]
    pub epoch: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            rolling_window: default_rolling_window(),
            top_hours: default_top_hours(),
            epoch: default_epoch_string(),
        }
    }
}

impl MetricsConfig {
    /// Parsed epoch date.
    pub fn epoch_date(&self) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(&self.epoch, "%Y-%m-%d")
            .map_err(|e| Error::Config(format!("metrics.epoch '{}': {}", self.epoch, e)))
    }

    /// Period resolver anchored at the configured epoch.
    pub fn resolver(&self) -> Result<PeriodResolver> {
        Ok(PeriodResolver::new(self.epoch_date()?))
    }
}

fn default_rolling_window() -> usize {
    DEFAULT_ROLLING_WINDOW
}

fn default_top_hours() -> usize {
    DEFAULT_TOP_HOURS
}

fn default_epoch_string() -> String {
    default_epoch().format("%Y-%m-%d").to_string()
}

/// Query cache settings
#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    /// Cache fetched rows between identical queries
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    /// Seconds a cached result stays fresh
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Keep cached results on disk between runs
    #[serde(default = "default_cache_enabled")]
    pub persist: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            ttl_secs: default_cache_ttl(),
            persist: default_cache_enabled(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    600
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Read `config.toml` from the XDG config directory. A missing file
    /// means defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Read and validate a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.metrics.rolling_window == 0 {
            return Err(Error::Config(
                "metrics.rolling_window must be at least 1".to_string(),
            ));
        }
        if !(1..=24).contains(&self.metrics.top_hours) {
            return Err(Error::Config(format!(
                "metrics.top_hours must be within 1..=24, got {}",
                self.metrics.top_hours
            )));
        }
        self.metrics.epoch_date()?;
        self.dashboard
            .default_period
            .parse::<PeriodKey>()
            .map_err(|e| Error::Config(format!("dashboard.default_period: {}", e)))?;
        crate::logging::level_filter(&self.logging.level)?;
        Ok(())
    }

    /// `$XDG_CONFIG_HOME/flowstate/config.toml`
    pub fn config_path() -> PathBuf {
        xdg_base("XDG_CONFIG_HOME", ".config")
            .join("flowstate")
            .join("config.toml")
    }

    /// `$XDG_DATA_HOME/flowstate/`, the default home of the row files
    pub fn data_dir() -> PathBuf {
        xdg_base("XDG_DATA_HOME", ".local/share").join("flowstate")
    }

    /// `$XDG_STATE_HOME/flowstate/`, where logs go
    pub fn state_dir() -> PathBuf {
        xdg_base("XDG_STATE_HOME", ".local/state").join("flowstate")
    }

    /// `$XDG_CACHE_HOME/flowstate/queries/`
    pub fn cache_dir() -> PathBuf {
        xdg_base("XDG_CACHE_HOME", ".cache")
            .join("flowstate")
            .join("queries")
    }

    pub fn log_path() -> PathBuf {
        Self::state_dir().join("flowstate.log")
    }

    /// Directory to read rows from: `dashboard.data_dir`, else [`Self::data_dir`].
    pub fn rows_dir(&self) -> PathBuf {
        self.dashboard
            .data_dir
            .clone()
            .unwrap_or_else(Self::data_dir)
    }
}
