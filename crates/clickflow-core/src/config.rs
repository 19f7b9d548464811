//! ClickFlow configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ClickflowError, Result};
use crate::types::VisitorStrategy;

/// Root configuration, loaded from `~/.clickflow/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickflowConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub plan: PlanConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

fn default_db_path() -> String { "~/.clickflow/clickflow.db".into() }

impl Default for ClickflowConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            scheduler: SchedulerConfig::default(),
            plan: PlanConfig::default(),
            engine: EngineConfig::default(),
            tokens: TokenConfig::default(),
            reconcile: ReconcileConfig::default(),
            proxy: ProxyConfig::default(),
        }
    }
}

impl ClickflowConfig {
    /// Load config from the default path, falling back to defaults when the
    /// file does not exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClickflowError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ClickflowError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ClickflowError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".clickflow")
            .join("config.toml")
    }

    /// Get the ClickFlow home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".clickflow")
    }

    /// Tokens charged per successful visit for a strategy.
    pub fn token_cost(&self, strategy: VisitorStrategy) -> u32 {
        match strategy {
            VisitorStrategy::Lightweight => self.tokens.lightweight_cost,
            VisitorStrategy::Browser => self.tokens.browser_cost,
        }
    }
}

/// Trigger clock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Fixed offset (whole hours, east of UTC) anchoring the business day.
    /// All three trigger classes use this one clock, not per-user timezones.
    #[serde(default = "default_tz_offset")]
    pub timezone_offset_hours: i32,
}

fn default_tz_offset() -> i32 { 8 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { timezone_offset_hours: default_tz_offset() }
    }
}

/// Daily plan generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Bounded jitter fraction applied to each hour's weighted target.
    #[serde(default = "default_variance")]
    pub variance: f64,
}

fn default_variance() -> f64 { 0.30 }

impl Default for PlanConfig {
    fn default() -> Self {
        Self { variance: default_variance() }
    }
}

/// Execution engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hard per-visit timeout. A hung visitor counts as a failure.
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
    /// Seconds trimmed from each edge of the hour when sampling instants.
    #[serde(default = "default_edge_trim")]
    pub edge_trim_secs: u32,
    /// User agent sent with every visit.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_attempt_timeout() -> u64 { 45 }
fn default_edge_trim() -> u32 { 300 }
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0.0.0 Safari/537.36"
        .into()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_secs: default_attempt_timeout(),
            edge_trim_secs: default_edge_trim(),
            user_agent: default_user_agent(),
        }
    }
}

/// Token pricing per strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_lightweight_cost")]
    pub lightweight_cost: u32,
    #[serde(default = "default_browser_cost")]
    pub browser_cost: u32,
}

fn default_lightweight_cost() -> u32 { 1 }
fn default_browser_cost() -> u32 { 2 }

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            lightweight_cost: default_lightweight_cost(),
            browser_cost: default_browser_cost(),
        }
    }
}

/// Reconciliation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Minutes past the hour at which reconciliation runs.
    #[serde(default = "default_reconcile_minute")]
    pub minute_offset: u32,
    /// Tokens-per-success ratio above which usage is flagged abnormal.
    /// Normal ratio is 1–2; the threshold is deliberately loose.
    #[serde(default = "default_anomaly_ratio")]
    pub anomaly_ratio: f64,
}

fn default_reconcile_minute() -> u32 { 5 }
fn default_anomaly_ratio() -> f64 { 3.0 }

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            minute_offset: default_reconcile_minute(),
            anomaly_ratio: default_anomaly_ratio(),
        }
    }
}

/// Rotating proxy source configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProxyConfig {
    /// HTTP endpoint returning one `host:port` proxy per line.
    /// None disables proxying entirely.
    #[serde(default)]
    pub endpoint: Option<String>,
}
