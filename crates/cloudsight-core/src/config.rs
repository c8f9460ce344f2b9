//! Configuration for cloudsight analysis runs.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`CLOUDSIGHT_ANALYSIS__` prefix)
//! 2. Config file (`cloudsight.toml`, `[analysis]` section)
//! 3. Defaults
//!
//! The loaded value is immutable and passed by reference into the scorer and
//! engine; nothing reads it from a global.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::Severity;

/// Top-level analysis configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AnalysisConfig {
    /// Score deduction per finding severity.
    #[serde(default)]
    pub severity_weights: SeverityWeights,

    /// TOML file with `[[rules]]` entries replacing the built-in posture
    /// rule table.
    #[serde(default)]
    pub rules_file: Option<String>,

    /// Fan out per-resource scoring and per-edge simulation across threads.
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Poll interval for `cloudsight watch`.
    #[serde(default = "default_watch_interval")]
    pub watch_interval_ms: u64,
}

/// Score deduction applied per finding of each severity.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct SeverityWeights {
    #[serde(default = "default_critical")]
    pub critical: u32,
    #[serde(default = "default_high")]
    pub high: u32,
    #[serde(default = "default_medium")]
    pub medium: u32,
    #[serde(default = "default_low")]
    pub low: u32,
    #[serde(default)]
    pub info: u32,
}

impl SeverityWeights {
    pub fn weight(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        }
    }
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            critical: default_critical(),
            high: default_high(),
            medium: default_medium(),
            low: default_low(),
            info: 0,
        }
    }
}

fn default_critical() -> u32 {
    40
}

fn default_high() -> u32 {
    25
}

fn default_medium() -> u32 {
    10
}

fn default_low() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_watch_interval() -> u64 {
    500
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            severity_weights: SeverityWeights::default(),
            rules_file: None,
            parallel: true,
            watch_interval_ms: default_watch_interval(),
        }
    }
}

impl AnalysisConfig {
    /// Load `[analysis]` from `<file_prefix>.toml` (optional) overlaid with
    /// `CLOUDSIGHT_ANALYSIS__*` environment variables.
    pub fn load(file_prefix: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("CLOUDSIGHT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match cfg.get::<AnalysisConfig>("analysis") {
            Ok(c) => Ok(c),
            Err(config::ConfigError::NotFound(_)) => Ok(AnalysisConfig::default()),
            Err(e) => Err(e.into()),
        }
    }
}
