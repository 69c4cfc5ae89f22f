//! TOML configuration.
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration. CLI flags override whatever is loaded here.

use crate::data::clean::DEFAULT_MIN_ROWS;
use crate::data::features::DEFAULT_FEATURE_WINDOW;
use crate::options::extractor::DEFAULT_RISK_FREE_RATE;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IvlabConfig {
    /// Root for the pipeline cache and IV snapshots.
    pub cache_dir: PathBuf,
    pub min_rows: usize,
    /// Annualized, continuously compounded.
    pub risk_free_rate: f64,
    pub iv_max_age_secs: u64,
    pub feature_window: usize,
    pub default_start: NaiveDate,
    pub default_end: NaiveDate,
    pub universe: Vec<String>,
    /// Master seed for the synthetic provider.
    pub seed: u64,
}

impl Default for IvlabConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("data/cache"),
            min_rows: DEFAULT_MIN_ROWS,
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
            iv_max_age_secs: 60 * 60 * 24,
            feature_window: DEFAULT_FEATURE_WINDOW,
            default_start: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap_or_default(),
            default_end: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            universe: ["SPY", "QQQ", "TLT", "GLD", "AAPL", "MSFT"]
                .into_iter()
                .map(String::from)
                .collect(),
            seed: 42,
        }
    }
}

impl IvlabConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_start > self.default_end {
            return Err(ConfigError::Invalid(format!(
                "default_start {} is after default_end {}",
                self.default_start, self.default_end
            )));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(ConfigError::Invalid("risk_free_rate must be finite".into()));
        }
        if self.feature_window < 2 {
            return Err(ConfigError::Invalid("feature_window must be at least 2".into()));
        }
        Ok(())
    }

    pub fn iv_max_age(&self) -> Duration {
        Duration::from_secs(self.iv_max_age_secs)
    }

    /// Directory holding IV snapshot files.
    pub fn iv_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("iv")
    }
}
