//! Runtime configuration loaded from an optional TOML file.
//!
//! ```toml
//! [daily]
//! window_start = "05:00:00"
//! window_end = "09:00:00"
//! policy = "flag"          # or "reject"
//! summary_days = 7
//!
//! [closure]
//! confirmation_token = "confirmo"
//! require_closed_blocks = false
//! ```

use std::path::Path;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::{BacklogError, Result};

/// What happens to a daily registered outside the window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WindowPolicy {
    /// Save it and mark it out of window.
    #[default]
    Flag,
    /// Refuse to save it.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DailyConfig {
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
    pub policy: WindowPolicy,
    pub summary_days: i64,
}

impl Default for DailyConfig {
    fn default() -> Self {
        DailyConfig {
            window_start: NaiveTime::from_hms_opt(5, 0, 0).unwrap_or(NaiveTime::MIN),
            window_end: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            policy: WindowPolicy::Flag,
            summary_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClosureConfig {
    pub confirmation_token: String,
    pub require_closed_blocks: bool,
}

impl Default for ClosureConfig {
    fn default() -> Self {
        ClosureConfig { confirmation_token: "confirmo".to_string(), require_closed_blocks: false }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub daily: DailyConfig,
    pub closure: ClosureConfig,
}

impl Config {
    /// Load configuration from a file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| BacklogError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.daily.window_start > self.daily.window_end {
            return Err(BacklogError::Config(format!(
                "daily.window_start ({}) is after daily.window_end ({})",
                self.daily.window_start, self.daily.window_end
            )));
        }
        if self.daily.summary_days < 1 {
            return Err(BacklogError::Config("daily.summary_days must be at least 1".into()));
        }
        if self.closure.confirmation_token.trim().is_empty() {
            return Err(BacklogError::Config("closure.confirmation_token cannot be empty".into()));
        }
        Ok(())
    }
}
