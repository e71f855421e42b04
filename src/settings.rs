//! Settings sources for coordinator defaults
//!
//! The coordinator only ever asks for string values by key. Where they come
//! from is up to the embedding program: nothing at all ([`NoSettings`]), an
//! in-memory map ([`MapSettings`]) or a TOML file ([`SurveyConfig`]).

use crate::error::{Result, SurveyError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::path::Path;

/// Type name used to prefix coordinator setting keys
pub const COORDINATOR_TYPE_NAME: &str = "BottleneckCoordinator";

/// Key for the default allow pattern
pub fn default_allow_key() -> String {
    format!("{COORDINATOR_TYPE_NAME}-DefaultAllow")
}

/// Key for the default block pattern
pub fn default_block_key() -> String {
    format!("{COORDINATOR_TYPE_NAME}-DefaultBlock")
}

/// String key → string value lookup
pub trait Settings: Send + Sync + Debug {
    fn get(&self, key: &str) -> Option<String>;
}

/// A settings source with no values
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSettings;

impl Settings for NoSettings {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }
}

/// In-memory settings
#[derive(Debug, Clone, Default)]
pub struct MapSettings {
    values: HashMap<String, String>,
}

impl MapSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, builder style
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl Settings for MapSettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// File-backed survey configuration
///
/// # Example TOML
/// ```toml
/// default_allow = "^db\\."
/// default_block = "\\.replica$"
/// default_window_ms = 1000
/// default_top = 5
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    /// Allow pattern applied when a surveyor is created without one
    pub default_allow: Option<String>,
    /// Block pattern applied when a surveyor is created without one
    pub default_block: Option<String>,
    /// Time window length used by the CLI when none is given
    pub default_window_ms: u64,
    /// Number of entries reported by the CLI
    pub default_top: usize,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            default_allow: None,
            default_block: None,
            default_window_ms: 1000,
            default_top: 5,
        }
    }
}

impl SurveyConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            SurveyError::Config(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SurveyConfig =
            toml::from_str(content).map_err(|e| SurveyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that patterns compile and the window is non-empty
    pub fn validate(&self) -> Result<()> {
        for (key, pattern) in [
            (default_allow_key(), &self.default_allow),
            (default_block_key(), &self.default_block),
        ] {
            if let Some(pattern) = pattern {
                regex::Regex::new(pattern)
                    .map_err(|source| SurveyError::InvalidPattern { key, source })?;
            }
        }
        if self.default_window_ms == 0 {
            return Err(SurveyError::InvalidWindowPeriod);
        }
        Ok(())
    }
}

impl Settings for SurveyConfig {
    fn get(&self, key: &str) -> Option<String> {
        if key == default_allow_key() {
            self.default_allow.clone()
        } else if key == default_block_key() {
            self.default_block.clone()
        } else {
            None
        }
    }
}
