use crate::error::Result;
use crate::models::{RunOptions, WaitOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File-based defaults for both primitives.
///
/// ```toml
/// [run]
/// timeout_ms = 30000
///
/// [wait]
/// poll_interval_ms = 500
/// timeout_ms = 0
/// ```
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProcwatchConfig {
    #[serde(default)]
    pub run: RunOptions,
    #[serde(default)]
    pub wait: WaitOptions,
}

impl ProcwatchConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
