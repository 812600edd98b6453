//! Configuration file loading
//!
//! Settings come from a TOML file (`--config`, `CALLBRIDGE_CONFIG`, or
//! `<config dir>/callbridge/config.toml` when present) and are then
//! overlaid with command-line flags.

use anyhow::{Context, Result};
use callbridge_core::config::BridgeConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::logging::LogSettings;

const CONFIG_DIR: &str = "callbridge";
const CONFIG_FILE: &str = "config.toml";

/// Knobs of the simulated authority and scenarios
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Account handed to the start handler
    pub account_id: String,
    /// Delay before the simulated authority performs an accepted request
    pub authority_latency_ms: u64,
    /// How long a connected call is held before hanging up
    pub hold_ms: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            account_id: "default".to_string(),
            authority_latency_ms: 50,
            hold_ms: 500,
        }
    }
}

/// Everything the driver reads from its config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log: LogSettings,
    pub bridge: BridgeConfig,
    pub simulation: SimulationSettings,
}

impl Settings {
    /// Load from `path`, or from the default location if it exists
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match default_path().filter(|path| path.is_file()) {
                Some(path) => Self::from_file(&path),
                None => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let settings = Self::from_toml(&text).with_context(|| format!("invalid config file {}", path.display()))?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// `<config dir>/callbridge/config.toml`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}
