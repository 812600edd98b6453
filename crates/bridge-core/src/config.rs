//! Bridge configuration
//!
//! `BridgeConfig` bundles the provider configuration registered with the
//! telephony authority, the platform availability used to gate the whole
//! integration, and channel sizing for the coordinator task.
//!
//! # Usage Examples
//!
//! ```rust
//! use callbridge_core::config::{BridgeConfig, PlatformAvailability};
//!
//! let config = BridgeConfig::new()
//!     .with_localized_name("Calls")
//!     .with_video(false)
//!     .with_availability(PlatformAvailability::device(Some("de")));
//!
//! assert!(config.availability.is_available());
//! assert_eq!(config.provider.max_calls_per_group, 1);
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{BridgeError, BridgeResult};
use crate::types::HandleKind;

/// Regions where the host authority must not be used for VoIP calls
const RESTRICTED_REGIONS: &[&str] = &["cn"];

/// Provider settings registered with the authority at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfiguration {
    /// Name the authority shows in its call UI
    pub localized_name: String,
    pub supports_video: bool,
    pub max_calls_per_group: u32,
    pub max_call_groups: u32,
    pub supported_handle_types: Vec<HandleKind>,
    /// Template image shown on the authority's call screen
    pub icon_template: Option<PathBuf>,
}

impl Default for ProviderConfiguration {
    fn default() -> Self {
        Self {
            localized_name: "Calls".to_string(),
            supports_video: true,
            max_calls_per_group: 1,
            max_call_groups: 1,
            supported_handle_types: vec![HandleKind::PhoneNumber, HandleKind::Generic],
            icon_template: None,
        }
    }
}

/// What the host platform offers
///
/// The integration is unavailable on simulators, on platforms without a
/// telephony authority, and in restricted regions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformAvailability {
    pub is_simulator: bool,
    pub os_supported: bool,
    /// ISO region code of the current locale, if known
    pub region_code: Option<String>,
}

impl Default for PlatformAvailability {
    fn default() -> Self {
        Self {
            is_simulator: false,
            os_supported: true,
            region_code: None,
        }
    }
}

impl PlatformAvailability {
    /// A real device in the given region
    pub fn device(region_code: Option<&str>) -> Self {
        Self {
            region_code: region_code.map(str::to_string),
            ..Default::default()
        }
    }

    pub fn simulator() -> Self {
        Self {
            is_simulator: true,
            ..Default::default()
        }
    }

    pub fn is_available(&self) -> bool {
        if self.is_simulator || !self.os_supported {
            return false;
        }
        match &self.region_code {
            Some(region) => {
                let region = region.to_lowercase();
                !RESTRICTED_REGIONS.contains(&region.as_str())
            }
            None => true,
        }
    }
}

/// Complete configuration for a call coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub provider: ProviderConfiguration,
    pub availability: PlatformAvailability,
    /// Capacity of the coordinator's command queue
    pub command_buffer: usize,
    /// Capacity of the bridge event broadcast channel
    pub event_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfiguration::default(),
            availability: PlatformAvailability::default(),
            command_buffer: 64,
            event_buffer: 128,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_localized_name(mut self, name: impl Into<String>) -> Self {
        self.provider.localized_name = name.into();
        self
    }

    pub fn with_video(mut self, supports_video: bool) -> Self {
        self.provider.supports_video = supports_video;
        self
    }

    pub fn with_icon_template(mut self, path: impl Into<PathBuf>) -> Self {
        self.provider.icon_template = Some(path.into());
        self
    }

    pub fn with_availability(mut self, availability: PlatformAvailability) -> Self {
        self.availability = availability;
        self
    }

    pub fn with_command_buffer(mut self, capacity: usize) -> Self {
        self.command_buffer = capacity;
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Parse a configuration from JSON, filling omitted fields with defaults
    pub fn from_json(json: &str) -> BridgeResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BridgeError::config(format!("invalid bridge config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the coordinator relies on
    pub fn validate(&self) -> BridgeResult<()> {
        if self.command_buffer == 0 {
            return Err(BridgeError::config("command_buffer must be greater than zero"));
        }
        if self.event_buffer == 0 {
            return Err(BridgeError::config("event_buffer must be greater than zero"));
        }
        if self.provider.max_call_groups != 1 || self.provider.max_calls_per_group != 1 {
            return Err(BridgeError::config(
                "only a single call group with a single call is supported",
            ));
        }
        if self.provider.supported_handle_types.is_empty() {
            return Err(BridgeError::config("at least one handle type must be supported"));
        }
        Ok(())
    }
}
