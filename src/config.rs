use serde::Deserialize;
use std::path::Path;

use crate::models::City;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// City reference data, loaded once and shared read-only
    pub cities: Vec<City>,
    /// Remote traffic service settings
    #[serde(default)]
    pub api: ApiConfig,
    /// Form submission settings
    #[serde(default)]
    pub form: FormConfig,
    /// Initial map view
    #[serde(default)]
    pub map: MapConfig,
    /// Location acquisition settings
    #[serde(default)]
    pub location: LocationConfig,
}

/// Settings for the remote traffic service client
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the prediction service (default: http://localhost:5000)
    #[serde(default = "ApiConfig::default_base_url")]
    pub base_url: String,
    /// Overall request timeout in seconds (default: 30)
    #[serde(default = "ApiConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    /// Connect timeout in seconds (default: 10)
    #[serde(default = "ApiConfig::default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            timeout_secs: Self::default_timeout_secs(),
            connect_timeout_secs: Self::default_connect_timeout_secs(),
        }
    }
}

impl ApiConfig {
    fn default_base_url() -> String {
        "http://localhost:5000".to_string()
    }
    fn default_timeout_secs() -> u64 {
        30
    }
    fn default_connect_timeout_secs() -> u64 {
        10
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormConfig {
    /// Quiet period before an auto-submission fires, in milliseconds
    /// (default: 1000)
    #[serde(default = "FormConfig::default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            debounce_ms: Self::default_debounce_ms(),
        }
    }
}

impl FormConfig {
    fn default_debounce_ms() -> u64 {
        1000
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MapConfig {
    /// Initial view center as [lat, lng] (default: central Tunisia)
    #[serde(default = "MapConfig::default_center")]
    pub center: [f64; 2],
    /// Initial zoom level (default: 7)
    #[serde(default = "MapConfig::default_zoom")]
    pub zoom: u8,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            center: Self::default_center(),
            zoom: Self::default_zoom(),
        }
    }
}

impl MapConfig {
    fn default_center() -> [f64; 2] {
        [34.0, 9.0]
    }
    fn default_zoom() -> u8 {
        7
    }
}

/// A configured coordinate pair.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct LocationConfig {
    /// Position reported by the binary's fixed location provider, when the
    /// real device provider is not wired in
    #[serde(default)]
    pub fixed: Option<LatLng>,
    /// Substitute position used after a non-permission location failure.
    /// Substituted fixes are always labeled as degraded.
    #[serde(default)]
    pub fallback: Option<LatLng>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}
