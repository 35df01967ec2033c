pub mod city;

use serde::{Deserialize, Serialize};

pub use city::{City, CityDataError, CityDirectory};

/// Monday-first day names matching the request day convention.
pub const DAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Display name for a Monday-first day index.
pub fn day_name(day: u8) -> &'static str {
    DAY_NAMES.get(day as usize).copied().unwrap_or("Unknown")
}

/// Predicted congestion category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficLevel {
    Low,
    Medium,
    High,
}

impl TrafficLevel {
    /// Numeric wire code (0/1/2).
    pub fn code(self) -> i64 {
        match self {
            TrafficLevel::Low => 0,
            TrafficLevel::Medium => 1,
            TrafficLevel::High => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TrafficLevel::Low),
            1 => Some(TrafficLevel::Medium),
            2 => Some(TrafficLevel::High),
            _ => None,
        }
    }

    /// Parse a wire label such as "High" (case-insensitive).
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Some(TrafficLevel::Low),
            "medium" => Some(TrafficLevel::Medium),
            "high" => Some(TrafficLevel::High),
            _ => None,
        }
    }
}

/// Weather condition codes accepted by the request form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weather {
    Clear,
    Rain,
    Fog,
}

impl Weather {
    pub fn code(self) -> i64 {
        match self {
            Weather::Clear => 0,
            Weather::Rain => 1,
            Weather::Fog => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Weather::Clear),
            1 => Some(Weather::Rain),
            2 => Some(Weather::Fog),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Weather::Clear => "Clear",
            Weather::Rain => "Rain",
            Weather::Fog => "Fog",
        }
    }

    /// Congestion impact weight of this condition.
    pub fn impact(self) -> f64 {
        match self {
            Weather::Clear => 0.0,
            Weather::Rain => 1.0,
            Weather::Fog => 0.5,
        }
    }
}

/// A validated prediction request. Immutable once built; construction goes
/// through form validation so all fields are known to be in range and the
/// city id references the directory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PredictionRequest {
    /// Hour of day, 0-23
    pub hour: u8,
    /// Day of week, 0 = Monday .. 6 = Sunday
    pub day: u8,
    /// City the prediction applies to
    pub city_id: u32,
    pub weather: Weather,
}

impl PredictionRequest {
    pub fn is_weekend(&self) -> bool {
        self.day >= 5
    }
}

/// Where a prediction result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionSource {
    /// Returned by the remote prediction service
    Remote,
    /// Computed locally because the remote service was unavailable
    Fallback,
}

/// The authoritative outcome of one prediction request.
///
/// A new result supersedes the previous one for the request stream; results
/// are never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub source: PredictionSource,
    pub level: TrafficLevel,
    /// Advisory strings in display order
    pub recommendations: Vec<String>,
    pub city_id: u32,
    /// The request this result answers
    pub request: PredictionRequest,
}

/// A device-reported (or substituted) position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UserLocation {
    pub lat: f64,
    pub lng: f64,
    /// Horizontal accuracy in meters, where the provider reports one
    #[serde(default)]
    pub accuracy_m: Option<f64>,
}

/// Provenance of a location fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationSource {
    /// Reported by the device location provider
    Device,
    /// Configured default substituted after a non-permission failure.
    /// Always a degraded state; never to be presented as a device report.
    DefaultSubstitute,
}

/// A user location together with how it was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocationFix {
    pub location: UserLocation,
    pub source: LocationSource,
}

impl LocationFix {
    pub fn is_degraded(&self) -> bool {
        self.source == LocationSource::DefaultSubstitute
    }
}
