//! Display semantics for traffic levels.
//!
//! This table is the single source of truth for level labels and colors so
//! that remote-derived and locally estimated results render identically
//! when the levels match.

use crate::models::TrafficLevel;

/// Display attributes for one traffic level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelDescriptor {
    pub label: &'static str,
    /// CSS hex color used for markers and badges
    pub color: &'static str,
    pub message: &'static str,
    /// Expected road load band, as shown on the city card
    pub load_band: &'static str,
    pub advisory: &'static str,
}

const LOW: LevelDescriptor = LevelDescriptor {
    label: "Low",
    color: "#28a745",
    message: "Traffic is light",
    load_band: "10-30%",
    advisory: "No delays expected on the usual routes",
};

const MEDIUM: LevelDescriptor = LevelDescriptor {
    label: "Medium",
    color: "#ffc107",
    message: "Moderate traffic expected",
    load_band: "40-70%",
    advisory: "Allow a few extra minutes for your trip",
};

const HIGH: LevelDescriptor = LevelDescriptor {
    label: "High",
    color: "#dc3545",
    message: "Heavy traffic - consider alternate routes",
    load_band: "75-100%",
    advisory: "Delay travel or take an alternate route if you can",
};

const UNKNOWN: LevelDescriptor = LevelDescriptor {
    label: "Unknown",
    color: "#6c757d",
    message: "No traffic data available",
    load_band: "unknown",
    advisory: "Live traffic data is currently unavailable",
};

/// Display attributes for a known level.
pub fn describe(level: TrafficLevel) -> &'static LevelDescriptor {
    match level {
        TrafficLevel::Low => &LOW,
        TrafficLevel::Medium => &MEDIUM,
        TrafficLevel::High => &HIGH,
    }
}

/// Display attributes for a raw wire code. Out-of-range codes map to the
/// "unknown" descriptor rather than failing.
pub fn describe_code(code: i64) -> &'static LevelDescriptor {
    match TrafficLevel::from_code(code) {
        Some(level) => describe(level),
        None => &UNKNOWN,
    }
}

/// The descriptor used when no live data is available.
pub fn unknown() -> &'static LevelDescriptor {
    &UNKNOWN
}
