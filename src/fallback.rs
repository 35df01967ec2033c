//! Deterministic local traffic estimation.
//!
//! Used whenever the remote prediction service is unreachable or reports a
//! failure. The scorer is pure: identical requests always produce identical
//! results, which is what makes degraded operation reproducible.

use std::sync::Arc;

use crate::models::{
    CityDirectory, PredictionRequest, PredictionResult, PredictionSource, TrafficLevel,
};

const MORNING_RUSH: std::ops::RangeInclusive<u8> = 7..=9;
const EVENING_RUSH: std::ops::RangeInclusive<u8> = 16..=19;
const MIDDAY: std::ops::RangeInclusive<u8> = 12..=14;

const MORNING_RUSH_WEIGHT: f64 = 2.0;
const EVENING_RUSH_WEIGHT: f64 = 2.5;
const MIDDAY_WEIGHT: f64 = 1.0;

/// Friday is day 4 in the Monday-first convention
const FRIDAY: u8 = 4;
const FRIDAY_WEIGHT: f64 = 1.0;
const WEEKEND_WEIGHT: f64 = -0.5;

const CAPITAL_WEIGHT: f64 = 1.0;
const SECOND_CITY_WEIGHT: f64 = 0.5;

const HIGH_THRESHOLD: f64 = 3.5;
const MEDIUM_THRESHOLD: f64 = 1.5;

/// Local heuristic predictor used when the remote service is unavailable.
pub struct FallbackPredictor {
    directory: Arc<CityDirectory>,
}

impl FallbackPredictor {
    pub fn new(directory: Arc<CityDirectory>) -> Self {
        Self { directory }
    }

    /// Raw congestion score for a request.
    pub fn score(&self, request: &PredictionRequest) -> f64 {
        let mut score = 0.0;

        if MORNING_RUSH.contains(&request.hour) {
            score += MORNING_RUSH_WEIGHT;
        } else if EVENING_RUSH.contains(&request.hour) {
            score += EVENING_RUSH_WEIGHT;
        } else if MIDDAY.contains(&request.hour) {
            score += MIDDAY_WEIGHT;
        }

        if request.day == FRIDAY {
            score += FRIDAY_WEIGHT;
        } else if request.is_weekend() {
            score += WEEKEND_WEIGHT;
        }

        if Some(request.city_id) == self.directory.capital_id() {
            score += CAPITAL_WEIGHT;
        } else if Some(request.city_id) == self.directory.second_city_id() {
            score += SECOND_CITY_WEIGHT;
        }

        score += request.weather.impact();

        score
    }

    fn classify(score: f64) -> TrafficLevel {
        if score >= HIGH_THRESHOLD {
            TrafficLevel::High
        } else if score >= MEDIUM_THRESHOLD {
            TrafficLevel::Medium
        } else {
            TrafficLevel::Low
        }
    }

    fn recommendations(&self, level: TrafficLevel, request: &PredictionRequest) -> Vec<String> {
        let mut recommendations: Vec<String> = match level {
            TrafficLevel::High => vec![
                "Consider using public transportation".to_string(),
                "Allow extra travel time".to_string(),
            ],
            TrafficLevel::Medium => vec![
                "Normal travel time expected".to_string(),
                "Check live traffic updates before leaving".to_string(),
            ],
            TrafficLevel::Low => vec![
                "Smooth driving conditions".to_string(),
                "Normal travel time".to_string(),
            ],
        };

        if level == TrafficLevel::High && MORNING_RUSH.contains(&request.hour) {
            recommendations.push("Avoid peak hours if possible".to_string());
        }

        if let Some(city) = self.directory.get(request.city_id) {
            if !city.hotspots.is_empty() {
                recommendations.push(format!("Busy areas: {}", city.hotspots.join(", ")));
            }
        }

        recommendations
    }

    /// Estimate traffic for a request without any network or IO.
    pub fn predict(&self, request: &PredictionRequest) -> PredictionResult {
        let level = Self::classify(self.score(request));

        PredictionResult {
            source: PredictionSource::Fallback,
            level,
            recommendations: self.recommendations(level, request),
            city_id: request.city_id,
            request: *request,
        }
    }
}
