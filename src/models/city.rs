use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reference data for a single city, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct City {
    /// Stable numeric identifier, unique within the directory
    pub id: u32,
    /// Display name (e.g., "Tunis")
    pub name: String,
    /// Governorate the city belongs to, where known
    #[serde(default)]
    pub governorate: Option<String>,
    /// Latitude in WGS84 degrees
    pub lat: f64,
    /// Longitude in WGS84 degrees
    pub lng: f64,
    /// Resident population, where known
    #[serde(default)]
    pub population: Option<u64>,
    /// Named congestion hotspots, in display order
    #[serde(default)]
    pub hotspots: Vec<String>,
}

#[derive(Debug, Error)]
pub enum CityDataError {
    #[error("duplicate city id {0}")]
    DuplicateId(u32),
    #[error("city {id}: latitude {lat} outside [-90, 90]")]
    LatitudeOutOfRange { id: u32, lat: f64 },
    #[error("city {id}: longitude {lng} outside [-180, 180]")]
    LongitudeOutOfRange { id: u32, lng: f64 },
    #[error("city {id}: empty name")]
    EmptyName { id: u32 },
}

/// Immutable, validated city reference data.
///
/// The directory is built once from configuration and shared read-only by
/// every controller. It also ranks cities by population so the fallback
/// scorer can identify the capital and second city without hardcoded ids.
#[derive(Debug, Clone)]
pub struct CityDirectory {
    cities: Vec<City>,
    capital_id: Option<u32>,
    second_city_id: Option<u32>,
}

impl CityDirectory {
    /// Validate and index the given cities.
    ///
    /// Returns every violation found, not just the first.
    pub fn new(mut cities: Vec<City>) -> Result<Self, Vec<CityDataError>> {
        let mut errors = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for city in &cities {
            if !seen.insert(city.id) {
                errors.push(CityDataError::DuplicateId(city.id));
            }
            if !(-90.0..=90.0).contains(&city.lat) {
                errors.push(CityDataError::LatitudeOutOfRange {
                    id: city.id,
                    lat: city.lat,
                });
            }
            if !(-180.0..=180.0).contains(&city.lng) {
                errors.push(CityDataError::LongitudeOutOfRange {
                    id: city.id,
                    lng: city.lng,
                });
            }
            if city.name.trim().is_empty() {
                errors.push(CityDataError::EmptyName { id: city.id });
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        cities.sort_by_key(|c| c.id);

        // Population ranking, ties broken by lower id
        let mut ranked: Vec<(u64, u32)> = cities
            .iter()
            .map(|c| (c.population.unwrap_or(0), c.id))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        Ok(Self {
            capital_id: ranked.first().map(|&(_, id)| id),
            second_city_id: ranked.get(1).map(|&(_, id)| id),
            cities,
        })
    }

    pub fn get(&self, id: u32) -> Option<&City> {
        self.cities.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    /// All cities in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &City> {
        self.cities.iter()
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }

    /// Most populous city in the directory.
    pub fn capital_id(&self) -> Option<u32> {
        self.capital_id
    }

    /// Second most populous city in the directory.
    pub fn second_city_id(&self) -> Option<u32> {
        self.second_city_id
    }
}
