//! Device location acquisition and nearest-city lookup.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::geo;
use crate::models::{City, CityDirectory, LocationFix, LocationSource, UserLocation};

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location unavailable: {0}")]
    Unavailable(String),
    #[error("location request timed out")]
    Timeout,
}

/// Source of device positions. The real provider is platform chrome; tests
/// and the demo binary use fixed or scripted implementations.
pub trait LocationProvider: Send + Sync {
    fn request_location(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<UserLocation, LocationError>> + Send + '_>>;
}

/// Provider that always reports one configured position.
pub struct FixedLocationProvider {
    location: UserLocation,
}

impl FixedLocationProvider {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            location: UserLocation {
                lat,
                lng,
                accuracy_m: None,
            },
        }
    }
}

impl LocationProvider for FixedLocationProvider {
    fn request_location(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<UserLocation, LocationError>> + Send + '_>> {
        let location = self.location;
        Box::pin(async move { Ok(location) })
    }
}

/// Owns the last-known user location and its provenance.
pub struct GeoLocator {
    provider: Arc<dyn LocationProvider>,
    /// Substitute used after a non-permission failure, when configured
    default_location: Option<UserLocation>,
    last_fix: RwLock<Option<LocationFix>>,
}

impl GeoLocator {
    pub fn new(provider: Arc<dyn LocationProvider>, default_location: Option<UserLocation>) -> Self {
        Self {
            provider,
            default_location,
            last_fix: RwLock::new(None),
        }
    }

    /// Acquire a location fix from the provider.
    ///
    /// Permission denials always surface to the caller and leave the
    /// last-known fix unset. Other failures substitute the configured
    /// default when one exists; the substituted fix is labeled
    /// `DefaultSubstitute` and logged as degraded, never passed off as a
    /// device report.
    pub async fn locate(&self) -> Result<LocationFix, LocationError> {
        match self.provider.request_location().await {
            Ok(location) => {
                let fix = LocationFix {
                    location,
                    source: LocationSource::Device,
                };
                *self.last_fix.write().await = Some(fix);
                info!(lat = location.lat, lng = location.lng, "Location acquired");
                Ok(fix)
            }
            Err(LocationError::PermissionDenied) => {
                warn!("Location permission denied");
                Err(LocationError::PermissionDenied)
            }
            Err(e) => match self.default_location {
                Some(location) => {
                    warn!(
                        error = %e,
                        lat = location.lat,
                        lng = location.lng,
                        "Location unavailable, substituting configured default (degraded)"
                    );
                    let fix = LocationFix {
                        location,
                        source: LocationSource::DefaultSubstitute,
                    };
                    *self.last_fix.write().await = Some(fix);
                    Ok(fix)
                }
                None => Err(e),
            },
        }
    }

    /// The current fix, if any.
    pub async fn last_known(&self) -> Option<LocationFix> {
        *self.last_fix.read().await
    }

    /// Forget the current fix so the next `locate` starts fresh.
    pub async fn reset(&self) {
        *self.last_fix.write().await = None;
    }
}

/// Closest directory city to a location.
///
/// Linear scan; the directory iterates in ascending id order and the
/// comparison is strict, so equidistant cities resolve to the lowest id.
/// Returns None when the directory is empty.
pub fn nearest_city<'a>(location: &UserLocation, cities: &'a CityDirectory) -> Option<&'a City> {
    let mut best: Option<(&City, f64)> = None;

    for city in cities.iter() {
        let distance = geo::distance_km(location.lat, location.lng, city.lat, city.lng);
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((city, distance));
        }
    }

    best.map(|(city, _)| city)
}
