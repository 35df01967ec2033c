use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use zahma::config::Config;
use zahma::geo;
use zahma::models::{day_name, CityDirectory, UserLocation};
use zahma::policy;
use zahma::providers::{TrafficApi, TrafficApiClient};
use zahma::services::location::{nearest_city, FixedLocationProvider, LocationError};
use zahma::services::map_state::{NoopMapSurface, RouteState};
use zahma::services::{FormSyncController, GeoLocator, LocationProvider, MapStateController, PredictionOrchestrator};

/// Stand-in used when no device location source is wired in; the locator
/// falls over to the configured default, explicitly labeled as degraded.
struct NoDeviceProvider;

impl LocationProvider for NoDeviceProvider {
    fn request_location(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<UserLocation, LocationError>> + Send + '_>> {
        Box::pin(async {
            Err(LocationError::Unavailable(
                "no device location provider".to_string(),
            ))
        })
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load config
    let config = Config::load("config.yaml").expect("Failed to load config");
    let directory = match CityDirectory::new(config.cities.clone()) {
        Ok(directory) => Arc::new(directory),
        Err(errors) => {
            for error in &errors {
                tracing::error!(%error, "Invalid city entry");
            }
            panic!("Invalid city reference data in config.yaml");
        }
    };
    tracing::info!(cities = directory.len(), "Loaded configuration");

    // Log remote request diagnostics at debug level
    let (diagnostics_tx, mut diagnostics_rx) = broadcast::channel::<zahma::providers::ApiRequestLog>(100);
    tokio::spawn(async move {
        while let Ok(log) = diagnostics_rx.recv().await {
            tracing::debug!(
                endpoint = %log.endpoint,
                status = log.status,
                duration_ms = log.duration_ms,
                error = log.error.as_deref().unwrap_or(""),
                "API request"
            );
        }
    });

    let client = Arc::new(
        TrafficApiClient::new(&config.api, diagnostics_tx).expect("Failed to build API client"),
    );
    let api: Arc<dyn TrafficApi> = client.clone();

    // Report service health up front; everything below degrades gracefully
    match client.system_status().await {
        Ok(status) if status.success => {
            let model_ready = status
                .files
                .as_ref()
                .and_then(|files| files.model.as_ref())
                .map(|model| model.exists)
                .unwrap_or(false);
            let dataset_size = status
                .status
                .as_ref()
                .and_then(|s| s.dataset_size)
                .unwrap_or(0);
            tracing::info!(model_ready, dataset_size, "Prediction service online");
        }
        _ => {
            tracing::warn!("Prediction service unreachable, predictions will use the local estimate")
        }
    }

    let provider: Arc<dyn LocationProvider> = match config.location.fixed {
        Some(fixed) => Arc::new(FixedLocationProvider::new(fixed.lat, fixed.lng)),
        None => Arc::new(NoDeviceProvider),
    };
    let default_location = config.location.fallback.map(|fallback| UserLocation {
        lat: fallback.lat,
        lng: fallback.lng,
        accuracy_m: None,
    });
    let locator = Arc::new(GeoLocator::new(provider, default_location));

    let orchestrator = Arc::new(PredictionOrchestrator::new(api.clone(), directory.clone()));
    let form = Arc::new(FormSyncController::new(
        orchestrator,
        directory.clone(),
        Duration::from_millis(config.form.debounce_ms),
    ));
    let map = Arc::new(MapStateController::new(
        api,
        directory.clone(),
        Arc::new(NoopMapSurface),
        locator.clone(),
    ));

    // Pick a target city: nearest to the user when a fix is available,
    // otherwise the capital
    let mut target_city = directory.capital_id().unwrap_or(0);
    match locator.locate().await {
        Ok(fix) => {
            if fix.is_degraded() {
                tracing::warn!("Location is a configured default; treat ETA figures as estimates");
            }
            if let Some(city) = nearest_city(&fix.location, &directory) {
                let distance =
                    geo::distance_km(fix.location.lat, fix.location.lng, city.lat, city.lng);
                tracing::info!(city = %city.name, distance_km = format!("{distance:.1}"), "Nearest city");
                target_city = city.id;
            }
        }
        Err(error) => tracing::warn!(%error, "Location unavailable, skipping ETA"),
    }

    // One advisory for the current wall-clock conditions
    form.sync_to_current_time();
    form.set_city(target_city as i64);
    match form.submit().await {
        Ok(result) => {
            let descriptor = policy::describe(result.level);
            let city_name = directory
                .get(result.city_id)
                .map(|city| city.name.clone())
                .unwrap_or_default();
            tracing::info!(
                city = %city_name,
                day = day_name(result.request.day),
                hour = result.request.hour,
                source = ?result.source,
                level = descriptor.label,
                load = descriptor.load_band,
                "{}",
                descriptor.message
            );
            for recommendation in &result.recommendations {
                tracing::info!("  - {}", recommendation);
            }
        }
        Err(error) => tracing::error!(%error, "Submission rejected"),
    }

    // Map state: select the target city and, with a location fix, an ETA
    if let Err(error) = map.select_city(target_city).await {
        tracing::error!(%error, "Could not select city");
        return;
    }

    if locator.last_known().await.is_some() {
        let _ = map.show_user_location().await;
        if let Ok(request) = form.canonical_request() {
            if let Err(error) = map.request_eta(target_city, &request).await {
                tracing::warn!(%error, "ETA request not possible");
            }
            match map.route_state().await {
                RouteState::RouteReady(route_eta) => {
                    tracing::info!(
                        distance_km = route_eta.eta.distance_km.unwrap_or(0.0),
                        travel_minutes = route_eta.eta.total_travel_time.unwrap_or(0.0),
                        delay_minutes = route_eta.eta.delay_minutes.unwrap_or(0.0),
                        impact = route_eta.eta.traffic_impact.as_deref().unwrap_or(""),
                        "ETA ready"
                    );
                }
                RouteState::RouteFailed { reason, .. } => {
                    tracing::warn!(%reason, "No route available");
                }
                _ => {}
            }
        }
    }
}
