//! Map marker and selection state.
//!
//! The controller owns three slots: the selected city (with its live
//! traffic), the all-cities overlay, and the route/ETA overlay. Each slot
//! carries a monotonically increasing token; an async response is applied
//! only when its token is still the latest issued for that slot, so a slow
//! stale response can never overwrite a newer one. Cancellation is logical
//! only - in-flight calls complete and their results are discarded.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::models::{City, CityDirectory, PredictionRequest};
use crate::policy;
use crate::providers::traffic_api::{CityTraffic, EtaSummary, RouteGeometry, TrafficApi};
use crate::services::location::GeoLocator;

/// Zoom level used when centering on a selected city
const SELECTED_ZOOM: u8 = 12;

/// Bootstrap palette entries for the non-traffic markers
const USER_COLOR: &str = "#17a2b8";
const DESTINATION_COLOR: &str = "#0d6efd";

/// Stable identity of a marker on the map surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerId {
    /// The currently selected city
    Selection,
    /// One city in the all-cities overlay
    City(u32),
    /// The user's location
    User,
    /// The ETA destination
    Destination,
}

/// Rendering intents issued by the controller. Pixel-level drawing belongs
/// to the host surface; a headless run uses the no-op implementation.
pub trait MapSurface: Send + Sync {
    fn place_marker(&self, id: MarkerId, lat: f64, lng: f64, label: &str, color: &str);
    fn remove_marker(&self, id: MarkerId);
    fn draw_route(&self, coordinates: &[[f64; 2]]);
    fn clear_route(&self);
    fn set_view(&self, lat: f64, lng: f64, zoom: u8);
    fn fit_bounds(&self, south: f64, west: f64, north: f64, east: f64);
}

/// Surface that draws nothing.
pub struct NoopMapSurface;

impl MapSurface for NoopMapSurface {
    fn place_marker(&self, _id: MarkerId, _lat: f64, _lng: f64, _label: &str, _color: &str) {}
    fn remove_marker(&self, _id: MarkerId) {}
    fn draw_route(&self, _coordinates: &[[f64; 2]]) {}
    fn clear_route(&self) {}
    fn set_view(&self, _lat: f64, _lng: f64, _zoom: u8) {}
    fn fit_bounds(&self, _south: f64, _west: f64, _north: f64, _east: f64) {}
}

/// Selected-city slot.
#[derive(Debug, Clone)]
pub enum SelectionState {
    Unselected,
    Loading {
        city_id: u32,
    },
    /// Traffic is None when the live fetch failed; static city data still
    /// renders in that case
    Loaded {
        city_id: u32,
        traffic: Option<CityTraffic>,
    },
}

/// Route and ETA for one destination, as returned by the service.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RouteEta {
    pub city_id: u32,
    pub route: RouteGeometry,
    pub eta: EtaSummary,
}

/// Route/ETA slot.
#[derive(Debug, Clone)]
pub enum RouteState {
    NoLocation,
    LocationKnown,
    RouteRequested { city_id: u32 },
    RouteReady(RouteEta),
    RouteFailed { city_id: u32, reason: String },
}

/// State transitions published for UI binding.
#[derive(Debug, Clone)]
pub enum MapEvent {
    SelectionLoading { city_id: u32 },
    SelectionLoaded { city_id: u32, has_live_traffic: bool },
    SelectionCleared,
    OverlayEnabled { rendered: usize, failed: usize },
    OverlayDisabled,
    RouteRequested { city_id: u32 },
    RouteReady { city_id: u32 },
    RouteFailed { city_id: u32, reason: String },
}

pub type MapEventSender = broadcast::Sender<MapEvent>;

#[derive(Debug, Error)]
pub enum MapStateError {
    #[error("unknown city id {0}")]
    UnknownCity(u32),
    #[error("user location is not known yet")]
    LocationUnknown,
}

struct Slots {
    selection: SelectionState,
    selection_token: u64,
    route: RouteState,
    route_token: u64,
    overlay_enabled: bool,
    overlay_token: u64,
}

pub struct MapStateController {
    api: Arc<dyn TrafficApi>,
    directory: Arc<CityDirectory>,
    surface: Arc<dyn MapSurface>,
    locator: Arc<GeoLocator>,
    slots: RwLock<Slots>,
    events_tx: MapEventSender,
}

impl MapStateController {
    pub fn new(
        api: Arc<dyn TrafficApi>,
        directory: Arc<CityDirectory>,
        surface: Arc<dyn MapSurface>,
        locator: Arc<GeoLocator>,
    ) -> Self {
        // Capacity 16 - UI consumers only care about recent transitions
        let (events_tx, _) = broadcast::channel(16);

        Self {
            api,
            directory,
            surface,
            locator,
            slots: RwLock::new(Slots {
                selection: SelectionState::Unselected,
                selection_token: 0,
                route: RouteState::NoLocation,
                route_token: 0,
                overlay_enabled: false,
                overlay_token: 0,
            }),
            events_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MapEvent> {
        self.events_tx.subscribe()
    }

    fn emit(&self, event: MapEvent) {
        // Ignore send errors - they just mean no one is listening
        let _ = self.events_tx.send(event);
    }

    /// Select a city and load its live traffic.
    ///
    /// The selection marker and view change immediately; the traffic badge
    /// fills in when the fetch resolves. A newer selection (or a clear)
    /// supersedes the fetch and its late response is discarded. A failed
    /// fetch is non-fatal: the city stays selected with static data only.
    pub async fn select_city(&self, city_id: u32) -> Result<(), MapStateError> {
        let city = self
            .directory
            .get(city_id)
            .ok_or(MapStateError::UnknownCity(city_id))?
            .clone();

        let token = {
            let mut slots = self.slots.write().await;
            slots.selection_token += 1;
            slots.selection = SelectionState::Loading { city_id };
            slots.selection_token
        };

        info!(city_id, city = %city.name, "City selected, loading traffic");
        self.emit(MapEvent::SelectionLoading { city_id });
        self.surface.place_marker(
            MarkerId::Selection,
            city.lat,
            city.lng,
            &city.name,
            policy::unknown().color,
        );
        self.surface.set_view(city.lat, city.lng, SELECTED_ZOOM);

        let traffic = match self.api.traffic_for_city(city_id).await {
            Ok(response) if response.success => response.traffic,
            Ok(response) => {
                warn!(
                    city_id,
                    error = response.error.as_deref().unwrap_or("unknown"),
                    "Traffic fetch reported failure, showing static city data"
                );
                None
            }
            Err(e) => {
                warn!(city_id, error = %e, "Traffic fetch failed, showing static city data");
                None
            }
        };

        let mut slots = self.slots.write().await;
        if slots.selection_token != token {
            debug!(city_id, "Discarding stale traffic response");
            return Ok(());
        }

        if let Some(traffic) = &traffic {
            let descriptor = policy::describe_code(traffic.level.unwrap_or(-1));
            self.surface.place_marker(
                MarkerId::Selection,
                city.lat,
                city.lng,
                &city.name,
                descriptor.color,
            );
        }

        let has_live_traffic = traffic.is_some();
        slots.selection = SelectionState::Loaded { city_id, traffic };
        drop(slots);

        self.emit(MapEvent::SelectionLoaded {
            city_id,
            has_live_traffic,
        });
        Ok(())
    }

    /// Drop the current selection and its marker. The all-cities overlay,
    /// if active, is unaffected.
    pub async fn clear_selection(&self) {
        let mut slots = self.slots.write().await;
        slots.selection_token += 1; // invalidates any in-flight fetch
        slots.selection = SelectionState::Unselected;
        drop(slots);

        self.surface.remove_marker(MarkerId::Selection);
        self.emit(MapEvent::SelectionCleared);
    }

    /// Flip the all-cities overlay. Enabling fetches traffic for every city
    /// concurrently and renders one marker per city that resolved; a city
    /// whose fetch failed is omitted without aborting the rest. Returns the
    /// new overlay state.
    pub async fn toggle_all_cities(&self) -> bool {
        let (enabled, token) = {
            let mut slots = self.slots.write().await;
            slots.overlay_enabled = !slots.overlay_enabled;
            slots.overlay_token += 1;
            (slots.overlay_enabled, slots.overlay_token)
        };

        if !enabled {
            for city in self.directory.iter() {
                self.surface.remove_marker(MarkerId::City(city.id));
            }
            info!("All-cities overlay disabled");
            self.emit(MapEvent::OverlayDisabled);
            return false;
        }

        let fetches: Vec<_> = self
            .directory
            .iter()
            .map(|city| {
                let api = Arc::clone(&self.api);
                let city_id = city.id;
                async move { (city_id, api.traffic_for_city(city_id).await) }
            })
            .collect();
        let results = futures::future::join_all(fetches).await;

        {
            let slots = self.slots.read().await;
            if slots.overlay_token != token {
                debug!("Discarding stale overlay batch");
                return slots.overlay_enabled;
            }
        }

        let mut rendered = 0usize;
        let mut failed = 0usize;
        for (city_id, result) in results {
            let city = match self.directory.get(city_id) {
                Some(city) => city,
                None => continue,
            };
            match result {
                Ok(response) if response.success => {
                    let code = response
                        .traffic
                        .as_ref()
                        .and_then(|t| t.level)
                        .unwrap_or(-1);
                    self.surface.place_marker(
                        MarkerId::City(city_id),
                        city.lat,
                        city.lng,
                        &city.name,
                        policy::describe_code(code).color,
                    );
                    rendered += 1;
                }
                Ok(response) => {
                    warn!(
                        city_id,
                        error = response.error.as_deref().unwrap_or("unknown"),
                        "Overlay traffic fetch reported failure, omitting marker"
                    );
                    failed += 1;
                }
                Err(e) => {
                    warn!(city_id, error = %e, "Overlay traffic fetch failed, omitting marker");
                    failed += 1;
                }
            }
        }

        info!(rendered, failed, "All-cities overlay enabled");
        self.emit(MapEvent::OverlayEnabled { rendered, failed });
        true
    }

    /// Place the user marker at the last-known fix.
    pub async fn show_user_location(&self) -> Result<(), MapStateError> {
        let fix = self
            .locator
            .last_known()
            .await
            .ok_or(MapStateError::LocationUnknown)?;

        self.surface.place_marker(
            MarkerId::User,
            fix.location.lat,
            fix.location.lng,
            "Your location",
            USER_COLOR,
        );
        Ok(())
    }

    /// Request a route and ETA from the last-known location to a city,
    /// under the traffic conditions of the given request.
    ///
    /// Requires a known location. Success replaces any previous route
    /// overlay; any failure leaves the map without a route - there is no
    /// local approximation for route geometry.
    pub async fn request_eta(
        &self,
        city_id: u32,
        request: &PredictionRequest,
    ) -> Result<(), MapStateError> {
        let city = self
            .directory
            .get(city_id)
            .ok_or(MapStateError::UnknownCity(city_id))?
            .clone();
        let fix = self
            .locator
            .last_known()
            .await
            .ok_or(MapStateError::LocationUnknown)?;

        let token = {
            let mut slots = self.slots.write().await;
            slots.route_token += 1;
            slots.route = RouteState::RouteRequested { city_id };
            slots.route_token
        };

        if fix.is_degraded() {
            warn!(city_id, "Computing ETA from a substituted default location");
        }
        info!(city_id, city = %city.name, "Requesting route and ETA");
        self.emit(MapEvent::RouteRequested { city_id });

        let outcome = self.api.calculate_eta(&fix.location, city_id, request).await;

        let mut slots = self.slots.write().await;
        if slots.route_token != token {
            debug!(city_id, "Discarding stale route response");
            return Ok(());
        }

        let route_eta = match outcome {
            Ok(response) if response.success => match (response.route, response.eta) {
                (Some(route), Some(eta)) if !route.coordinates.is_empty() => {
                    Ok(RouteEta {
                        city_id,
                        route,
                        eta,
                    })
                }
                _ => Err("route response missing geometry or ETA".to_string()),
            },
            Ok(response) => Err(response
                .error
                .unwrap_or_else(|| "service reported failure".to_string())),
            Err(e) => Err(e.to_string()),
        };

        match route_eta {
            Ok(route_eta) => {
                self.surface.clear_route();
                self.surface.draw_route(&route_eta.route.coordinates);
                self.surface.place_marker(
                    MarkerId::Destination,
                    city.lat,
                    city.lng,
                    &city.name,
                    DESTINATION_COLOR,
                );
                if let Some((south, west, north, east)) = bounds(&route_eta.route.coordinates) {
                    self.surface.fit_bounds(south, west, north, east);
                }

                info!(
                    city_id,
                    travel_minutes = route_eta.eta.total_travel_time,
                    delay_minutes = route_eta.eta.delay_minutes,
                    "Route ready"
                );
                slots.route = RouteState::RouteReady(route_eta);
                drop(slots);
                self.emit(MapEvent::RouteReady { city_id });
            }
            Err(reason) => {
                warn!(city_id, reason = %reason, "Route request failed, no route drawn");
                slots.route = RouteState::RouteFailed {
                    city_id,
                    reason: reason.clone(),
                };
                drop(slots);
                self.emit(MapEvent::RouteFailed { city_id, reason });
            }
        }
        Ok(())
    }

    /// Remove the route overlay. The slot returns to reflecting location
    /// availability.
    pub async fn clear_route(&self) {
        let mut slots = self.slots.write().await;
        slots.route_token += 1; // invalidates any in-flight request
        slots.route = RouteState::NoLocation;
        drop(slots);

        self.surface.clear_route();
        self.surface.remove_marker(MarkerId::Destination);
    }

    pub async fn selection_state(&self) -> SelectionState {
        self.slots.read().await.selection.clone()
    }

    /// Route slot, with NoLocation upgraded to LocationKnown once the
    /// locator holds a fix.
    pub async fn route_state(&self) -> RouteState {
        let route = self.slots.read().await.route.clone();
        match route {
            RouteState::NoLocation if self.locator.last_known().await.is_some() => {
                RouteState::LocationKnown
            }
            other => other,
        }
    }

    /// Static data for the selected city, if any.
    pub async fn selected_city(&self) -> Option<City> {
        let city_id = match self.slots.read().await.selection {
            SelectionState::Loading { city_id } | SelectionState::Loaded { city_id, .. } => city_id,
            SelectionState::Unselected => return None,
        };
        self.directory.get(city_id).cloned()
    }

    /// The current route, when one is ready.
    pub async fn current_route(&self) -> Option<RouteEta> {
        match &self.slots.read().await.route {
            RouteState::RouteReady(route_eta) => Some(route_eta.clone()),
            _ => None,
        }
    }

    pub fn all_cities_enabled(&self) -> bool {
        // Callers on the UI thread poll this between awaits
        match self.slots.try_read() {
            Ok(slots) => slots.overlay_enabled,
            Err(_) => false,
        }
    }
}

/// Bounding box (south, west, north, east) of a [lat, lng] polyline.
fn bounds(coordinates: &[[f64; 2]]) -> Option<(f64, f64, f64, f64)> {
    let first = coordinates.first()?;
    let mut south = first[0];
    let mut north = first[0];
    let mut west = first[1];
    let mut east = first[1];

    for coord in coordinates {
        south = south.min(coord[0]);
        north = north.max(coord[0]);
        west = west.min(coord[1]);
        east = east.max(coord[1]);
    }

    Some((south, west, north, east))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{UserLocation, Weather};
    use crate::providers::traffic_api::{
        CityTrafficResponse, EtaResponse, PredictResponse, TrafficApiError,
    };
    use crate::services::location::FixedLocationProvider;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    // --- Test doubles ---

    #[derive(Default)]
    struct RecordingSurface {
        markers: Mutex<HashMap<MarkerId, String>>,
        route: Mutex<Option<Vec<[f64; 2]>>>,
        route_clears: Mutex<usize>,
        fitted: Mutex<Option<(f64, f64, f64, f64)>>,
    }

    impl RecordingSurface {
        fn marker_color(&self, id: MarkerId) -> Option<String> {
            self.markers.lock().unwrap().get(&id).cloned()
        }

        fn has_marker(&self, id: MarkerId) -> bool {
            self.markers.lock().unwrap().contains_key(&id)
        }
    }

    impl MapSurface for RecordingSurface {
        fn place_marker(&self, id: MarkerId, _lat: f64, _lng: f64, _label: &str, color: &str) {
            self.markers.lock().unwrap().insert(id, color.to_string());
        }
        fn remove_marker(&self, id: MarkerId) {
            self.markers.lock().unwrap().remove(&id);
        }
        fn draw_route(&self, coordinates: &[[f64; 2]]) {
            *self.route.lock().unwrap() = Some(coordinates.to_vec());
        }
        fn clear_route(&self) {
            *self.route.lock().unwrap() = None;
            *self.route_clears.lock().unwrap() += 1;
        }
        fn set_view(&self, _lat: f64, _lng: f64, _zoom: u8) {}
        fn fit_bounds(&self, south: f64, west: f64, north: f64, east: f64) {
            *self.fitted.lock().unwrap() = Some((south, west, north, east));
        }
    }

    type GatedTraffic = oneshot::Receiver<Result<CityTrafficResponse, TrafficApiError>>;

    #[derive(Default)]
    struct ScriptedApi {
        traffic_gates: Mutex<HashMap<u32, VecDeque<GatedTraffic>>>,
        traffic_failures: Mutex<HashSet<u32>>,
        traffic_levels: Mutex<HashMap<u32, i64>>,
        eta_script: Mutex<VecDeque<Result<EtaResponse, TrafficApiError>>>,
    }

    impl ScriptedApi {
        fn gate_traffic(&self, city_id: u32, gate: GatedTraffic) {
            self.traffic_gates
                .lock()
                .unwrap()
                .entry(city_id)
                .or_default()
                .push_back(gate);
        }

        fn fail_traffic(&self, city_id: u32) {
            self.traffic_failures.lock().unwrap().insert(city_id);
        }

        fn set_level(&self, city_id: u32, level: i64) {
            self.traffic_levels.lock().unwrap().insert(city_id, level);
        }

        fn script_eta(&self, response: Result<EtaResponse, TrafficApiError>) {
            self.eta_script.lock().unwrap().push_back(response);
        }
    }

    fn traffic_response(level: i64) -> CityTrafficResponse {
        CityTrafficResponse {
            success: true,
            traffic: Some(CityTraffic {
                level: Some(level),
                level_text: None,
                color: None,
                speed: Some(42.0),
                congestion: Some(55.0),
                extra_time: Some(8.0),
            }),
            error: None,
        }
    }

    impl TrafficApi for ScriptedApi {
        fn predict<'a>(
            &'a self,
            _request: &'a PredictionRequest,
        ) -> Pin<Box<dyn Future<Output = Result<PredictResponse, TrafficApiError>> + Send + 'a>>
        {
            Box::pin(async { Err(TrafficApiError::ApiError("not scripted".to_string())) })
        }

        fn traffic_for_city(
            &self,
            city_id: u32,
        ) -> Pin<Box<dyn Future<Output = Result<CityTrafficResponse, TrafficApiError>> + Send + '_>>
        {
            let gate = self
                .traffic_gates
                .lock()
                .unwrap()
                .get_mut(&city_id)
                .and_then(|gates| gates.pop_front());
            let failed = self.traffic_failures.lock().unwrap().contains(&city_id);
            let level = *self
                .traffic_levels
                .lock()
                .unwrap()
                .get(&city_id)
                .unwrap_or(&0);

            Box::pin(async move {
                if let Some(gate) = gate {
                    return gate.await.expect("traffic gate dropped");
                }
                if failed {
                    return Err(TrafficApiError::NetworkError(
                        "connection refused".to_string(),
                    ));
                }
                Ok(traffic_response(level))
            })
        }

        fn calculate_eta<'a>(
            &'a self,
            _origin: &'a UserLocation,
            _city_id: u32,
            _request: &'a PredictionRequest,
        ) -> Pin<Box<dyn Future<Output = Result<EtaResponse, TrafficApiError>> + Send + 'a>>
        {
            let scripted = self.eta_script.lock().unwrap().pop_front();
            Box::pin(async move {
                scripted.unwrap_or_else(|| Err(TrafficApiError::ApiError("not scripted".to_string())))
            })
        }
    }

    fn eta_response() -> EtaResponse {
        EtaResponse {
            success: true,
            route: Some(RouteGeometry {
                coordinates: vec![[36.8, 10.18], [36.0, 10.3], [34.74, 10.76]],
                distance: Some(270.5),
                adjusted_duration: Some(201.0),
            }),
            city: None,
            eta: Some(EtaSummary {
                distance_km: Some(270.5),
                departure_time: Some("2026-08-05T09:00:00".to_string()),
                arrival_time: Some("2026-08-05T12:21:00".to_string()),
                total_travel_time: Some(201.0),
                delay_minutes: Some(36.0),
                traffic_impact: Some("Heavy traffic adds significant delay".to_string()),
            }),
            error: None,
        }
    }

    fn directory() -> Arc<CityDirectory> {
        Arc::new(
            CityDirectory::new(vec![
                City {
                    id: 0,
                    name: "Tunis".to_string(),
                    governorate: Some("Tunis".to_string()),
                    lat: 36.8065,
                    lng: 10.1815,
                    population: Some(638_845),
                    hotspots: Vec::new(),
                },
                City {
                    id: 2,
                    name: "Sfax".to_string(),
                    governorate: Some("Sfax".to_string()),
                    lat: 34.7406,
                    lng: 10.7603,
                    population: Some(330_440),
                    hotspots: Vec::new(),
                },
                City {
                    id: 3,
                    name: "Sousse".to_string(),
                    governorate: Some("Sousse".to_string()),
                    lat: 35.8254,
                    lng: 10.6360,
                    population: Some(221_530),
                    hotspots: Vec::new(),
                },
            ])
            .unwrap(),
        )
    }

    struct Fixture {
        api: Arc<ScriptedApi>,
        surface: Arc<RecordingSurface>,
        locator: Arc<GeoLocator>,
        controller: Arc<MapStateController>,
    }

    fn fixture() -> Fixture {
        let api = Arc::new(ScriptedApi::default());
        let surface = Arc::new(RecordingSurface::default());
        let locator = Arc::new(GeoLocator::new(
            Arc::new(FixedLocationProvider::new(36.8, 10.2)),
            None,
        ));
        let controller = Arc::new(MapStateController::new(
            api.clone(),
            directory(),
            surface.clone(),
            locator.clone(),
        ));
        Fixture {
            api,
            surface,
            locator,
            controller,
        }
    }

    fn request() -> PredictionRequest {
        PredictionRequest {
            hour: 17,
            day: 4,
            city_id: 2,
            weather: Weather::Clear,
        }
    }

    // --- Selection ---

    #[tokio::test]
    async fn selecting_a_city_loads_its_traffic() {
        let f = fixture();
        f.api.set_level(0, 2);

        f.controller.select_city(0).await.unwrap();

        match f.controller.selection_state().await {
            SelectionState::Loaded { city_id, traffic } => {
                assert_eq!(city_id, 0);
                assert_eq!(traffic.unwrap().level, Some(2));
            }
            other => panic!("unexpected state {:?}", other),
        }
        // Marker recolored to the High descriptor
        assert_eq!(
            f.surface.marker_color(MarkerId::Selection).as_deref(),
            Some("#dc3545")
        );
        assert_eq!(f.controller.selected_city().await.unwrap().name, "Tunis");
    }

    #[tokio::test]
    async fn selecting_an_unknown_city_is_an_error() {
        let f = fixture();
        assert!(matches!(
            f.controller.select_city(99).await,
            Err(MapStateError::UnknownCity(99))
        ));
        assert!(matches!(
            f.controller.selection_state().await,
            SelectionState::Unselected
        ));
    }

    #[tokio::test]
    async fn traffic_fetch_failure_still_selects_the_city() {
        let f = fixture();
        f.api.fail_traffic(2);

        f.controller.select_city(2).await.unwrap();

        match f.controller.selection_state().await {
            SelectionState::Loaded { city_id, traffic } => {
                assert_eq!(city_id, 2);
                assert!(traffic.is_none());
            }
            other => panic!("unexpected state {:?}", other),
        }
        // Static city data is still available for the card
        let city = f.controller.selected_city().await.unwrap();
        assert_eq!(city.name, "Sfax");
        assert_eq!(city.population, Some(330_440));
        // Marker keeps the unknown color - no error state leaks to the map
        assert_eq!(
            f.surface.marker_color(MarkerId::Selection).as_deref(),
            Some("#6c757d")
        );
    }

    #[tokio::test]
    async fn a_newer_selection_supersedes_a_stale_response() {
        let f = fixture();
        let (gate_tx, gate_rx) = oneshot::channel();
        f.api.gate_traffic(0, gate_rx);
        f.api.set_level(2, 1);

        let controller = f.controller.clone();
        let first = tokio::spawn(async move { controller.select_city(0).await });

        // Let the first selection reach its fetch await
        while !matches!(
            f.controller.selection_state().await,
            SelectionState::Loading { city_id: 0 }
        ) {
            tokio::task::yield_now().await;
        }

        // Second selection resolves immediately
        f.controller.select_city(2).await.unwrap();

        // The stale response for city 0 arrives afterwards, as High traffic
        gate_tx.send(Ok(traffic_response(2))).unwrap();
        first.await.unwrap().unwrap();

        match f.controller.selection_state().await {
            SelectionState::Loaded { city_id, traffic } => {
                assert_eq!(city_id, 2, "stale response must not overwrite newer selection");
                assert_eq!(traffic.unwrap().level, Some(1));
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test]
    async fn clearing_the_selection_supersedes_an_in_flight_fetch() {
        let f = fixture();
        let (gate_tx, gate_rx) = oneshot::channel();
        f.api.gate_traffic(0, gate_rx);

        let controller = f.controller.clone();
        let selection = tokio::spawn(async move { controller.select_city(0).await });

        while !matches!(
            f.controller.selection_state().await,
            SelectionState::Loading { city_id: 0 }
        ) {
            tokio::task::yield_now().await;
        }

        f.controller.clear_selection().await;
        gate_tx.send(Ok(traffic_response(2))).unwrap();
        selection.await.unwrap().unwrap();

        assert!(matches!(
            f.controller.selection_state().await,
            SelectionState::Unselected
        ));
        assert!(!f.surface.has_marker(MarkerId::Selection));
    }

    // --- All-cities overlay ---

    #[tokio::test]
    async fn overlay_renders_markers_independently_per_city() {
        let f = fixture();
        f.api.set_level(0, 2);
        f.api.fail_traffic(2);
        f.api.set_level(3, 0);

        assert!(f.controller.toggle_all_cities().await);

        assert_eq!(
            f.surface.marker_color(MarkerId::City(0)).as_deref(),
            Some("#dc3545")
        );
        // The failed city is omitted, not an error
        assert!(!f.surface.has_marker(MarkerId::City(2)));
        assert_eq!(
            f.surface.marker_color(MarkerId::City(3)).as_deref(),
            Some("#28a745")
        );
    }

    #[tokio::test]
    async fn disabling_the_overlay_removes_its_markers() {
        let f = fixture();
        f.controller.toggle_all_cities().await;
        assert!(f.surface.has_marker(MarkerId::City(0)));

        assert!(!f.controller.toggle_all_cities().await);
        assert!(!f.surface.has_marker(MarkerId::City(0)));
        assert!(!f.surface.has_marker(MarkerId::City(2)));
        assert!(!f.surface.has_marker(MarkerId::City(3)));
    }

    #[tokio::test]
    async fn overlay_does_not_touch_the_selection_marker() {
        let f = fixture();
        f.controller.select_city(0).await.unwrap();
        f.controller.toggle_all_cities().await;
        f.controller.toggle_all_cities().await;
        assert!(f.surface.has_marker(MarkerId::Selection));
    }

    // --- Route / ETA ---

    #[tokio::test]
    async fn eta_requires_a_known_location() {
        let f = fixture();
        f.api.script_eta(Ok(eta_response()));

        let result = f.controller.request_eta(2, &request()).await;
        assert!(matches!(result, Err(MapStateError::LocationUnknown)));
        assert!(matches!(
            f.controller.route_state().await,
            RouteState::NoLocation
        ));
    }

    #[tokio::test]
    async fn route_state_reflects_location_acquisition() {
        let f = fixture();
        assert!(matches!(
            f.controller.route_state().await,
            RouteState::NoLocation
        ));

        f.locator.locate().await.unwrap();
        assert!(matches!(
            f.controller.route_state().await,
            RouteState::LocationKnown
        ));
    }

    #[tokio::test]
    async fn successful_eta_draws_the_route_and_destination() {
        let f = fixture();
        f.locator.locate().await.unwrap();
        f.api.script_eta(Ok(eta_response()));

        f.controller.request_eta(2, &request()).await.unwrap();

        match f.controller.route_state().await {
            RouteState::RouteReady(route_eta) => {
                assert_eq!(route_eta.city_id, 2);
                assert_eq!(route_eta.eta.delay_minutes, Some(36.0));
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(f.surface.route.lock().unwrap().as_ref().unwrap().len(), 3);
        assert!(f.surface.has_marker(MarkerId::Destination));
        // Bounds cover the polyline extremes
        let (south, west, north, east) = f.surface.fitted.lock().unwrap().unwrap();
        assert_eq!((south, north), (34.74, 36.8));
        assert_eq!((west, east), (10.18, 10.76));
        assert!(f.controller.current_route().await.is_some());
    }

    #[tokio::test]
    async fn failed_eta_draws_nothing() {
        let f = fixture();
        f.locator.locate().await.unwrap();
        f.api
            .script_eta(Err(TrafficApiError::NetworkError("unreachable".to_string())));

        f.controller.request_eta(2, &request()).await.unwrap();

        match f.controller.route_state().await {
            RouteState::RouteFailed { city_id, reason } => {
                assert_eq!(city_id, 2);
                assert!(reason.contains("unreachable"));
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert!(f.surface.route.lock().unwrap().is_none());
        assert!(!f.surface.has_marker(MarkerId::Destination));
        assert!(f.controller.current_route().await.is_none());
    }

    #[tokio::test]
    async fn eta_success_without_geometry_fails_cleanly() {
        let f = fixture();
        f.locator.locate().await.unwrap();
        let mut response = eta_response();
        response.route = None;
        f.api.script_eta(Ok(response));

        f.controller.request_eta(2, &request()).await.unwrap();

        assert!(matches!(
            f.controller.route_state().await,
            RouteState::RouteFailed { .. }
        ));
        assert!(f.surface.route.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn a_new_route_replaces_the_previous_one() {
        let f = fixture();
        f.locator.locate().await.unwrap();
        f.api.script_eta(Ok(eta_response()));
        f.controller.request_eta(2, &request()).await.unwrap();

        let mut second = eta_response();
        second.route.as_mut().unwrap().coordinates = vec![[36.8, 10.18], [35.83, 10.64]];
        f.api.script_eta(Ok(second));
        f.controller.request_eta(3, &request()).await.unwrap();

        match f.controller.route_state().await {
            RouteState::RouteReady(route_eta) => assert_eq!(route_eta.city_id, 3),
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(f.surface.route.lock().unwrap().as_ref().unwrap().len(), 2);
        assert!(*f.surface.route_clears.lock().unwrap() >= 1);
    }

    #[tokio::test]
    async fn clear_route_resets_the_slot() {
        let f = fixture();
        f.locator.locate().await.unwrap();
        f.api.script_eta(Ok(eta_response()));
        f.controller.request_eta(2, &request()).await.unwrap();

        f.controller.clear_route().await;

        // Location is still known, so the slot settles there
        assert!(matches!(
            f.controller.route_state().await,
            RouteState::LocationKnown
        ));
        assert!(f.surface.route.lock().unwrap().is_none());
        assert!(!f.surface.has_marker(MarkerId::Destination));
    }
}
