//! Client for the remote traffic prediction service.
//!
//! The service exposes a small JSON API:
//!
//! - `POST /api/traffic-prediction` - traffic level for (hour, day, city,
//!   weather), with display attributes and recommendations
//! - `GET  /api/traffic/{city_id}` - live traffic snapshot for one city
//! - `POST /api/calculate-eta` - route geometry and ETA from an origin
//!   coordinate to a city, adjusted for predicted traffic
//! - `GET  /api/system-status` - dataset freshness and model presence
//! - `POST /api/force-update` - trigger a dataset refresh on the service
//!
//! All responses carry a `success` flag; failures also carry an `error`
//! string. Callers treat transport errors, non-2xx statuses, malformed
//! bodies, and `success: false` alike - see the prediction orchestrator.

use chrono::Utc;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::models::{PredictionRequest, UserLocation};

#[derive(Debug, Error)]
pub enum TrafficApiError {
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("API error: {0}")]
    ApiError(String),
}

/// One remote call, for diagnostics consumers.
#[derive(Debug, Clone, Serialize)]
pub struct ApiRequestLog {
    /// Unique request ID
    pub id: String,
    /// Timestamp when the request was made
    pub timestamp: String,
    /// HTTP method (GET, POST)
    pub method: String,
    /// Path called on the service
    pub endpoint: String,
    /// Duration of the request in milliseconds
    pub duration_ms: u64,
    /// HTTP status code (0 when the transport failed)
    pub status: u16,
    /// Response size in bytes
    pub response_size: Option<usize>,
    /// Error message if the request failed
    pub error: Option<String>,
}

/// Sender for request diagnostics
pub type ApiRequestSender = broadcast::Sender<ApiRequestLog>;

/// The remote operations the controllers depend on.
///
/// Kept object-safe so controllers hold an `Arc<dyn TrafficApi>` and tests
/// can substitute scripted implementations. Status and force-update calls
/// are presentation conveniences and live on the concrete client only.
pub trait TrafficApi: Send + Sync {
    fn predict<'a>(
        &'a self,
        request: &'a PredictionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<PredictResponse, TrafficApiError>> + Send + 'a>>;

    fn traffic_for_city(
        &self,
        city_id: u32,
    ) -> Pin<Box<dyn Future<Output = Result<CityTrafficResponse, TrafficApiError>> + Send + '_>>;

    fn calculate_eta<'a>(
        &'a self,
        origin: &'a UserLocation,
        city_id: u32,
        request: &'a PredictionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<EtaResponse, TrafficApiError>> + Send + 'a>>;
}

/// HTTP client for the traffic prediction service.
pub struct TrafficApiClient {
    client: Client,
    base_url: String,
    /// Sender for request diagnostics
    diagnostics_tx: ApiRequestSender,
}

impl TrafficApiClient {
    pub fn new(config: &ApiConfig, diagnostics_tx: ApiRequestSender) -> Result<Self, TrafficApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| TrafficApiError::NetworkError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            diagnostics_tx,
        })
    }

    /// Send a diagnostics log entry
    fn log_request(&self, log: ApiRequestLog) {
        // Ignore send errors - they just mean no one is listening
        let _ = self.diagnostics_tx.send(log);
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, TrafficApiError> {
        let start = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let url = format!("{}{}", self.base_url, path);

        let mut builder = self.client.request(method.clone(), &url);
        if let Some(body) = &body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(resp) => resp,
            Err(e) => {
                self.log_request(ApiRequestLog {
                    id: request_id,
                    timestamp: Utc::now().to_rfc3339(),
                    method: method.to_string(),
                    endpoint: path.to_string(),
                    duration_ms: start.elapsed().as_millis() as u64,
                    status: 0,
                    response_size: None,
                    error: Some(e.to_string()),
                });
                return Err(TrafficApiError::NetworkError(e.to_string()));
            }
        };

        let status = response.status().as_u16();

        if !response.status().is_success() {
            self.log_request(ApiRequestLog {
                id: request_id,
                timestamp: Utc::now().to_rfc3339(),
                method: method.to_string(),
                endpoint: path.to_string(),
                duration_ms: start.elapsed().as_millis() as u64,
                status,
                response_size: None,
                error: Some(format!("HTTP error: {}", status)),
            });
            return Err(TrafficApiError::ApiError(format!("HTTP error: {}", status)));
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                self.log_request(ApiRequestLog {
                    id: request_id,
                    timestamp: Utc::now().to_rfc3339(),
                    method: method.to_string(),
                    endpoint: path.to_string(),
                    duration_ms: start.elapsed().as_millis() as u64,
                    status,
                    response_size: None,
                    error: Some(format!("Failed to read body: {}", e)),
                });
                return Err(TrafficApiError::NetworkError(e.to_string()));
            }
        };

        let response_size = body.len();
        let result: Result<T, _> = serde_json::from_str(&body);

        match &result {
            Ok(_) => {
                self.log_request(ApiRequestLog {
                    id: request_id,
                    timestamp: Utc::now().to_rfc3339(),
                    method: method.to_string(),
                    endpoint: path.to_string(),
                    duration_ms: start.elapsed().as_millis() as u64,
                    status,
                    response_size: Some(response_size),
                    error: None,
                });
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to parse response from {}: {} - body: {}",
                    path,
                    e,
                    &body[..body.len().min(500)]
                );
                self.log_request(ApiRequestLog {
                    id: request_id,
                    timestamp: Utc::now().to_rfc3339(),
                    method: method.to_string(),
                    endpoint: path.to_string(),
                    duration_ms: start.elapsed().as_millis() as u64,
                    status,
                    response_size: Some(response_size),
                    error: Some(format!("Parse error: {}", e)),
                });
            }
        }

        result.map_err(|e| TrafficApiError::ParseError(e.to_string()))
    }

    /// Request a traffic prediction for (hour, day, city, weather).
    pub async fn predict(
        &self,
        request: &PredictionRequest,
    ) -> Result<PredictResponse, TrafficApiError> {
        self.execute(
            Method::POST,
            "/api/traffic-prediction",
            Some(serde_json::json!({
                "hour": request.hour,
                "day": request.day,
                "city": request.city_id,
                "weather": request.weather.code(),
            })),
        )
        .await
    }

    /// Fetch the live traffic snapshot for one city.
    pub async fn traffic_for_city(
        &self,
        city_id: u32,
    ) -> Result<CityTrafficResponse, TrafficApiError> {
        self.execute(Method::GET, &format!("/api/traffic/{}", city_id), None)
            .await
    }

    /// Request route geometry and an ETA from an origin to a city, adjusted
    /// for the traffic conditions in the given request.
    pub async fn calculate_eta(
        &self,
        origin: &UserLocation,
        city_id: u32,
        request: &PredictionRequest,
    ) -> Result<EtaResponse, TrafficApiError> {
        self.execute(
            Method::POST,
            "/api/calculate-eta",
            Some(serde_json::json!({
                "origin": { "lat": origin.lat, "lng": origin.lng },
                "city": city_id,
                "hour": request.hour,
                "day": request.day,
                "weather": request.weather.code(),
            })),
        )
        .await
    }

    /// Fetch dataset freshness and model presence from the service.
    pub async fn system_status(&self) -> Result<SystemStatusResponse, TrafficApiError> {
        self.execute(Method::GET, "/api/system-status", None).await
    }

    /// Ask the service to refresh its dataset now.
    pub async fn force_update(&self) -> Result<ForceUpdateResponse, TrafficApiError> {
        self.execute(Method::POST, "/api/force-update", None).await
    }
}

impl TrafficApi for TrafficApiClient {
    fn predict<'a>(
        &'a self,
        request: &'a PredictionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<PredictResponse, TrafficApiError>> + Send + 'a>> {
        Box::pin(TrafficApiClient::predict(self, request))
    }

    fn traffic_for_city(
        &self,
        city_id: u32,
    ) -> Pin<Box<dyn Future<Output = Result<CityTrafficResponse, TrafficApiError>> + Send + '_>>
    {
        Box::pin(TrafficApiClient::traffic_for_city(self, city_id))
    }

    fn calculate_eta<'a>(
        &'a self,
        origin: &'a UserLocation,
        city_id: u32,
        request: &'a PredictionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<EtaResponse, TrafficApiError>> + Send + 'a>> {
        Box::pin(TrafficApiClient::calculate_eta(self, origin, city_id, request))
    }
}

// Response structures

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    #[serde(default)]
    pub success: bool,
    /// Numeric level code, when the service includes it
    pub prediction: Option<i64>,
    pub traffic_level: Option<TrafficLevelInfo>,
    pub city: Option<CityInfo>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub timestamp: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficLevelInfo {
    /// Level label (e.g., "High")
    pub level: Option<String>,
    pub color: Option<String>,
    pub message: Option<String>,
}

/// City attributes echoed by the service alongside a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityInfo {
    pub name: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub population: Option<u64>,
    #[serde(default)]
    pub hotspots: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityTrafficResponse {
    #[serde(default)]
    pub success: bool,
    pub traffic: Option<CityTraffic>,
    pub error: Option<String>,
}

/// Live traffic snapshot for one city.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityTraffic {
    /// Numeric level code (0/1/2)
    pub level: Option<i64>,
    /// Level label (e.g., "High")
    pub level_text: Option<String>,
    pub color: Option<String>,
    /// Average speed in km/h
    pub speed: Option<f64>,
    /// Congestion percentage
    pub congestion: Option<f64>,
    /// Extra travel time in minutes
    pub extra_time: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtaResponse {
    #[serde(default)]
    pub success: bool,
    pub route: Option<RouteGeometry>,
    pub city: Option<CityInfo>,
    pub eta: Option<EtaSummary>,
    pub error: Option<String>,
}

/// Route polyline and traffic-adjusted duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteGeometry {
    /// Route coordinates as [lat, lng] pairs, origin first
    #[serde(default)]
    pub coordinates: Vec<[f64; 2]>,
    /// Route length in kilometers
    pub distance: Option<f64>,
    /// Travel time in minutes, adjusted for predicted traffic
    pub adjusted_duration: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtaSummary {
    pub distance_km: Option<f64>,
    /// Departure timestamp (ISO 8601)
    pub departure_time: Option<String>,
    /// Arrival timestamp (ISO 8601)
    pub arrival_time: Option<String>,
    /// Total travel time in minutes
    pub total_travel_time: Option<f64>,
    /// Minutes attributable to traffic
    pub delay_minutes: Option<f64>,
    /// Human-readable impact description
    pub traffic_impact: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatusResponse {
    #[serde(default)]
    pub success: bool,
    pub status: Option<SystemStatus>,
    pub files: Option<SystemFiles>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub last_update: Option<String>,
    pub next_update: Option<String>,
    pub dataset_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemFiles {
    pub model: Option<FilePresence>,
    pub dataset: Option<FilePresence>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePresence {
    #[serde(default)]
    pub exists: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceUpdateResponse {
    #[serde(default)]
    pub success: bool,
    pub error: Option<String>,
}
