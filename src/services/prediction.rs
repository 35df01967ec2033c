//! Prediction request lifecycle.
//!
//! The orchestrator owns one concern: turn a request into exactly one
//! authoritative result, remote when the service answers usefully, locally
//! estimated otherwise. Predictable failures never surface as errors here -
//! callers only see the provenance on the result.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::fallback::FallbackPredictor;
use crate::models::{
    CityDirectory, PredictionRequest, PredictionResult, PredictionSource, TrafficLevel,
};
use crate::providers::traffic_api::{PredictResponse, TrafficApi};

pub struct PredictionOrchestrator {
    api: Arc<dyn TrafficApi>,
    fallback: FallbackPredictor,
}

impl PredictionOrchestrator {
    pub fn new(api: Arc<dyn TrafficApi>, directory: Arc<CityDirectory>) -> Self {
        Self {
            api,
            fallback: FallbackPredictor::new(directory),
        }
    }

    /// Resolve a prediction for the request.
    ///
    /// Remote answers are returned verbatim with `source: Remote`. A service
    /// failure report, a transport or parse error, or a success body without
    /// a usable level all degrade to the local estimate with
    /// `source: Fallback`.
    pub async fn request_prediction(&self, request: &PredictionRequest) -> PredictionResult {
        match self.api.predict(request).await {
            Ok(response) if response.success => match Self::remote_result(request, &response) {
                Some(result) => {
                    debug!(
                        city_id = request.city_id,
                        level = result.level.code(),
                        "Remote prediction received"
                    );
                    result
                }
                None => {
                    warn!(
                        city_id = request.city_id,
                        "Prediction response carried no usable level, using local estimate"
                    );
                    self.fallback.predict(request)
                }
            },
            Ok(response) => {
                warn!(
                    city_id = request.city_id,
                    error = response.error.as_deref().unwrap_or("unknown"),
                    "Prediction service reported failure, using local estimate"
                );
                self.fallback.predict(request)
            }
            Err(e) => {
                warn!(
                    city_id = request.city_id,
                    error = %e,
                    "Prediction request failed, using local estimate"
                );
                self.fallback.predict(request)
            }
        }
    }

    fn remote_result(
        request: &PredictionRequest,
        response: &PredictResponse,
    ) -> Option<PredictionResult> {
        // Prefer the numeric code; older service versions only send the label
        let level = response
            .prediction
            .and_then(TrafficLevel::from_code)
            .or_else(|| {
                response
                    .traffic_level
                    .as_ref()?
                    .level
                    .as_deref()
                    .and_then(TrafficLevel::from_label)
            })?;

        Some(PredictionResult {
            source: PredictionSource::Remote,
            level,
            recommendations: response.recommendations.clone(),
            city_id: request.city_id,
            request: *request,
        })
    }
}
