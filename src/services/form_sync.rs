//! Form reconciliation and debounced submission.
//!
//! The controller keeps the raw user-editable field values, derives the
//! canonical validated request from them, and owns the current-prediction
//! slot. Rapid field changes coalesce into one submission after a quiet
//! period; an unfired pending submission is cancelled by a newer one, and
//! an in-flight prediction that has been superseded does not land in the
//! slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use chrono::{Datelike, Timelike};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::models::{CityDirectory, PredictionRequest, PredictionResult, Weather};
use crate::services::prediction::PredictionOrchestrator;

/// Raw field values as the user left them. Validated only on submission.
#[derive(Debug, Clone, Copy)]
pub struct FormFields {
    pub hour: i64,
    pub day: i64,
    pub city: i64,
    pub weather: i64,
}

impl Default for FormFields {
    fn default() -> Self {
        Self {
            hour: 8,
            day: 0,
            city: 0,
            weather: 0,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldViolation {
    #[error("hour {0} outside 0-23")]
    HourOutOfRange(i64),
    #[error("day {0} outside 0-6 (0 = Monday)")]
    DayOutOfRange(i64),
    #[error("unknown city id {0}")]
    UnknownCity(i64),
    #[error("weather code {0} outside 0-2")]
    WeatherOutOfRange(i64),
}

/// All constraints the current field values violate, never just the first.
#[derive(Debug, Clone, Error)]
#[error("invalid form input: {}", .violations.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("; "))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

/// Validate raw fields into a canonical request.
pub fn validate(
    fields: &FormFields,
    cities: &CityDirectory,
) -> Result<PredictionRequest, ValidationError> {
    let mut violations = Vec::new();

    if !(0..=23).contains(&fields.hour) {
        violations.push(FieldViolation::HourOutOfRange(fields.hour));
    }
    if !(0..=6).contains(&fields.day) {
        violations.push(FieldViolation::DayOutOfRange(fields.day));
    }
    let city_id = u32::try_from(fields.city).ok().filter(|id| cities.contains(*id));
    if city_id.is_none() {
        violations.push(FieldViolation::UnknownCity(fields.city));
    }
    let weather = Weather::from_code(fields.weather);
    if weather.is_none() {
        violations.push(FieldViolation::WeatherOutOfRange(fields.weather));
    }

    match (city_id, weather) {
        (Some(city_id), Some(weather)) if violations.is_empty() => Ok(PredictionRequest {
            hour: fields.hour as u8,
            day: fields.day as u8,
            city_id,
            weather,
        }),
        _ => Err(ValidationError { violations }),
    }
}

/// Form lifecycle notifications for UI binding.
#[derive(Debug, Clone)]
pub enum FormEvent {
    PredictionUpdated(PredictionResult),
    SubmissionRejected { reasons: Vec<String> },
}

pub struct FormSyncController {
    orchestrator: Arc<PredictionOrchestrator>,
    directory: Arc<CityDirectory>,
    debounce: Duration,
    fields: Mutex<FormFields>,
    /// Debounce generation; a pending submission only fires if it is still
    /// the newest
    generation: AtomicU64,
    /// Supersession token for in-flight submissions
    submit_token: AtomicU64,
    current: RwLock<Option<PredictionResult>>,
    events_tx: broadcast::Sender<FormEvent>,
}

impl FormSyncController {
    pub fn new(
        orchestrator: Arc<PredictionOrchestrator>,
        directory: Arc<CityDirectory>,
        debounce: Duration,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(16);

        Self {
            orchestrator,
            directory,
            debounce,
            fields: Mutex::new(FormFields::default()),
            generation: AtomicU64::new(0),
            submit_token: AtomicU64::new(0),
            current: RwLock::new(None),
            events_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FormEvent> {
        self.events_tx.subscribe()
    }

    pub fn set_hour(&self, hour: i64) {
        self.fields.lock().unwrap().hour = hour;
    }

    pub fn set_day(&self, day: i64) {
        self.fields.lock().unwrap().day = day;
    }

    pub fn set_city(&self, city: i64) {
        self.fields.lock().unwrap().city = city;
    }

    pub fn set_weather(&self, weather: i64) {
        self.fields.lock().unwrap().weather = weather;
    }

    pub fn fields(&self) -> FormFields {
        *self.fields.lock().unwrap()
    }

    /// Set hour and day from the local wall clock. chrono's
    /// `num_days_from_monday` already matches the Monday-first request
    /// convention, so no further rotation is needed.
    pub fn sync_to_current_time(&self) {
        let now = chrono::Local::now();
        let mut fields = self.fields.lock().unwrap();
        fields.hour = now.hour() as i64;
        fields.day = now.weekday().num_days_from_monday() as i64;
    }

    /// The canonical request for the current field values.
    pub fn canonical_request(&self) -> Result<PredictionRequest, ValidationError> {
        validate(&self.fields(), &self.directory)
    }

    /// Submit after a quiet period. Only the newest pending submission
    /// fires; earlier ones whose timer has not elapsed are cancelled, not
    /// queued.
    pub fn debounced_submit(self: &Arc<Self>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let controller = Arc::clone(self);

        tokio::spawn(async move {
            tokio::time::sleep(controller.debounce).await;
            if controller.generation.load(Ordering::SeqCst) != generation {
                // A newer change arrived during the quiet period
                return;
            }
            let _ = controller.submit().await;
        });
    }

    /// Validate and submit the current field values.
    ///
    /// Validation failure blocks the submission and reports every violated
    /// constraint. A result that was superseded while in flight is returned
    /// to the caller but does not land in the current-prediction slot.
    pub async fn submit(&self) -> Result<PredictionResult, ValidationError> {
        let request = match self.canonical_request() {
            Ok(request) => request,
            Err(error) => {
                warn!(reasons = %error, "Submission blocked by invalid input");
                let _ = self.events_tx.send(FormEvent::SubmissionRejected {
                    reasons: error.violations.iter().map(ToString::to_string).collect(),
                });
                return Err(error);
            }
        };

        let token = self.submit_token.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.orchestrator.request_prediction(&request).await;

        if self.submit_token.load(Ordering::SeqCst) != token {
            debug!("Discarding superseded prediction result");
            return Ok(result);
        }

        *self.current.write().await = Some(result.clone());
        let _ = self.events_tx.send(FormEvent::PredictionUpdated(result.clone()));
        Ok(result)
    }

    /// The authoritative result of the most recent honored submission.
    pub async fn current_prediction(&self) -> Option<PredictionResult> {
        self.current.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{City, PredictionSource, UserLocation};
    use crate::providers::traffic_api::{
        CityTrafficResponse, EtaResponse, PredictResponse, TrafficApi, TrafficApiError,
    };
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    fn remote_response(prediction: i64) -> PredictResponse {
        PredictResponse {
            success: true,
            prediction: Some(prediction),
            traffic_level: None,
            city: None,
            recommendations: vec!["Normal travel time expected".to_string()],
            timestamp: None,
            error: None,
        }
    }

    #[derive(Default)]
    struct CountingApi {
        calls: AtomicUsize,
        last_request: Mutex<Option<PredictionRequest>>,
        /// Calls pop a gate when one is scripted; otherwise resolve at once
        gates: Mutex<VecDeque<oneshot::Receiver<PredictResponse>>>,
    }

    impl CountingApi {
        fn gate_next(&self, gate: oneshot::Receiver<PredictResponse>) {
            self.gates.lock().unwrap().push_back(gate);
        }
    }

    impl TrafficApi for CountingApi {
        fn predict<'a>(
            &'a self,
            request: &'a PredictionRequest,
        ) -> Pin<Box<dyn Future<Output = Result<PredictResponse, TrafficApiError>> + Send + 'a>>
        {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(*request);
            let gate = self.gates.lock().unwrap().pop_front();
            Box::pin(async move {
                match gate {
                    Some(gate) => Ok(gate.await.expect("predict gate dropped")),
                    None => Ok(remote_response(1)),
                }
            })
        }

        fn traffic_for_city(
            &self,
            _city_id: u32,
        ) -> Pin<Box<dyn Future<Output = Result<CityTrafficResponse, TrafficApiError>> + Send + '_>>
        {
            Box::pin(async { Err(TrafficApiError::ApiError("not scripted".to_string())) })
        }

        fn calculate_eta<'a>(
            &'a self,
            _origin: &'a UserLocation,
            _city_id: u32,
            _request: &'a PredictionRequest,
        ) -> Pin<Box<dyn Future<Output = Result<EtaResponse, TrafficApiError>> + Send + 'a>>
        {
            Box::pin(async { Err(TrafficApiError::ApiError("not scripted".to_string())) })
        }
    }

    fn directory() -> Arc<CityDirectory> {
        Arc::new(
            CityDirectory::new(vec![
                City {
                    id: 0,
                    name: "Tunis".to_string(),
                    governorate: None,
                    lat: 36.8065,
                    lng: 10.1815,
                    population: Some(638_845),
                    hotspots: Vec::new(),
                },
                City {
                    id: 3,
                    name: "Sousse".to_string(),
                    governorate: None,
                    lat: 35.8254,
                    lng: 10.6360,
                    population: Some(221_530),
                    hotspots: Vec::new(),
                },
            ])
            .unwrap(),
        )
    }

    fn controller(debounce_ms: u64) -> (Arc<FormSyncController>, Arc<CountingApi>) {
        let api = Arc::new(CountingApi::default());
        let orchestrator = Arc::new(PredictionOrchestrator::new(api.clone(), directory()));
        let controller = Arc::new(FormSyncController::new(
            orchestrator,
            directory(),
            Duration::from_millis(debounce_ms),
        ));
        (controller, api)
    }

    #[test]
    fn validation_reports_every_violation() {
        let directory = directory();
        let fields = FormFields {
            hour: 99,
            day: 9,
            city: 42,
            weather: 7,
        };

        let error = validate(&fields, &directory).unwrap_err();
        assert_eq!(
            error.violations,
            vec![
                FieldViolation::HourOutOfRange(99),
                FieldViolation::DayOutOfRange(9),
                FieldViolation::UnknownCity(42),
                FieldViolation::WeatherOutOfRange(7),
            ]
        );
        // The message enumerates them all
        let message = error.to_string();
        assert!(message.contains("hour 99"));
        assert!(message.contains("day 9"));
        assert!(message.contains("city id 42"));
        assert!(message.contains("weather code 7"));
    }

    #[test]
    fn negative_city_ids_are_unknown() {
        let error = validate(
            &FormFields {
                hour: 8,
                day: 0,
                city: -1,
                weather: 0,
            },
            &directory(),
        )
        .unwrap_err();
        assert_eq!(error.violations, vec![FieldViolation::UnknownCity(-1)]);
    }

    #[test]
    fn valid_fields_produce_a_canonical_request() {
        let request = validate(
            &FormFields {
                hour: 17,
                day: 4,
                city: 3,
                weather: 1,
            },
            &directory(),
        )
        .unwrap();
        assert_eq!(request.hour, 17);
        assert_eq!(request.day, 4);
        assert_eq!(request.city_id, 3);
        assert_eq!(request.weather, Weather::Rain);
    }

    #[tokio::test]
    async fn rapid_changes_coalesce_into_one_submission() {
        let (controller, api) = controller(40);

        controller.set_city(0);
        controller.set_hour(8);
        controller.debounced_submit();
        controller.set_hour(12);
        controller.debounced_submit();
        controller.set_hour(17);
        controller.debounced_submit();

        tokio::time::sleep(Duration::from_millis(160)).await;

        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        // The one submission carries the values current at the last change
        let submitted = api.last_request.lock().unwrap().unwrap();
        assert_eq!(submitted.hour, 17);

        let current = controller.current_prediction().await.unwrap();
        assert_eq!(current.source, PredictionSource::Remote);
        assert_eq!(current.request.hour, 17);
    }

    #[tokio::test]
    async fn separate_quiet_periods_submit_separately() {
        let (controller, api) = controller(20);

        controller.set_city(0);
        controller.set_hour(8);
        controller.debounced_submit();
        tokio::time::sleep(Duration::from_millis(100)).await;

        controller.set_hour(17);
        controller.debounced_submit();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn a_superseded_submission_does_not_land_in_the_slot() {
        let (controller, api) = controller(10);
        let (gate_tx, gate_rx) = oneshot::channel();
        api.gate_next(gate_rx);

        controller.set_city(0);
        controller.set_hour(8);
        let slow = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.submit().await })
        };

        // Let the first submission reach its network await
        while api.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // A newer submission resolves immediately and takes the slot
        controller.set_hour(17);
        controller.submit().await.unwrap();

        // The stale response arrives afterwards and is discarded
        gate_tx.send(remote_response(2)).unwrap();
        slow.await.unwrap().unwrap();

        let current = controller.current_prediction().await.unwrap();
        assert_eq!(current.request.hour, 17);
        assert_eq!(current.level, crate::models::TrafficLevel::Medium);
    }

    #[tokio::test]
    async fn invalid_input_blocks_submission_entirely() {
        let (controller, api) = controller(10);
        let mut events = controller.subscribe();

        controller.set_hour(99);
        controller.set_weather(7);
        let error = controller.submit().await.unwrap_err();

        assert_eq!(error.violations.len(), 2);
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
        assert!(controller.current_prediction().await.is_none());
        match events.try_recv().unwrap() {
            FormEvent::SubmissionRejected { reasons } => assert_eq!(reasons.len(), 2),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn sync_to_current_time_yields_in_range_fields() {
        let (controller, _) = controller(10);
        controller.set_hour(99);
        controller.set_day(99);

        controller.sync_to_current_time();

        let fields = controller.fields();
        assert!((0..=23).contains(&fields.hour));
        assert!((0..=6).contains(&fields.day));
    }
}
