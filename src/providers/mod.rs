pub mod traffic_api;

pub use traffic_api::{
    ApiRequestLog, ApiRequestSender, TrafficApi, TrafficApiClient, TrafficApiError,
};
