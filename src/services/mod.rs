pub mod form_sync;
pub mod location;
pub mod map_state;
pub mod prediction;

pub use form_sync::FormSyncController;
pub use location::{GeoLocator, LocationError, LocationProvider};
pub use map_state::{MapStateController, MapSurface, NoopMapSurface};
pub use prediction::PredictionOrchestrator;
