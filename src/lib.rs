//! Traffic-advisory client core for Tunisian cities.
//!
//! Collects the prediction inputs (hour, day, city, weather), resolves a
//! traffic prediction remotely with a deterministic local fallback, and
//! drives an injected map surface with city markers, live traffic badges,
//! and a route/ETA overlay from the user's location. Presentation and
//! pixel-level drawing are collaborator concerns behind the `MapSurface`
//! and `LocationProvider` traits.

pub mod config;
pub mod fallback;
pub mod geo;
pub mod models;
pub mod policy;
pub mod providers;
pub mod services;
