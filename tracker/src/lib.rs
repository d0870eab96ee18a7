pub mod config;
pub mod danger;
mod delivery;
pub mod error;
pub mod evaluator;
pub mod geometry;
pub mod orchestrator;
pub mod registry;
pub mod route_monitor;
pub mod source;

pub use config::{BestEffortConfig, TrackingConfig};
pub use error::{ConfigError, GeofenceError, LocationError, TrackerError};
pub use evaluator::{GeofenceEvaluator, ListenerId};
pub use orchestrator::{LiveTrackingOrchestrator, TrackingCallbacks, TrackingHandle};
pub use registry::GeofenceRegistry;
pub use route_monitor::RouteDeviationMonitor;
pub use source::{
    route_from_gpx, GpxReplayProvider, PermissionState, PositionFeed, PositionOptions,
    PositionProvider, PositionSource, ScriptedProvider, WatchHandle, WatchRelease,
};
