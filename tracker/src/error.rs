use std::io;

use thiserror::Error;

/// Failures reported by a position source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("location services are not available on this device")]
    Unavailable,
    #[error("location permission denied")]
    PermissionDenied,
    #[error("no position fix within the allowed time")]
    Timeout,
}

impl LocationError {
    /// Only timeouts can succeed on a plain retry; the others need the
    /// platform or the user to change something first.
    pub fn is_retryable(self) -> bool {
        matches!(self, LocationError::Timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeofenceError {
    #[error("invalid geofence {id:?}: {reason}")]
    InvalidGeofence { id: String, reason: String },
}

impl GeofenceError {
    pub(crate) fn invalid(id: &str, reason: impl Into<String>) -> Self {
        GeofenceError::InvalidGeofence {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] io::Error),
    #[error("invalid config definition: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Location(#[from] LocationError),
    #[error(transparent)]
    Geofence(#[from] GeofenceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to read GPX document: {0}")]
    Gpx(#[from] gpx::errors::GpxError),
    #[error("failed to read input: {0}")]
    Io(#[from] io::Error),
    #[error("invalid input: {0}")]
    Input(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_are_retryable() {
        assert!(LocationError::Timeout.is_retryable());
        assert!(!LocationError::PermissionDenied.is_retryable());
        assert!(!LocationError::Unavailable.is_retryable());
    }

    #[test]
    fn location_errors_pass_through_tracker_error() {
        let err = TrackerError::from(LocationError::PermissionDenied);
        assert_eq!(err.to_string(), "location permission denied");
    }
}
