use std::{fs::File, io::Read, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, source::PositionOptions};

/// Every option the tracking engine recognizes, with its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingConfig {
    #[serde(default = "default_corridor_tolerance")]
    pub corridor_tolerance_meters: f64,
    /// Minimum spacing between two route checks. 0 checks every sample.
    #[serde(default = "default_recheck_interval")]
    pub route_recheck_interval_ms: u64,
    #[serde(default = "default_high_accuracy")]
    pub high_accuracy: bool,
    #[serde(default = "default_watch_timeout")]
    pub watch_timeout_ms: u64,
    #[serde(default)]
    pub watch_max_stale_ms: u64,
    #[serde(default)]
    pub best_effort: BestEffortConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BestEffortConfig {
    #[serde(default = "default_best_effort_wait")]
    pub max_wait_ms: u64,
    #[serde(default = "default_desired_accuracy")]
    pub desired_accuracy_meters: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            corridor_tolerance_meters: default_corridor_tolerance(),
            route_recheck_interval_ms: default_recheck_interval(),
            high_accuracy: default_high_accuracy(),
            watch_timeout_ms: default_watch_timeout(),
            watch_max_stale_ms: 0,
            best_effort: BestEffortConfig::default(),
        }
    }
}

impl Default for BestEffortConfig {
    fn default() -> Self {
        Self {
            max_wait_ms: default_best_effort_wait(),
            desired_accuracy_meters: default_desired_accuracy(),
            max_retries: default_max_retries(),
        }
    }
}

impl TrackingConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader(reader: impl Read) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.corridor_tolerance_meters.is_finite() || self.corridor_tolerance_meters < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "corridorToleranceMeters must be a non-negative number, got {}",
                self.corridor_tolerance_meters
            )));
        }
        let desired = self.best_effort.desired_accuracy_meters;
        if !desired.is_finite() || desired < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "bestEffort.desiredAccuracyMeters must be a non-negative number, got {desired}"
            )));
        }
        if self.best_effort.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "bestEffort.maxRetries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn position_options(&self) -> PositionOptions {
        PositionOptions {
            high_accuracy: self.high_accuracy,
            timeout: Duration::from_millis(self.watch_timeout_ms),
            maximum_age: Duration::from_millis(self.watch_max_stale_ms),
        }
    }

    pub fn route_recheck_interval(&self) -> Duration {
        Duration::from_millis(self.route_recheck_interval_ms)
    }
}

impl BestEffortConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

fn default_corridor_tolerance() -> f64 {
    shared::DEFAULT_CORRIDOR_TOLERANCE_M
}

fn default_recheck_interval() -> u64 {
    10_000
}

fn default_high_accuracy() -> bool {
    true
}

fn default_watch_timeout() -> u64 {
    15_000
}

fn default_best_effort_wait() -> u64 {
    10_000
}

fn default_desired_accuracy() -> f64 {
    20.0
}

fn default_max_retries() -> u32 {
    5
}
