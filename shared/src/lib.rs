use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default half-width of a route corridor, in meters.
pub const DEFAULT_CORRIDOR_TOLERANCE_M: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// One fix from a position source. Accuracy and heading are only present
/// when the platform reported them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSample {
    pub coordinate: Coordinate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<f64>,
    /// Degrees clockwise from true north, in [0, 360).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_degrees: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl PositionSample {
    pub fn new(coordinate: Coordinate, timestamp: DateTime<Utc>) -> Self {
        Self {
            coordinate,
            accuracy_meters: None,
            heading_degrees: None,
            timestamp,
        }
    }

    pub fn at(lat: f64, lng: f64) -> Self {
        Self::new(Coordinate::new(lat, lng), Utc::now())
    }

    pub fn with_accuracy(mut self, meters: f64) -> Self {
        self.accuracy_meters = Some(meters);
        self
    }

    pub fn with_heading(mut self, degrees: f64) -> Self {
        self.heading_degrees = Some(degrees);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GeofenceKind {
    /// Polyline with a tolerance; needs at least two points.
    RouteCorridor,
    /// Implicitly closed polygon; needs at least three points.
    ZonePolygon,
}

impl GeofenceKind {
    pub fn min_points(self) -> usize {
        match self {
            GeofenceKind::RouteCorridor => 2,
            GeofenceKind::ZonePolygon => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geofence {
    pub id: String,
    pub kind: GeofenceKind,
    pub points: Vec<Coordinate>,
    #[serde(default = "default_tolerance")]
    pub tolerance_meters: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Geofence {
    pub fn corridor(id: impl Into<String>, points: Vec<Coordinate>, tolerance_meters: f64) -> Self {
        Self {
            id: id.into(),
            kind: GeofenceKind::RouteCorridor,
            points,
            tolerance_meters,
            name: None,
        }
    }

    pub fn zone(id: impl Into<String>, points: Vec<Coordinate>) -> Self {
        Self {
            id: id.into(),
            kind: GeofenceKind::ZonePolygon,
            points,
            tolerance_meters: DEFAULT_CORRIDOR_TOLERANCE_M,
            name: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeofenceEventType {
    Enter,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceEvent {
    pub geofence_id: String,
    pub position: Coordinate,
    pub event_type: GeofenceEventType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RouteMonitorState {
    #[default]
    Idle,
    OnRoute,
    OffRoute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

/// Circular hazard area, evaluated by distance from its center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DangerZone {
    pub id: String,
    pub name: String,
    pub center: Coordinate,
    pub radius_meters: f64,
    pub risk_level: RiskLevel,
}

fn default_tolerance() -> f64 {
    DEFAULT_CORRIDOR_TOLERANCE_M
}
