use std::{fs::File, io::BufReader, io::Read, path::Path, time::Duration};

use chrono::Utc;
use gpx::{Gpx, Waypoint};
use shared::{Coordinate, PositionSample};

use super::{PositionFeed, PositionOptions, PositionProvider, ScriptedProvider};
use crate::{error::LocationError, error::TrackerError, geometry};

/// Replays the track points of a GPX recording as live fixes, one every
/// `interval`. Heading is derived from consecutive points since GPX does
/// not carry it. The watch closes after the last point.
#[derive(Clone)]
pub struct GpxReplayProvider {
    script: ScriptedProvider,
}

impl GpxReplayProvider {
    pub fn from_path(path: impl AsRef<Path>, interval: Duration) -> Result<Self, TrackerError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), interval)
    }

    pub fn from_reader(reader: impl Read, interval: Duration) -> Result<Self, TrackerError> {
        let gpx = gpx::read(reader)?;
        let points = track_points(&gpx);
        if points.is_empty() {
            return Err(TrackerError::Input("GPX document has no track points".to_string()));
        }
        tracing::info!("loaded {} track points for replay", points.len());

        let steps = with_headings(&points).into_iter().map(Ok).collect();
        Ok(Self {
            script: ScriptedProvider::new(steps, interval).closing_when_done(),
        })
    }

    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }
}

impl PositionProvider for GpxReplayProvider {
    fn open(&self, options: &PositionOptions) -> Result<PositionFeed, LocationError> {
        self.script.open(options)
    }
}

/// Route polyline from a directions provider's GPX export: the first route
/// with at least two points, otherwise the first track.
pub fn route_from_gpx(reader: impl Read) -> Result<Vec<Coordinate>, TrackerError> {
    let gpx = gpx::read(reader)?;

    let route = gpx
        .routes
        .iter()
        .map(|route| route.points.iter().map(to_coordinate).collect::<Vec<_>>())
        .find(|points| points.len() >= 2);
    let points = match route {
        Some(points) => points,
        None => gpx
            .tracks
            .first()
            .map(|track| {
                track
                    .segments
                    .iter()
                    .flat_map(|segment| segment.points.iter().map(to_coordinate))
                    .collect()
            })
            .unwrap_or_default(),
    };

    if points.len() < 2 {
        return Err(TrackerError::Input(format!(
            "GPX route needs at least 2 points, found {}",
            points.len()
        )));
    }
    if let Some(bad) = points.iter().find(|p| !p.is_valid()) {
        return Err(TrackerError::Input(format!(
            "GPX route has an out-of-range point ({}, {})",
            bad.lat, bad.lng
        )));
    }
    Ok(points)
}

fn track_points(gpx: &Gpx) -> Vec<Coordinate> {
    gpx.tracks
        .iter()
        .flat_map(|track| track.segments.iter())
        .flat_map(|segment| segment.points.iter().map(to_coordinate))
        .collect()
}

fn with_headings(points: &[Coordinate]) -> Vec<PositionSample> {
    points
        .iter()
        .enumerate()
        .map(|(idx, &point)| {
            let heading = match idx {
                0 => points.get(1).map(|&next| geometry::initial_bearing(point, next)),
                _ => Some(geometry::initial_bearing(points[idx - 1], point)),
            };
            let mut sample = PositionSample::new(point, Utc::now());
            sample.heading_degrees = heading;
            sample
        })
        .collect()
}

fn to_coordinate(waypoint: &Waypoint) -> Coordinate {
    let point = waypoint.point();
    Coordinate {
        lat: point.y(),
        lng: point.x(),
    }
}
