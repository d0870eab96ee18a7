//! Spherical geometry used to test positions against geofences.
//!
//! Every function here is total: degenerate input yields a safe default
//! instead of an error or a panic.

use shared::Coordinate;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Slack added to corridor comparisons so a point lying exactly on a
/// segment still matches a zero tolerance after projection rounding.
const ON_LINE_EPSILON_M: f64 = 1e-6;

/// Keeps the local projection finite at the poles.
const MIN_COS_LAT: f64 = 1e-12;

/// Great-circle distance in meters (Haversine).
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlng = (dlng / 2.0).sin();

    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlng * sin_dlng;
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Initial great-circle bearing from `a` towards `b`, degrees clockwise
/// from north in [0, 360).
pub fn initial_bearing(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let y = dlng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlng.cos();
    normalize_bearing(y.atan2(x).to_degrees())
}

/// Shortest distance in meters from `p` to the segment `a`-`b`.
///
/// The closest point is found in an equirectangular projection centered on
/// `p`, which is accurate at corridor scale, then measured with [`distance`].
/// The segment keeps its own shorter way around the globe; it is placed at
/// whichever copy, one turn east or west, lies closest to `p`.
pub fn distance_to_segment(p: Coordinate, a: Coordinate, b: Coordinate) -> f64 {
    let frame = LocalFrame::centered_on(p);
    let (ax, ay) = frame.project(a);
    let dx = frame.lng_to_x(normalize_longitude_delta(b.lng - a.lng));
    let dy = frame.lat_to_y(b.lat - a.lat);
    let turn = frame.lng_to_x(360.0);

    [0.0, -turn, turn]
        .into_iter()
        .map(|shift| {
            let (sx, sy) = (ax + shift, ay);
            let len_sq = dx * dx + dy * dy;
            let t = if len_sq > 0.0 {
                (-(sx * dx + sy * dy) / len_sq).clamp(0.0, 1.0)
            } else {
                0.0
            };
            distance(p, frame.unproject(sx + t * dx, sy + t * dy))
        })
        .fold(f64::INFINITY, f64::min)
}

/// Minimum distance from `p` to any segment of `line`, or `None` when the
/// line has fewer than two points.
pub fn distance_to_polyline(p: Coordinate, line: &[Coordinate]) -> Option<f64> {
    line.windows(2)
        .map(|w| distance_to_segment(p, w[0], w[1]))
        .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
}

/// True when `p` is within `tolerance_meters` of some segment of `line`.
pub fn is_near_polyline(p: Coordinate, line: &[Coordinate], tolerance_meters: f64) -> bool {
    if line.len() < 2 {
        return false;
    }
    line.windows(2)
        .any(|w| distance_to_segment(p, w[0], w[1]) <= tolerance_meters + ON_LINE_EPSILON_M)
}

/// Ray-casting membership test; the polygon is implicitly closed and
/// treated as planar in degrees.
pub fn is_inside_polygon(p: Coordinate, polygon: &[Coordinate]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut prev = polygon[polygon.len() - 1];
    for &curr in polygon {
        if (curr.lat > p.lat) != (prev.lat > p.lat) {
            let crossing_lng =
                (prev.lng - curr.lng) * (p.lat - curr.lat) / (prev.lat - curr.lat) + curr.lng;
            if p.lng < crossing_lng {
                inside = !inside;
            }
        }
        prev = curr;
    }
    inside
}

fn normalize_bearing(bearing_deg: f64) -> f64 {
    let mut value = bearing_deg % 360.0;
    if value < 0.0 {
        value += 360.0;
    }
    value
}

fn normalize_longitude_delta(delta: f64) -> f64 {
    let mut normalized = delta;
    while normalized < -180.0 {
        normalized += 360.0;
    }
    while normalized > 180.0 {
        normalized -= 360.0;
    }
    normalized
}

/// Equirectangular plane in meters around an origin.
struct LocalFrame {
    origin: Coordinate,
    cos_lat: f64,
}

impl LocalFrame {
    fn centered_on(origin: Coordinate) -> Self {
        Self {
            origin,
            cos_lat: origin.lat.to_radians().cos().max(MIN_COS_LAT),
        }
    }

    fn project(&self, c: Coordinate) -> (f64, f64) {
        let dlng = normalize_longitude_delta(c.lng - self.origin.lng);
        (self.lng_to_x(dlng), self.lat_to_y(c.lat - self.origin.lat))
    }

    fn lng_to_x(&self, dlng: f64) -> f64 {
        dlng.to_radians() * self.cos_lat * EARTH_RADIUS_M
    }

    fn lat_to_y(&self, dlat: f64) -> f64 {
        dlat.to_radians() * EARTH_RADIUS_M
    }

    fn unproject(&self, x: f64, y: f64) -> Coordinate {
        Coordinate {
            lat: self.origin.lat + (y / EARTH_RADIUS_M).to_degrees(),
            lng: self.origin.lng + (x / (EARTH_RADIUS_M * self.cos_lat)).to_degrees(),
        }
    }
}
