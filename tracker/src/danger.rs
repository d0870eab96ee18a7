use shared::{Coordinate, DangerZone};

use crate::geometry;

/// Zone that contains `p`, with the distance from its center. When zones
/// overlap, the one `p` is most deeply inside (smallest `distance - radius`)
/// wins.
pub fn nearest(p: Coordinate, zones: &[DangerZone]) -> Option<(&DangerZone, f64)> {
    zones
        .iter()
        .map(|zone| (zone, geometry::distance(p, zone.center)))
        .filter(|(zone, dist)| *dist <= zone.radius_meters)
        .min_by(|(a, da), (b, db)| {
            (da - a.radius_meters)
                .partial_cmp(&(db - b.radius_meters))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}
