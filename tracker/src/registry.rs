use std::sync::{Arc, RwLock};

use shared::Geofence;

use crate::error::GeofenceError;

/// In-memory set of geofences keyed by id, in insertion order.
///
/// Mutations swap in a fresh list, so an evaluation holding a
/// [`snapshot`](Self::snapshot) keeps working on a consistent view while
/// fences are added or removed concurrently.
#[derive(Debug, Default)]
pub struct GeofenceRegistry {
    fences: RwLock<Arc<Vec<Geofence>>>,
}

impl GeofenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, geofence: Geofence) -> Result<(), GeofenceError> {
        validate(&geofence)?;

        let mut guard = self.fences.write().unwrap_or_else(|e| e.into_inner());
        if guard.iter().any(|g| g.id == geofence.id) {
            return Err(GeofenceError::invalid(&geofence.id, "id already registered"));
        }
        tracing::debug!(
            "registered geofence {} ({:?}, {} points)",
            geofence.id,
            geofence.kind,
            geofence.points.len()
        );
        Arc::make_mut(&mut *guard).push(geofence);
        Ok(())
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut guard = self.fences.write().unwrap_or_else(|e| e.into_inner());
        let Some(pos) = guard.iter().position(|g| g.id == id) else {
            return false;
        };
        Arc::make_mut(&mut *guard).remove(pos);
        tracing::debug!("removed geofence {id}");
        true
    }

    pub fn clear(&self) {
        let mut guard = self.fences.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(Vec::new());
    }

    /// Owned copy of the registered geofences.
    pub fn list(&self) -> Vec<Geofence> {
        self.snapshot().as_ref().clone()
    }

    pub fn get(&self, id: &str) -> Option<Geofence> {
        self.snapshot().iter().find(|g| g.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Shared read-only view, cheap to take once per evaluation.
    pub fn snapshot(&self) -> Arc<Vec<Geofence>> {
        self.fences
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

fn validate(geofence: &Geofence) -> Result<(), GeofenceError> {
    if geofence.id.trim().is_empty() {
        return Err(GeofenceError::invalid(&geofence.id, "id must not be empty"));
    }
    let min_points = geofence.kind.min_points();
    if geofence.points.len() < min_points {
        return Err(GeofenceError::invalid(
            &geofence.id,
            format!(
                "{:?} needs at least {min_points} points, got {}",
                geofence.kind,
                geofence.points.len()
            ),
        ));
    }
    if let Some(bad) = geofence.points.iter().find(|p| !p.is_valid()) {
        return Err(GeofenceError::invalid(
            &geofence.id,
            format!("coordinate out of range: ({}, {})", bad.lat, bad.lng),
        ));
    }
    if !geofence.tolerance_meters.is_finite() || geofence.tolerance_meters < 0.0 {
        return Err(GeofenceError::invalid(
            &geofence.id,
            format!("tolerance must be non-negative, got {}", geofence.tolerance_meters),
        ));
    }
    Ok(())
}
