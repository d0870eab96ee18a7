use std::{
    collections::{HashMap, HashSet},
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
};

use shared::{Coordinate, Geofence, GeofenceEvent, GeofenceEventType, GeofenceKind, PositionSample};

use crate::{geometry, registry::GeofenceRegistry};

pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&GeofenceEvent) + Send + Sync>;

/// Tracks inside/outside status per registered geofence and raises an
/// event only when that status flips.
///
/// Listeners run synchronously on the thread calling [`evaluate`](Self::evaluate),
/// in subscription order. A listener that panics is logged and skipped; the
/// remaining listeners still receive the event.
pub struct GeofenceEvaluator {
    registry: Arc<GeofenceRegistry>,
    states: Mutex<HashMap<String, bool>>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl GeofenceEvaluator {
    pub fn new(registry: Arc<GeofenceRegistry>) -> Self {
        Self {
            registry,
            states: Mutex::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<GeofenceRegistry> {
        &self.registry
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&GeofenceEvent) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Updates every geofence's status from `sample`, delivers the resulting
    /// events to listeners and returns them.
    pub fn evaluate(&self, sample: &PositionSample) -> Vec<GeofenceEvent> {
        let events = self.transitions(sample);
        for event in &events {
            tracing::debug!(
                "geofence {} {:?} at ({:.6}, {:.6})",
                event.geofence_id,
                event.event_type,
                event.position.lat,
                event.position.lng
            );
            self.dispatch(event);
        }
        events
    }

    /// Last known status of a geofence; `None` if it was never evaluated.
    pub fn is_inside(&self, geofence_id: &str) -> Option<bool> {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(geofence_id)
            .copied()
    }

    /// Forgets every stored status, so the next sample inside a fence fires
    /// `Enter` again.
    pub fn reset(&self) {
        self.states.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn transitions(&self, sample: &PositionSample) -> Vec<GeofenceEvent> {
        let fences = self.registry.snapshot();
        let position = sample.coordinate;
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());

        // ids that left the registry start over as outside if re-added
        let live: HashSet<&str> = fences.iter().map(|g| g.id.as_str()).collect();
        states.retain(|id, _| live.contains(id.as_str()));

        let mut events = Vec::new();
        for fence in fences.iter() {
            let inside = contains(fence, position);
            let was_inside = states.insert(fence.id.clone(), inside).unwrap_or(false);
            let event_type = match (was_inside, inside) {
                (false, true) => GeofenceEventType::Enter,
                (true, false) => GeofenceEventType::Exit,
                _ => continue,
            };
            events.push(GeofenceEvent {
                geofence_id: fence.id.clone(),
                position,
                event_type,
                timestamp: sample.timestamp,
            });
        }
        events
    }

    fn dispatch(&self, event: &GeofenceEvent) {
        let listeners: Vec<(ListenerId, Listener)> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        for (id, listener) in listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::error!(
                    "geofence listener {id} panicked on {:?} for {}",
                    event.event_type,
                    event.geofence_id
                );
            }
        }
    }
}

/// Membership test for one geofence: corridor proximity or polygon
/// containment depending on its kind.
pub fn contains(geofence: &Geofence, position: Coordinate) -> bool {
    match geofence.kind {
        GeofenceKind::RouteCorridor => {
            geometry::is_near_polyline(position, &geofence.points, geofence.tolerance_meters)
        }
        GeofenceKind::ZonePolygon => geometry::is_inside_polygon(position, &geofence.points),
    }
}
