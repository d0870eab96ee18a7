//! On-route / off-route state machine for a single armed corridor.
//!
//! ```text
//! Idle --arm--> Awaiting --inside--> OnRoute <--inside/outside--> OffRoute
//!                       --outside--> OffRoute
//! any --disarm--> Idle
//! ```
//!
//! The monitor only reacts to the samples it is fed; how often to feed it
//! is up to the caller.

use shared::{Coordinate, PositionSample, RouteMonitorState};

use crate::geometry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Disarmed,
    Awaiting,
    Tracking(RouteMonitorState),
}

#[derive(Debug, Clone)]
pub struct RouteDeviationMonitor {
    corridor: Vec<Coordinate>,
    tolerance_meters: f64,
    phase: Phase,
    last_offset_meters: Option<f64>,
}

impl Default for RouteDeviationMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteDeviationMonitor {
    pub fn new() -> Self {
        Self {
            corridor: Vec::new(),
            tolerance_meters: shared::DEFAULT_CORRIDOR_TOLERANCE_M,
            phase: Phase::Disarmed,
            last_offset_meters: None,
        }
    }

    /// Replaces any armed corridor and waits for the first sample.
    pub fn arm(&mut self, corridor: Vec<Coordinate>, tolerance_meters: f64) {
        tracing::debug!(
            "route armed: {} points, tolerance {tolerance_meters} m",
            corridor.len()
        );
        self.corridor = corridor;
        self.tolerance_meters = tolerance_meters;
        self.phase = Phase::Awaiting;
        self.last_offset_meters = None;
    }

    pub fn disarm(&mut self) {
        self.corridor.clear();
        self.phase = Phase::Disarmed;
        self.last_offset_meters = None;
    }

    pub fn is_armed(&self) -> bool {
        self.phase != Phase::Disarmed
    }

    /// Armed but no sample evaluated yet.
    pub fn is_awaiting_first_sample(&self) -> bool {
        self.phase == Phase::Awaiting
    }

    /// `Idle` while disarmed or still awaiting the first sample.
    pub fn state(&self) -> RouteMonitorState {
        match self.phase {
            Phase::Tracking(state) => state,
            Phase::Disarmed | Phase::Awaiting => RouteMonitorState::Idle,
        }
    }

    pub fn corridor(&self) -> &[Coordinate] {
        &self.corridor
    }

    pub fn tolerance_meters(&self) -> f64 {
        self.tolerance_meters
    }

    /// Distance from the corridor measured at the last fed sample.
    pub fn last_offset_meters(&self) -> Option<f64> {
        self.last_offset_meters
    }

    /// Evaluates one sample. Returns the resulting state and whether this
    /// call changed it; a disarmed monitor always returns `(Idle, false)`.
    pub fn feed(&mut self, sample: &PositionSample) -> (RouteMonitorState, bool) {
        if self.phase == Phase::Disarmed {
            return (RouteMonitorState::Idle, false);
        }

        let position = sample.coordinate;
        self.last_offset_meters = geometry::distance_to_polyline(position, &self.corridor);
        let next = if geometry::is_near_polyline(position, &self.corridor, self.tolerance_meters) {
            RouteMonitorState::OnRoute
        } else {
            RouteMonitorState::OffRoute
        };

        let transitioned = self.phase != Phase::Tracking(next);
        self.phase = Phase::Tracking(next);
        (next, transitioned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corridor() -> Vec<Coordinate> {
        vec![Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0)]
    }

    fn on_route() -> PositionSample {
        PositionSample::at(0.0, 0.0005)
    }

    fn off_route() -> PositionSample {
        PositionSample::at(1.0, 1.0)
    }

    #[test]
    fn starts_idle_and_ignores_samples() {
        let mut monitor = RouteDeviationMonitor::new();
        assert_eq!(monitor.state(), RouteMonitorState::Idle);
        assert_eq!(monitor.feed(&on_route()), (RouteMonitorState::Idle, false));
        assert!(!monitor.is_armed());
    }

    #[test]
    fn transitions_are_reported_once() {
        let mut monitor = RouteDeviationMonitor::new();
        monitor.arm(corridor(), 100.0);
        assert!(monitor.is_awaiting_first_sample());

        assert_eq!(monitor.feed(&on_route()), (RouteMonitorState::OnRoute, true));
        assert_eq!(monitor.feed(&on_route()), (RouteMonitorState::OnRoute, false));
        assert_eq!(monitor.feed(&off_route()), (RouteMonitorState::OffRoute, true));
        assert_eq!(monitor.feed(&off_route()), (RouteMonitorState::OffRoute, false));
        assert_eq!(monitor.feed(&on_route()), (RouteMonitorState::OnRoute, true));
    }

    #[test]
    fn first_sample_outside_goes_straight_off_route() {
        let mut monitor = RouteDeviationMonitor::new();
        monitor.arm(corridor(), 100.0);
        assert_eq!(monitor.feed(&off_route()), (RouteMonitorState::OffRoute, true));
    }

    #[test]
    fn disarm_makes_feed_a_noop() {
        let mut monitor = RouteDeviationMonitor::new();
        monitor.arm(corridor(), 100.0);
        monitor.feed(&on_route());
        monitor.disarm();

        assert_eq!(monitor.state(), RouteMonitorState::Idle);
        assert_eq!(monitor.feed(&off_route()), (RouteMonitorState::Idle, false));
        assert!(monitor.corridor().is_empty());
    }

    #[test]
    fn rearm_replaces_corridor_and_state() {
        let mut monitor = RouteDeviationMonitor::new();
        monitor.arm(corridor(), 100.0);
        monitor.feed(&off_route());
        assert_eq!(monitor.state(), RouteMonitorState::OffRoute);

        let detour = vec![Coordinate::new(1.0, 0.0), Coordinate::new(1.0, 2.0)];
        monitor.arm(detour, 100.0);
        assert_eq!(monitor.state(), RouteMonitorState::Idle);
        assert_eq!(monitor.feed(&off_route()), (RouteMonitorState::OnRoute, true));
    }

    #[test]
    fn degenerate_corridor_is_always_off_route() {
        let mut monitor = RouteDeviationMonitor::new();
        monitor.arm(vec![Coordinate::new(0.0, 0.0)], 1_000.0);
        assert_eq!(monitor.feed(&on_route()), (RouteMonitorState::OffRoute, true));
        assert_eq!(monitor.last_offset_meters(), None);
    }

    #[test]
    fn records_offset_from_corridor() {
        let mut monitor = RouteDeviationMonitor::new();
        monitor.arm(corridor(), 100.0);
        monitor.feed(&PositionSample::at(0.001, 0.5));
        let offset = monitor.last_offset_meters().unwrap();
        assert!((offset - 111.19).abs() < 0.1);
    }
}
