//! Live tracking session: one position watch feeding geofence evaluation,
//! route deviation monitoring and danger zone warnings.
//!
//! Fixes flow through a single channel into one evaluation task per
//! session, so they are processed strictly in arrival order. Consumer
//! callbacks run on that task; each one is isolated so a panic is logged
//! instead of ending the session.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};

use shared::{Coordinate, DangerZone, PositionSample, RouteMonitorState};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior},
};

use crate::{
    config::TrackingConfig,
    danger,
    delivery::DeliveryGate,
    error::LocationError,
    evaluator::GeofenceEvaluator,
    registry::GeofenceRegistry,
    route_monitor::RouteDeviationMonitor,
    source::{FeedItem, PositionSource, WatchRelease},
};

type SampleCallback = Box<dyn FnMut(&PositionSample) + Send>;
type ErrorCallback = Box<dyn FnMut(LocationError) + Send>;
type DangerCallback = Box<dyn FnMut(&PositionSample, &DangerZone, f64) + Send>;

/// Consumer hooks for a tracking session. Every hook is optional.
#[derive(Default)]
pub struct TrackingCallbacks {
    on_location: Option<SampleCallback>,
    on_deviation: Option<SampleCallback>,
    on_reentry: Option<SampleCallback>,
    on_error: Option<ErrorCallback>,
    on_danger_zone: Option<DangerCallback>,
    on_danger_zone_cleared: Option<SampleCallback>,
}

impl TrackingCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every accepted fix, including its heading when known.
    pub fn on_location(mut self, f: impl FnMut(&PositionSample) + Send + 'static) -> Self {
        self.on_location = Some(Box::new(f));
        self
    }

    /// The armed route was left.
    pub fn on_deviation(mut self, f: impl FnMut(&PositionSample) + Send + 'static) -> Self {
        self.on_deviation = Some(Box::new(f));
        self
    }

    /// The armed route was rejoined after a deviation.
    pub fn on_reentry(mut self, f: impl FnMut(&PositionSample) + Send + 'static) -> Self {
        self.on_reentry = Some(Box::new(f));
        self
    }

    /// Watch failures. A permission denial is reported once until a fix
    /// arrives again.
    pub fn on_error(mut self, f: impl FnMut(LocationError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// The position moved into a danger zone (or into a different one).
    /// Receives the zone and the distance to its center.
    pub fn on_danger_zone(
        mut self,
        f: impl FnMut(&PositionSample, &DangerZone, f64) + Send + 'static,
    ) -> Self {
        self.on_danger_zone = Some(Box::new(f));
        self
    }

    pub fn on_danger_zone_cleared(mut self, f: impl FnMut(&PositionSample) + Send + 'static) -> Self {
        self.on_danger_zone_cleared = Some(Box::new(f));
        self
    }
}

/// State shared between the orchestrator and its session task.
struct Shared {
    evaluator: Arc<GeofenceEvaluator>,
    route: Mutex<RouteDeviationMonitor>,
    danger_zones: RwLock<Arc<Vec<DangerZone>>>,
    last_sample: Mutex<Option<PositionSample>>,
}

impl Shared {
    fn route(&self) -> std::sync::MutexGuard<'_, RouteDeviationMonitor> {
        self.route.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct LiveTrackingOrchestrator {
    source: PositionSource,
    config: TrackingConfig,
    shared: Arc<Shared>,
    session: Mutex<Option<SessionControl>>,
}

impl LiveTrackingOrchestrator {
    pub fn new(source: PositionSource, config: TrackingConfig) -> Self {
        Self::with_registry(source, config, Arc::new(GeofenceRegistry::new()))
    }

    /// Uses a registry that other code may keep mutating while tracking.
    pub fn with_registry(
        source: PositionSource,
        config: TrackingConfig,
        registry: Arc<GeofenceRegistry>,
    ) -> Self {
        Self {
            source,
            config,
            shared: Arc::new(Shared {
                evaluator: Arc::new(GeofenceEvaluator::new(registry)),
                route: Mutex::new(RouteDeviationMonitor::new()),
                danger_zones: RwLock::new(Arc::new(Vec::new())),
                last_sample: Mutex::new(None),
            }),
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<GeofenceRegistry> {
        self.shared.evaluator.registry()
    }

    /// Subscribe here to receive geofence enter/exit events.
    pub fn evaluator(&self) -> &Arc<GeofenceEvaluator> {
        &self.shared.evaluator
    }

    /// Arms route monitoring, atomically replacing any previous corridor
    /// and its state. The next fix is evaluated immediately.
    pub fn arm_route(&self, points: Vec<Coordinate>, tolerance_meters: f64) {
        if points.len() < 2 {
            tracing::warn!(
                "arming a route with {} point(s); every fix will count as off route",
                points.len()
            );
        }
        tracing::info!("route monitoring armed ({} points, {tolerance_meters} m)", points.len());
        self.shared.route().arm(points, tolerance_meters);
    }

    /// Arms with the configured corridor tolerance.
    pub fn arm_route_default(&self, points: Vec<Coordinate>) {
        self.arm_route(points, self.config.corridor_tolerance_meters);
    }

    pub fn disarm_route(&self) {
        self.shared.route().disarm();
    }

    pub fn route_state(&self) -> RouteMonitorState {
        self.shared.route().state()
    }

    pub fn set_danger_zones(&self, zones: Vec<DangerZone>) {
        *self
            .shared
            .danger_zones
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Arc::new(zones);
    }

    pub fn last_sample(&self) -> Option<PositionSample> {
        self.shared
            .last_sample
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_running(&self) -> bool {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(SessionControl::is_running)
    }

    /// Opens a position watch and processes every fix through the
    /// pipeline. A session already running is halted and its device watch
    /// cleared before the new watch opens, so only one watch is ever active
    /// per orchestrator.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use = "dropping the handle stops tracking"]
    pub fn start(&self, mut callbacks: TrackingCallbacks) -> TrackingHandle {
        let previous = self.session.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(previous) = previous {
            if previous.halt() {
                tracing::info!("restarting live tracking; previous watch stopped");
            }
        }

        let (items, release) = match self.source.feed(&self.config.position_options()) {
            Ok(feed) => feed.into_parts(),
            Err(err) => {
                tracing::warn!("live tracking could not start: {err}");
                let control = SessionControl::new(self.shared.clone(), WatchRelease::default());
                control.ended.store(true, Ordering::SeqCst);
                self.install(control.clone());
                if let Some(on_error) = callbacks.on_error.as_mut() {
                    guarded("error", || on_error(err));
                }
                return TrackingHandle {
                    control,
                    task: None,
                };
            }
        };

        let control = SessionControl::new(self.shared.clone(), release);
        tracing::info!("live tracking started");
        let pipeline = Pipeline {
            shared: self.shared.clone(),
            gate: control.gate.clone(),
            callbacks,
            recheck_interval: self.config.route_recheck_interval(),
            last_route_check: None,
            pending_route_sample: None,
            current_danger_zone: None,
            permission_reported: false,
        };
        let task = tokio::spawn(run_session(items, pipeline, control.clone()));

        self.install(control.clone());
        TrackingHandle {
            control,
            task: Some(task),
        }
    }

    /// Records `control` as the current session. A session installed
    /// concurrently in the meantime is halted.
    fn install(&self, control: SessionControl) {
        let replaced = self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(control);
        if let Some(replaced) = replaced {
            replaced.halt();
        }
    }

    /// Stops the running session, if any, and disarms the route.
    pub fn stop(&self) {
        let control = self.session.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(control) = control {
            control.cancel();
        }
    }
}

#[derive(Clone)]
struct SessionControl {
    gate: Arc<DeliveryGate>,
    release: Arc<WatchRelease>,
    /// Set once the session ended without being cancelled.
    ended: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl SessionControl {
    fn new(shared: Arc<Shared>, release: WatchRelease) -> Self {
        Self {
            gate: Arc::new(DeliveryGate::new()),
            release: Arc::new(release),
            ended: Arc::new(AtomicBool::new(false)),
            shared,
        }
    }

    /// Stops delivery and clears the device watch without touching route
    /// state.
    fn halt(&self) -> bool {
        let first = self.gate.cancel();
        self.release.release();
        first
    }

    /// Like [`halt`](Self::halt), and also disarms the route unless the
    /// session had already ended on its own.
    fn cancel(&self) {
        let ended = self.ended.load(Ordering::SeqCst);
        if self.halt() && !ended {
            self.shared.route().disarm();
            tracing::info!("live tracking stopped");
        }
    }

    fn is_running(&self) -> bool {
        !self.gate.is_cancelled() && !self.ended.load(Ordering::SeqCst)
    }
}

/// Handle to a tracking session. [`cancel`](Self::cancel) is idempotent;
/// once it returns no callback of this session is running or will run.
/// Dropping the handle cancels the session.
pub struct TrackingHandle {
    control: SessionControl,
    task: Option<JoinHandle<()>>,
}

impl TrackingHandle {
    /// Stops the watch and disarms the route monitor. After the session
    /// ended on its own, e.g. a replay ran out of fixes, the route is left
    /// armed.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn is_active(&self) -> bool {
        self.control.is_running()
    }

    /// Waits until the session task ends, e.g. because the position
    /// provider closed the watch.
    pub async fn finished(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::error!("tracking session task failed: {err}");
            }
        }
    }
}

impl Drop for TrackingHandle {
    fn drop(&mut self) {
        self.control.cancel();
    }
}

async fn run_session(mut feed: mpsc::Receiver<FeedItem>, mut pipeline: Pipeline, control: SessionControl) {
    let gate = control.gate.clone();
    let mut ticker = recheck_ticker(pipeline.recheck_interval);

    loop {
        tokio::select! {
            biased;
            _ = gate.cancelled() => break,
            item = feed.recv() => {
                let Some(item) = item else {
                    tracing::info!("position feed closed; live tracking ended");
                    break;
                };
                let processed = gate.deliver(|| match item {
                    Ok(sample) => pipeline.on_sample(sample),
                    Err(err) => pipeline.on_error(err),
                });
                if processed.is_none() {
                    break;
                }
            }
            _ = next_tick(&mut ticker) => {
                if gate.deliver(|| pipeline.on_tick()).is_none() {
                    break;
                }
            }
        }
    }

    if !gate.is_cancelled() {
        control.ended.store(true, Ordering::SeqCst);
    }
    control.release.release();
}

fn recheck_ticker(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

struct Pipeline {
    shared: Arc<Shared>,
    gate: Arc<DeliveryGate>,
    callbacks: TrackingCallbacks,
    recheck_interval: Duration,
    last_route_check: Option<Instant>,
    pending_route_sample: Option<PositionSample>,
    current_danger_zone: Option<String>,
    permission_reported: bool,
}

impl Pipeline {
    fn on_sample(&mut self, sample: PositionSample) {
        if !sample.coordinate.is_valid() {
            tracing::warn!(
                "dropping fix with out-of-range coordinate ({}, {})",
                sample.coordinate.lat,
                sample.coordinate.lng
            );
            return;
        }
        self.permission_reported = false;
        *self
            .shared
            .last_sample
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(sample.clone());

        if let Some(on_location) = self.callbacks.on_location.as_mut() {
            guarded("location", || on_location(&sample));
        }

        if self.gate.is_cancelled() {
            return;
        }
        self.shared.evaluator.evaluate(&sample);

        if self.gate.is_cancelled() {
            return;
        }
        self.check_danger_zones(&sample);

        if self.gate.is_cancelled() {
            return;
        }
        self.check_route(sample);
    }

    fn on_error(&mut self, err: LocationError) {
        if err == LocationError::PermissionDenied {
            if self.permission_reported {
                tracing::debug!("suppressing repeated permission denial");
                return;
            }
            self.permission_reported = true;
        }
        if err.is_retryable() {
            tracing::debug!("position watch error: {err}");
        } else {
            tracing::warn!("position watch error: {err}");
        }
        if let Some(on_error) = self.callbacks.on_error.as_mut() {
            guarded("error", || on_error(err));
        }
    }

    fn on_tick(&mut self) {
        if let Some(sample) = self.pending_route_sample.take() {
            self.feed_route(sample);
        }
    }

    fn check_danger_zones(&mut self, sample: &PositionSample) {
        let zones = self
            .shared
            .danger_zones
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        match danger::nearest(sample.coordinate, &zones) {
            Some((zone, dist)) => {
                if self.current_danger_zone.as_deref() == Some(zone.id.as_str()) {
                    return;
                }
                tracing::warn!(
                    "inside danger zone {} ({:?} risk), {:.0} m from center",
                    zone.name,
                    zone.risk_level,
                    dist
                );
                self.current_danger_zone = Some(zone.id.clone());
                if let Some(on_danger) = self.callbacks.on_danger_zone.as_mut() {
                    guarded("danger zone", || on_danger(sample, zone, dist));
                }
            }
            None => {
                if self.current_danger_zone.take().is_none() {
                    return;
                }
                tracing::info!("left danger zones");
                if let Some(on_cleared) = self.callbacks.on_danger_zone_cleared.as_mut() {
                    guarded("danger zone cleared", || on_cleared(sample));
                }
            }
        }
    }

    fn check_route(&mut self, sample: PositionSample) {
        let (armed, awaiting) = {
            let route = self.shared.route();
            (route.is_armed(), route.is_awaiting_first_sample())
        };
        if !armed {
            self.pending_route_sample = None;
            return;
        }

        if awaiting || self.route_check_due() {
            self.feed_route(sample);
        } else {
            self.pending_route_sample = Some(sample);
        }
    }

    fn route_check_due(&self) -> bool {
        match self.last_route_check {
            Some(last) => last.elapsed() >= self.recheck_interval,
            None => true,
        }
    }

    fn feed_route(&mut self, sample: PositionSample) {
        self.pending_route_sample = None;
        self.last_route_check = Some(Instant::now());

        let (previous, (state, transitioned), offset) = {
            let mut route = self.shared.route();
            let previous = route.state();
            let result = route.feed(&sample);
            (previous, result, route.last_offset_meters())
        };
        if !transitioned {
            return;
        }

        match state {
            RouteMonitorState::OffRoute => {
                tracing::info!(
                    "route deviation at ({:.6}, {:.6}), {:.0} m from route",
                    sample.coordinate.lat,
                    sample.coordinate.lng,
                    offset.unwrap_or(f64::NAN)
                );
                if let Some(on_deviation) = self.callbacks.on_deviation.as_mut() {
                    guarded("deviation", || on_deviation(&sample));
                }
            }
            RouteMonitorState::OnRoute if previous == RouteMonitorState::OffRoute => {
                tracing::info!(
                    "back on route at ({:.6}, {:.6})",
                    sample.coordinate.lat,
                    sample.coordinate.lng
                );
                if let Some(on_reentry) = self.callbacks.on_reentry.as_mut() {
                    guarded("reentry", || on_reentry(&sample));
                }
            }
            RouteMonitorState::OnRoute => {
                tracing::debug!("route tracking acquired");
            }
            RouteMonitorState::Idle => {}
        }
    }
}

fn guarded(what: &str, f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!("{what} callback panicked; continuing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FeedItem, ScriptedProvider};
    use shared::{Geofence, RiskLevel};

    const TICK: Duration = Duration::from_millis(100);

    fn unthrottled() -> TrackingConfig {
        TrackingConfig {
            route_recheck_interval_ms: 0,
            ..TrackingConfig::default()
        }
    }

    fn fixes(points: &[(f64, f64)]) -> Vec<FeedItem> {
        points.iter().map(|&(lat, lng)| Ok(PositionSample::at(lat, lng))).collect()
    }

    fn tracker_with(steps: Vec<FeedItem>, config: TrackingConfig) -> (LiveTrackingOrchestrator, ScriptedProvider) {
        let provider = ScriptedProvider::new(steps, TICK);
        let source = PositionSource::new(provider.clone());
        (LiveTrackingOrchestrator::new(source, config), provider)
    }

    fn counter() -> (Arc<Mutex<usize>>, impl FnMut(&PositionSample) + Send + 'static) {
        let count = Arc::new(Mutex::new(0));
        let sink = count.clone();
        (count, move |_: &PositionSample| *sink.lock().unwrap() += 1)
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_every_fix_with_heading() {
        let steps = vec![
            Ok(PositionSample::at(1.0, 1.0).with_heading(90.0)),
            Ok(PositionSample::at(1.0, 1.1)),
        ];
        let (tracker, _) = tracker_with(steps, unthrottled());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = tracker.start(TrackingCallbacks::new().on_location(move |s| {
            sink.lock().unwrap().push(s.heading_degrees);
        }));

        tokio::time::sleep(TICK * 3).await;
        assert_eq!(*seen.lock().unwrap(), vec![Some(90.0), None]);
        assert_eq!(tracker.last_sample().unwrap().coordinate, Coordinate::new(1.0, 1.1));
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn deviation_and_reentry_fire_once_per_transition() {
        let steps = fixes(&[(0.0, 0.1), (0.0, 0.2), (1.0, 1.0), (1.0, 1.1), (0.0, 0.3)]);
        let (tracker, _) = tracker_with(steps, unthrottled());
        tracker.arm_route(vec![Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0)], 100.0);

        let (deviations, on_deviation) = counter();
        let (reentries, on_reentry) = counter();
        let handle = tracker.start(
            TrackingCallbacks::new()
                .on_deviation(on_deviation)
                .on_reentry(on_reentry),
        );

        tokio::time::sleep(TICK * 6).await;
        assert_eq!(*deviations.lock().unwrap(), 1);
        assert_eq!(*reentries.lock().unwrap(), 1);
        assert_eq!(tracker.route_state(), RouteMonitorState::OnRoute);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn route_checks_are_throttled_but_latest_fix_is_rechecked() {
        // fixes every 100 ms; recheck at most once per second
        let steps = fixes(&[(0.0, 0.1), (1.0, 1.0), (1.0, 1.0), (0.0, 0.2)]);
        let config = TrackingConfig {
            route_recheck_interval_ms: 1_000,
            ..TrackingConfig::default()
        };
        let (tracker, _) = tracker_with(steps, config);
        tracker.arm_route(vec![Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0)], 100.0);

        let (deviations, on_deviation) = counter();
        let handle = tracker.start(TrackingCallbacks::new().on_deviation(on_deviation));

        // first fix is checked immediately, the off-route ones are held back
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(tracker.route_state(), RouteMonitorState::OnRoute);
        assert_eq!(*deviations.lock().unwrap(), 0);

        // the tick evaluates only the latest pending fix, which is back on route
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(tracker.route_state(), RouteMonitorState::OnRoute);
        assert_eq!(*deviations.lock().unwrap(), 0);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn pending_fix_is_evaluated_on_tick() {
        let steps = fixes(&[(0.0, 0.1), (1.0, 1.0)]);
        let config = TrackingConfig {
            route_recheck_interval_ms: 1_000,
            ..TrackingConfig::default()
        };
        let (tracker, _) = tracker_with(steps, config);
        tracker.arm_route(vec![Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0)], 100.0);

        let (deviations, on_deviation) = counter();
        let handle = tracker.start(TrackingCallbacks::new().on_deviation(on_deviation));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*deviations.lock().unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(*deviations.lock().unwrap(), 1);
        assert_eq!(tracker.route_state(), RouteMonitorState::OffRoute);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn geofence_events_reach_subscribers() {
        let steps = fixes(&[(2.0, 2.0), (0.5, 0.5), (0.5, 0.6), (2.0, 2.0)]);
        let (tracker, _) = tracker_with(steps, unthrottled());
        tracker
            .registry()
            .add(Geofence::zone(
                "park",
                vec![
                    Coordinate::new(0.0, 0.0),
                    Coordinate::new(0.0, 1.0),
                    Coordinate::new(1.0, 1.0),
                    Coordinate::new(1.0, 0.0),
                ],
            ))
            .unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        tracker
            .evaluator()
            .subscribe(move |e| sink.lock().unwrap().push(e.event_type));

        let handle = tracker.start(TrackingCallbacks::new());
        tokio::time::sleep(TICK * 5).await;

        use shared::GeofenceEventType::{Enter, Exit};
        assert_eq!(*events.lock().unwrap(), vec![Enter, Exit]);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn danger_zone_warnings_fire_on_change() {
        let steps = fixes(&[(0.0, 0.0), (0.0, 0.0001), (0.1, 0.1), (0.0, 0.0)]);
        let (tracker, _) = tracker_with(steps, unthrottled());
        tracker.set_danger_zones(vec![DangerZone {
            id: "dz".into(),
            name: "Dark alley".into(),
            center: Coordinate::new(0.0, 0.0),
            radius_meters: 200.0,
            risk_level: RiskLevel::High,
        }]);

        let entered = Arc::new(Mutex::new(Vec::new()));
        let sink = entered.clone();
        let (cleared, on_cleared) = counter();
        let handle = tracker.start(
            TrackingCallbacks::new()
                .on_danger_zone(move |_, zone, _| sink.lock().unwrap().push(zone.id.clone()))
                .on_danger_zone_cleared(on_cleared),
        );

        tokio::time::sleep(TICK * 5).await;
        assert_eq!(*entered.lock().unwrap(), vec!["dz", "dz"]);
        assert_eq!(*cleared.lock().unwrap(), 1);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn errors_do_not_stop_tracking_and_denial_is_reported_once() {
        let steps = vec![
            Err(LocationError::PermissionDenied),
            Err(LocationError::PermissionDenied),
            Err(LocationError::Timeout),
            Ok(PositionSample::at(1.0, 1.0)),
            Err(LocationError::PermissionDenied),
        ];
        let (tracker, _) = tracker_with(steps, unthrottled());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let (locations, on_location) = counter();
        let handle = tracker.start(
            TrackingCallbacks::new()
                .on_location(on_location)
                .on_error(move |e| sink.lock().unwrap().push(e)),
        );

        tokio::time::sleep(TICK * 6).await;
        assert_eq!(
            *errors.lock().unwrap(),
            vec![
                LocationError::PermissionDenied,
                LocationError::Timeout,
                LocationError::PermissionDenied
            ]
        );
        assert_eq!(*locations.lock().unwrap(), 1);
        assert!(handle.is_active());
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_callback_does_not_end_session() {
        let steps = fixes(&[(1.0, 1.0), (1.0, 1.1)]);
        let (tracker, _) = tracker_with(steps, unthrottled());
        let handle = tracker.start(TrackingCallbacks::new().on_location(|_| panic!("consumer bug")));

        tokio::time::sleep(TICK * 3).await;
        assert!(handle.is_active());
        assert_eq!(tracker.last_sample().unwrap().coordinate, Coordinate::new(1.0, 1.1));
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_source_reports_error_and_is_inactive() {
        let source = PositionSource::new(ScriptedProvider::unavailable());
        let tracker = LiveTrackingOrchestrator::new(source, unthrottled());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();

        let handle = tracker.start(TrackingCallbacks::new().on_error(move |e| sink.lock().unwrap().push(e)));
        assert!(!handle.is_active());
        assert!(!tracker.is_running());
        assert_eq!(*errors.lock().unwrap(), vec![LocationError::Unavailable]);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_coordinates_are_dropped() {
        let steps = fixes(&[(95.0, 0.0), (1.0, 1.0)]);
        let (tracker, _) = tracker_with(steps, unthrottled());
        let (locations, on_location) = counter();
        let handle = tracker.start(TrackingCallbacks::new().on_location(on_location));

        tokio::time::sleep(TICK * 3).await;
        assert_eq!(*locations.lock().unwrap(), 1);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_disarms_route_and_stops_delivery() {
        let steps = (0..20).map(|i| Ok(PositionSample::at(0.0, i as f64 * 0.01))).collect();
        let (tracker, provider) = tracker_with(steps, unthrottled());
        tracker.arm_route(vec![Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0)], 100.0);
        let (locations, on_location) = counter();
        let handle = tracker.start(TrackingCallbacks::new().on_location(on_location));

        tokio::time::sleep(TICK * 3 + TICK / 2).await;
        assert_eq!(tracker.route_state(), RouteMonitorState::OnRoute);

        handle.cancel();
        let seen = *locations.lock().unwrap();
        handle.cancel();

        tokio::time::sleep(TICK * 10).await;
        assert_eq!(*locations.lock().unwrap(), seen);
        assert_eq!(tracker.route_state(), RouteMonitorState::Idle);
        assert!(!tracker.is_running());
        assert_eq!(provider.active_watches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_from_inside_callback() {
        let steps = fixes(&[(1.0, 1.0), (1.0, 1.1), (1.0, 1.2)]);
        let (tracker, _) = tracker_with(steps, unthrottled());
        let tracker = Arc::new(tracker);
        let (locations, mut count) = counter();
        let inner = tracker.clone();
        let _handle = tracker.start(TrackingCallbacks::new().on_location(move |s| {
            count(s);
            inner.stop();
        }));

        tokio::time::sleep(TICK * 5).await;
        assert_eq!(*locations.lock().unwrap(), 1);
        assert!(!tracker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_stops_previous_watch() {
        let steps = (0..30).map(|i| Ok(PositionSample::at(1.0, i as f64 * 0.001))).collect();
        let (tracker, provider) = tracker_with(steps, unthrottled());
        tracker.arm_route(vec![Coordinate::new(1.0, 0.0), Coordinate::new(1.0, 1.0)], 50.0);

        let (first_count, first) = counter();
        let first_handle = tracker.start(TrackingCallbacks::new().on_location(first));
        tokio::time::sleep(TICK * 2 + TICK / 2).await;

        let (second_count, second) = counter();
        let second_handle = tracker.start(TrackingCallbacks::new().on_location(second));
        let first_seen = *first_count.lock().unwrap();
        assert!(!first_handle.is_active());
        assert_eq!(provider.opened_watches(), 2);
        assert_eq!(provider.active_watches(), 1);

        tokio::time::sleep(TICK * 5).await;
        assert_eq!(*first_count.lock().unwrap(), first_seen);
        assert!(*second_count.lock().unwrap() >= 4);
        assert_eq!(provider.opened_watches(), 2);
        assert_eq!(provider.active_watches(), 1);

        // the superseded handle must not tear down the new session's route
        drop(first_handle);
        assert_eq!(tracker.route_state(), RouteMonitorState::OnRoute);
        assert!(second_handle.is_active());
        second_handle.cancel();
        assert_eq!(provider.active_watches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn feed_end_finishes_session() {
        let provider = ScriptedProvider::new(fixes(&[(1.0, 1.0)]), TICK).closing_when_done();
        let tracker = LiveTrackingOrchestrator::new(PositionSource::new(provider), unthrottled());
        let handle = tracker.start(TrackingCallbacks::new());
        handle.finished().await;
        assert!(!tracker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn route_stays_armed_when_feed_ends() {
        let provider = ScriptedProvider::new(fixes(&[(0.0, 0.5)]), TICK).closing_when_done();
        let tracker = LiveTrackingOrchestrator::new(PositionSource::new(provider.clone()), unthrottled());
        tracker.arm_route(vec![Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0)], 100.0);

        let handle = tracker.start(TrackingCallbacks::new());
        handle.finished().await;

        assert_eq!(tracker.route_state(), RouteMonitorState::OnRoute);
        assert_eq!(provider.active_watches(), 0);

        // an explicit stop afterwards does not tear it down either
        tracker.stop();
        assert_eq!(tracker.route_state(), RouteMonitorState::OnRoute);
    }

    #[tokio::test(start_paused = true)]
    async fn denied_permission_is_reported_without_opening_a_watch() {
        let provider = ScriptedProvider::new(fixes(&[(1.0, 1.0)]), TICK)
            .with_permission(crate::source::PermissionState::Denied);
        let tracker = LiveTrackingOrchestrator::new(PositionSource::new(provider.clone()), unthrottled());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();

        let handle = tracker.start(TrackingCallbacks::new().on_error(move |e| sink.lock().unwrap().push(e)));
        assert!(!handle.is_active());
        assert_eq!(*errors.lock().unwrap(), vec![LocationError::PermissionDenied]);
        assert_eq!(provider.opened_watches(), 0);
    }
}
