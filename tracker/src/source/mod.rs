//! Position acquisition on top of a platform provider.
//!
//! A [`PositionProvider`] is the device primitive: it opens a continuous
//! watch and pushes fixes and failures into a bounded channel, in the order
//! the device produces them. [`PositionSource`] builds the single-shot,
//! callback and best-effort acquisition modes on top of it.
//!
//! Watches spawn Tokio tasks, so these APIs must be used from within a
//! Tokio runtime.

mod feed;
mod gpx_replay;
mod scripted;

use std::{sync::Arc, time::Duration};

use shared::PositionSample;
use tokio::{task::JoinHandle, time::Instant};

use crate::{config::BestEffortConfig, delivery::DeliveryGate, error::LocationError};

pub use feed::{PositionFeed, WatchRelease};
pub use gpx_replay::{route_from_gpx, GpxReplayProvider};
pub use scripted::ScriptedProvider;

/// Buffered fixes per watch before the provider waits on the consumer.
pub const FEED_CAPACITY: usize = 32;

pub type FeedItem = Result<PositionSample, LocationError>;

/// Location permission as the platform reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    /// Not decided yet; opening a watch asks the user.
    Prompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    /// Longest wait for a fix before `Timeout`.
    pub timeout: Duration,
    /// Oldest cached fix the platform may hand back; zero demands a fresh one.
    pub maximum_age: Duration,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_millis(15_000),
            maximum_age: Duration::ZERO,
        }
    }
}

/// Device location primitive.
///
/// Implementations report a missing capability by failing `open` with
/// [`LocationError::Unavailable`]; permission and timeout failures travel
/// through the feed so the watch survives them. The device watch must be
/// cleared when the feed's release hook runs.
pub trait PositionProvider: Send + Sync {
    fn open(&self, options: &PositionOptions) -> Result<PositionFeed, LocationError>;

    /// Whether the device can produce fixes at all.
    fn is_supported(&self) -> bool {
        true
    }

    /// Providers without a permission model report `Granted`.
    fn permission_state(&self) -> PermissionState {
        PermissionState::Granted
    }
}

#[derive(Clone)]
pub struct PositionSource {
    provider: Arc<dyn PositionProvider>,
}

impl PositionSource {
    pub fn new(provider: impl PositionProvider + 'static) -> Self {
        Self {
            provider: Arc::new(provider),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.provider.is_supported()
    }

    pub fn permission_state(&self) -> PermissionState {
        self.provider.permission_state()
    }

    /// Raw channel form of a watch, for callers running their own loop.
    /// Fails without opening anything when the device is unsupported or
    /// permission was denied.
    pub fn feed(&self, options: &PositionOptions) -> Result<PositionFeed, LocationError> {
        if !self.provider.is_supported() {
            return Err(LocationError::Unavailable);
        }
        if self.provider.permission_state() == PermissionState::Denied {
            return Err(LocationError::PermissionDenied);
        }
        self.provider.open(options)
    }

    /// Single acquisition bounded by `options.timeout`.
    pub async fn get_once(&self, options: &PositionOptions) -> Result<PositionSample, LocationError> {
        let mut feed = self.feed(options)?;
        match tokio::time::timeout(options.timeout, feed.recv()).await {
            Ok(Some(item)) => item,
            Ok(None) => Err(LocationError::Unavailable),
            Err(_) => Err(LocationError::Timeout),
        }
    }

    /// Continuous acquisition. `on_update` runs for every fix and `on_error`
    /// for every failure; errors never stop the watch. If the provider
    /// cannot open at all, `on_error` runs once and the returned handle is
    /// already inactive.
    ///
    /// Callbacks run on a runtime worker thread, possibly not the caller's.
    #[must_use = "dropping the handle stops the watch"]
    pub fn watch<U, E>(&self, options: &PositionOptions, mut on_update: U, mut on_error: E) -> WatchHandle
    where
        U: FnMut(PositionSample) + Send + 'static,
        E: FnMut(LocationError) + Send + 'static,
    {
        let gate = Arc::new(DeliveryGate::new());
        let (mut feed, release) = match self.feed(options) {
            Ok(feed) => feed.into_parts(),
            Err(err) => {
                tracing::warn!("position watch could not start: {err}");
                on_error(err);
                gate.cancel();
                return WatchHandle {
                    gate,
                    release: Arc::default(),
                    task: None,
                };
            }
        };
        let release = Arc::new(release);

        let task_gate = gate.clone();
        let task_release = release.clone();
        let task = tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    biased;
                    _ = task_gate.cancelled() => break,
                    item = feed.recv() => item,
                };
                let Some(item) = item else {
                    tracing::debug!("position provider closed the watch");
                    break;
                };
                let delivered = task_gate.deliver(|| match item {
                    Ok(sample) => on_update(sample),
                    Err(err) => on_error(err),
                });
                if delivered.is_none() {
                    break;
                }
            }
            task_release.release();
        });

        WatchHandle {
            gate,
            release,
            task: Some(task),
        }
    }

    /// Samples until a fix is at least as accurate as
    /// `desired_accuracy_meters` or `max_retries` fixes were seen, keeping
    /// the most accurate one. When `max_wait` runs out the best fix so far
    /// is returned; only if there is none does this fail with `Timeout`.
    pub async fn best_effort_accurate(
        &self,
        max_wait: Duration,
        desired_accuracy_meters: f64,
        max_retries: u32,
    ) -> Result<PositionSample, LocationError> {
        let options = PositionOptions {
            high_accuracy: true,
            timeout: max_wait,
            maximum_age: Duration::ZERO,
        };
        let mut feed = self.feed(&options)?;
        let deadline = Instant::now() + max_wait;

        let mut best: Option<PositionSample> = None;
        let mut last_error = None;
        let mut attempts = 0;

        while attempts < max_retries {
            let item = match tokio::time::timeout_at(deadline, feed.recv()).await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(_) => {
                    tracing::debug!("best-effort fix: deadline reached after {attempts} attempt(s)");
                    return best.ok_or(LocationError::Timeout);
                }
            };
            attempts += 1;

            match item {
                Ok(sample) => {
                    tracing::debug!(
                        "best-effort fix attempt {attempts}: accuracy {:?} m",
                        sample.accuracy_meters
                    );
                    let good_enough = sample
                        .accuracy_meters
                        .is_some_and(|accuracy| accuracy <= desired_accuracy_meters);
                    if is_more_accurate(&sample, best.as_ref()) {
                        best = Some(sample);
                    }
                    if good_enough {
                        break;
                    }
                }
                Err(LocationError::PermissionDenied) => return Err(LocationError::PermissionDenied),
                Err(err) => {
                    tracing::warn!("best-effort fix attempt {attempts} failed: {err}");
                    last_error = Some(err);
                }
            }
        }

        best.ok_or(last_error.unwrap_or(LocationError::Timeout))
    }

    pub async fn best_effort_with(&self, policy: &BestEffortConfig) -> Result<PositionSample, LocationError> {
        self.best_effort_accurate(policy.max_wait(), policy.desired_accuracy_meters, policy.max_retries)
            .await
    }
}

/// A fix without an accuracy estimate ranks below any fix with one; among
/// equals the newer fix wins.
fn is_more_accurate(candidate: &PositionSample, best: Option<&PositionSample>) -> bool {
    let Some(best) = best else {
        return true;
    };
    match (candidate.accuracy_meters, best.accuracy_meters) {
        (Some(c), Some(b)) => c <= b,
        (Some(_), None) => true,
        (None, Some(_)) => false,
        (None, None) => true,
    }
}

/// Handle to a running watch. Cancelling is idempotent, and once
/// [`cancel`](Self::cancel) returns no callback is running or will run and
/// the device watch is cleared. Dropping the handle cancels the watch.
#[derive(Debug)]
pub struct WatchHandle {
    gate: Arc<DeliveryGate>,
    release: Arc<WatchRelease>,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub fn cancel(&self) {
        if self.gate.cancel() {
            tracing::debug!("position watch cancelled");
        }
        self.release.release();
    }

    pub fn is_active(&self) -> bool {
        !self.gate.is_cancelled() && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Waits for the watch task to wind down, e.g. after the provider
    /// closed the feed.
    pub async fn finished(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::error!("position watch task failed: {err}");
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
