use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{FeedItem, PermissionState, PositionFeed, PositionOptions, PositionProvider, FEED_CAPACITY};
use crate::error::LocationError;

/// Provider that plays back a fixed list of fixes and failures, one every
/// `interval`, stamping each fix with the time it is emitted.
///
/// Every watch replays the script from the start. Once the script is
/// exhausted the watch stays open without new fixes, like a device that
/// stopped reporting, unless [`closing_when_done`](Self::closing_when_done)
/// was set.
#[derive(Clone)]
pub struct ScriptedProvider {
    inner: Arc<Script>,
}

#[derive(Clone)]
struct Settings {
    steps: Vec<FeedItem>,
    interval: Duration,
    supported: bool,
    permission: PermissionState,
    close_when_done: bool,
}

struct Script {
    settings: Settings,
    active: AtomicUsize,
    opened: AtomicUsize,
    emitted: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<FeedItem>, interval: Duration) -> Self {
        Self::build(Settings {
            steps,
            interval,
            supported: true,
            permission: PermissionState::Granted,
            close_when_done: false,
        })
    }

    /// A device without location capability: every `open` fails.
    pub fn unavailable() -> Self {
        Self::new(Vec::new(), Duration::ZERO).reconfigure(|settings| settings.supported = false)
    }

    pub fn closing_when_done(self) -> Self {
        self.reconfigure(|settings| settings.close_when_done = true)
    }

    pub fn with_permission(self, permission: PermissionState) -> Self {
        self.reconfigure(|settings| settings.permission = permission)
    }

    fn reconfigure(self, change: impl FnOnce(&mut Settings)) -> Self {
        let mut settings = self.inner.settings.clone();
        change(&mut settings);
        Self::build(settings)
    }

    fn build(settings: Settings) -> Self {
        Self {
            inner: Arc::new(Script {
                settings,
                active: AtomicUsize::new(0),
                opened: AtomicUsize::new(0),
                emitted: AtomicUsize::new(0),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.settings.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.settings.steps.is_empty()
    }

    /// Watches opened and not yet released.
    pub fn active_watches(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn opened_watches(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    /// Items handed to consumers across all watches.
    pub fn emitted(&self) -> usize {
        self.inner.emitted.load(Ordering::SeqCst)
    }
}

impl PositionProvider for ScriptedProvider {
    fn open(&self, _options: &PositionOptions) -> Result<PositionFeed, LocationError> {
        if !self.inner.settings.supported {
            return Err(LocationError::Unavailable);
        }

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let script = self.inner.clone();
        script.opened.fetch_add(1, Ordering::SeqCst);
        script.active.fetch_add(1, Ordering::SeqCst);
        let stop = CancellationToken::new();

        let producer_stop = stop.clone();
        let producer = script.clone();
        tokio::spawn(async move {
            let settings = &producer.settings;
            for step in settings.steps.iter().cloned() {
                tokio::select! {
                    _ = producer_stop.cancelled() => return,
                    _ = tx.closed() => return,
                    _ = tokio::time::sleep(settings.interval) => {}
                }
                let item = step.map(|mut sample| {
                    sample.timestamp = Utc::now();
                    sample
                });
                tokio::select! {
                    _ = producer_stop.cancelled() => return,
                    sent = tx.send(item) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
                producer.emitted.fetch_add(1, Ordering::SeqCst);
            }
            if !settings.close_when_done {
                tokio::select! {
                    _ = producer_stop.cancelled() => {}
                    _ = tx.closed() => {}
                }
            }
        });

        Ok(PositionFeed::with_release(rx, move || {
            stop.cancel();
            script.active.fetch_sub(1, Ordering::SeqCst);
        }))
    }

    fn is_supported(&self) -> bool {
        self.inner.settings.supported
    }

    fn permission_state(&self) -> PermissionState {
        self.inner.settings.permission
    }
}
