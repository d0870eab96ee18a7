use std::{fmt, sync::Mutex};

use tokio::sync::mpsc;

use super::FeedItem;

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Receiving half of a watch together with the hook that clears the
/// underlying device watch. Dropping the feed clears the watch.
pub struct PositionFeed {
    items: mpsc::Receiver<FeedItem>,
    release: WatchRelease,
}

impl PositionFeed {
    /// A feed whose watch needs no clearing beyond closing the channel.
    pub fn new(items: mpsc::Receiver<FeedItem>) -> Self {
        Self {
            items,
            release: WatchRelease::default(),
        }
    }

    /// `on_release` runs exactly once, when the watch is released or the
    /// feed dropped, whichever comes first.
    pub fn with_release(items: mpsc::Receiver<FeedItem>, on_release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            items,
            release: WatchRelease::new(on_release),
        }
    }

    pub async fn recv(&mut self) -> Option<FeedItem> {
        self.items.recv().await
    }

    /// Splits the feed so the watch can be cleared from outside the task
    /// that receives from it.
    pub fn into_parts(self) -> (mpsc::Receiver<FeedItem>, WatchRelease) {
        let PositionFeed { items, release } = self;
        (items, release)
    }
}

impl fmt::Debug for PositionFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PositionFeed")
            .field("released", &self.release.is_released())
            .finish()
    }
}

/// Clears a device watch at most once, on [`release`](Self::release) or on
/// drop.
#[derive(Default)]
pub struct WatchRelease {
    hook: Mutex<Option<ReleaseHook>>,
}

impl WatchRelease {
    fn new(on_release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            hook: Mutex::new(Some(Box::new(on_release))),
        }
    }

    /// Returns true for the call that actually cleared the watch.
    pub fn release(&self) -> bool {
        let hook = self.hook.lock().unwrap_or_else(|e| e.into_inner()).take();
        match hook {
            Some(hook) => {
                hook();
                true
            }
            None => false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.hook.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}

impl fmt::Debug for WatchRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchRelease")
            .field("released", &self.is_released())
            .finish()
    }
}

impl Drop for WatchRelease {
    fn drop(&mut self) {
        self.release();
    }
}
