use std::{
    cell::RefCell,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use tokio_util::sync::CancellationToken;

thread_local! {
    /// Gates whose callbacks are running on this thread right now.
    static DELIVERING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Serializes callback delivery against cancellation.
///
/// Once [`cancel`](Self::cancel) returns, no delivery is in progress and
/// none will start. Cancelling from inside a delivery on the same gate
/// does not wait for itself; the delivery loop stops after it returns.
#[derive(Debug, Default)]
pub(crate) struct DeliveryGate {
    token: CancellationToken,
    claimed: AtomicBool,
    in_flight: Mutex<()>,
}

impl DeliveryGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Runs `deliver` unless the gate is cancelled. Returns `None` when
    /// cancelled.
    pub(crate) fn deliver<R>(&self, deliver: impl FnOnce() -> R) -> Option<R> {
        let _in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_cancelled() {
            return None;
        }
        let _marker = DeliveringMarker::enter(self.key());
        Some(deliver())
    }

    /// Returns true for the call that actually cancelled the gate.
    pub(crate) fn cancel(&self) -> bool {
        let first = !self.claimed.swap(true, Ordering::SeqCst);
        self.token.cancel();
        if !self.is_delivering_here() {
            drop(self.in_flight.lock().unwrap_or_else(|e| e.into_inner()));
        }
        first
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) async fn cancelled(&self) {
        self.token.cancelled().await
    }

    fn key(&self) -> usize {
        self as *const Self as usize
    }

    fn is_delivering_here(&self) -> bool {
        let key = self.key();
        DELIVERING.with(|keys| keys.borrow().contains(&key))
    }
}

struct DeliveringMarker(usize);

impl DeliveringMarker {
    fn enter(key: usize) -> Self {
        DELIVERING.with(|keys| keys.borrow_mut().push(key));
        Self(key)
    }
}

impl Drop for DeliveringMarker {
    fn drop(&mut self) {
        DELIVERING.with(|keys| {
            let mut keys = keys.borrow_mut();
            if let Some(pos) = keys.iter().rposition(|k| *k == self.0) {
                keys.remove(pos);
            }
        });
    }
}
