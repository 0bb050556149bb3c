//! Park gates for the ring's full and empty conditions.
//!
//! A [`Gate`] replaces the closed-mutex trick of classic blocking queues:
//! the "is anyone parked here" state is an explicit atomic flag, and the
//! parking itself is a `tokio::sync::Notify` registration. A parking task
//! enables its `Notified` future *before* re-checking the condition it is
//! about to park on, so an `open` racing with the park can never be lost.
//! False wakeups are allowed; every parked operation retries from the top.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// A wait gate with an explicit engaged flag.
///
/// `engage` marks that some task is (about to be) parked on the gate;
/// `open` wakes all parked tasks iff the gate was engaged. The flag is
/// only meaningful under the caller's own serialisation (the ring flips
/// it inside its index critical section); `is_engaged` is a stale-but-safe
/// observation for diagnostics.
pub(crate) struct Gate {
    engaged: CachePadded<AtomicBool>,
    notify: Notify,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self {
            engaged: CachePadded::new(AtomicBool::new(false)),
            notify: Notify::new(),
        }
    }

    /// Returns a future to park on. Callers must `enable` it before
    /// re-checking the gate's condition, then await it after `engage`.
    pub(crate) fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Marks the gate as having (at least) one parked waiter.
    pub(crate) fn engage(&self) {
        self.engaged.store(true, Ordering::Release);
    }

    /// Wakes all parked waiters iff the gate was engaged.
    ///
    /// All waiters are woken; losers of the retry race re-engage the
    /// gate and park again.
    pub(crate) fn open(&self) {
        if self.engaged.swap(false, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    /// Wakes all parked waiters regardless of the engaged flag.
    /// Teardown only.
    pub(crate) fn force_open(&self) {
        self.engaged.store(false, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Whether some task was parked here at the time of the load.
    pub(crate) fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::Acquire)
    }
}
