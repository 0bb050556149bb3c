//! One-shot answer signals connecting a consumer to a waiting producer.
//!
//! When an event is reserved with an answer expected, an
//! [`answer_signal`] pair is created: the [`AnswerSignal`] half travels
//! with the slot and is resolved exactly once by the dispatcher (with the
//! consumer's answer, or with the fault it reported); the
//! [`AnswerTicket`] half stays with the producer, which awaits it after
//! committing the event.
//!
//! The outcome cell is owned jointly by the two halves (an `Arc`), not by
//! the ring slot, so slot reuse after release can never invalidate a
//! pending answer: the producer's storage outlives the slot's interest in
//! it. A signal dropped unresolved (a teardown sweep discarding it, or a
//! dispatch path that never had an answerfull consumer) resolves itself
//! to [`EventError::ShutdownObserved`] so the waiting producer is never
//! stranded.

use std::cell::UnsafeCell;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::error::EventError;

/// What an answer signal resolves to.
pub(crate) type AnswerOutcome<A> = Result<A, EventError>;

struct SignalState<A> {
    ready: AtomicBool,
    outcome: UnsafeCell<Option<AnswerOutcome<A>>>,
    notify: Notify,
}

// SAFETY: the outcome cell is written once, by the sole `AnswerSignal`
// holder, before `ready` is published with Release ordering; it is read
// once, by the sole `AnswerTicket` holder, after observing `ready` with
// Acquire ordering. The two accesses can therefore never overlap.
unsafe impl<A: Send> Send for SignalState<A> {}
unsafe impl<A: Send> Sync for SignalState<A> {}

/// Resolver half of a one-shot answer signal. Not cloneable; resolving
/// consumes it, so the outcome is written at most once.
pub(crate) struct AnswerSignal<A>(Arc<SignalState<A>>);

/// Awaiting half of a one-shot answer signal, kept by the producer.
pub(crate) struct AnswerTicket<A>(Arc<SignalState<A>>);

/// Creates a connected resolver/awaiter pair.
pub(crate) fn answer_signal<A>() -> (AnswerSignal<A>, AnswerTicket<A>) {
    let state = Arc::new(SignalState {
        ready: AtomicBool::new(false),
        outcome: UnsafeCell::new(None),
        notify: Notify::new(),
    });
    (AnswerSignal(state.clone()), AnswerTicket(state))
}

impl<A> AnswerSignal<A> {
    /// Resolves the signal, waking the producer awaiting the ticket.
    pub(crate) fn resolve(self, outcome: AnswerOutcome<A>) {
        // SAFETY: `self` is the only resolver and `ready` is still false,
        // so no reader can be looking at the cell yet.
        unsafe { *self.0.outcome.get() = Some(outcome) };
        self.0.ready.store(true, Ordering::Release);
        self.0.notify.notify_waiters();
    }
}

impl<A> Drop for AnswerSignal<A> {
    fn drop(&mut self) {
        // A signal discarded without resolution (teardown sweep, or an
        // event that flowed through a dispatch path with no answerfull
        // consumer) must still unblock its producer.
        if !self.0.ready.load(Ordering::Acquire) {
            // SAFETY: as in `resolve`: sole resolver, readers are held
            // off until `ready` is published below.
            unsafe { *self.0.outcome.get() = Some(Err(EventError::ShutdownObserved)) };
            self.0.ready.store(true, Ordering::Release);
            self.0.notify.notify_waiters();
        }
    }
}

impl<A> AnswerTicket<A> {
    /// Awaits the resolution and takes the outcome.
    pub(crate) async fn wait(self) -> AnswerOutcome<A> {
        loop {
            let mut resolved = pin!(self.0.notify.notified());
            resolved.as_mut().enable();
            if self.0.ready.load(Ordering::Acquire) {
                break;
            }
            resolved.await;
        }
        // SAFETY: `ready` was observed with Acquire ordering and `self`
        // is the only reader, so the write above happens-before this take.
        unsafe { (*self.0.outcome.get()).take() }.expect("answer signal resolves exactly once")
    }
}
