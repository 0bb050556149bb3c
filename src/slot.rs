//! Defines `Slot`, a single record of the event ring.
//!
//! A slot is a passive cell: the event parameter is written into it in
//! place by the producer that reserved it and read from it in place by
//! the worker that claimed it; no payload ever moves between buffers.
//! Alongside the parameter the slot parks the resolver half of the
//! event's answer signal, when one was requested at reservation time.
//!
//! # Safety
//!
//! The slot itself provides no synchronisation. All accessors are
//! `unsafe` and rely on the ring's reservation discipline:
//!
//! 1. **Exclusive phases**: between a reserve and the matching commit the
//!    reserving producer is the slot's only user; between a dispatch
//!    claim and the matching release the claiming worker is. The ring's
//!    `reserved` flags, flipped inside its index critical section,
//!    delimit these phases.
//! 2. **Publication**: a commit and the subsequent dispatch claim pass
//!    through the same critical section, so the producer's writes
//!    happen-before the worker's reads.

use std::cell::UnsafeCell;

use crate::signal::AnswerSignal;

pub(crate) struct Slot<P, A> {
    param: UnsafeCell<Option<P>>,
    signal: UnsafeCell<Option<AnswerSignal<A>>>,
}

// SAFETY: coordination is external, per the module docs. As long as `P`
// can be sent and shared and `A` can be sent, the slot may be shared
// between threads.
unsafe impl<P: Send + Sync, A: Send> Send for Slot<P, A> {}
unsafe impl<P: Send + Sync, A: Send> Sync for Slot<P, A> {}

impl<P, A> Slot<P, A> {
    pub(crate) fn new() -> Self {
        Self {
            param: UnsafeCell::new(None),
            signal: UnsafeCell::new(None),
        }
    }

    /// Writes the event parameter in place.
    ///
    /// # Safety
    /// The caller must hold the produce-phase reservation for this slot.
    pub(crate) unsafe fn fill(&self, param: P) {
        *self.param.get() = Some(param);
    }

    /// Reads the event parameter in place. `None` for an abandoned
    /// reservation that was committed empty.
    ///
    /// # Safety
    /// The caller must hold the dispatch-phase reservation for this slot.
    pub(crate) unsafe fn param(&self) -> Option<&P> {
        (*self.param.get()).as_ref()
    }

    /// Takes the parameter out, leaving the slot empty for reuse.
    ///
    /// # Safety
    /// The caller must hold the dispatch-phase reservation, or be the
    /// teardown sweep running after all workers have been joined.
    pub(crate) unsafe fn clear(&self) -> Option<P> {
        (*self.param.get()).take()
    }

    /// Parks (or clears) the answer-signal half carried by this slot.
    ///
    /// # Safety
    /// The caller must hold the produce-phase reservation for this slot.
    pub(crate) unsafe fn park_signal(&self, signal: Option<AnswerSignal<A>>) {
        *self.signal.get() = signal;
    }

    /// Takes the parked answer signal, if any.
    ///
    /// # Safety
    /// The caller must hold the dispatch-phase reservation, or be the
    /// teardown sweep running after all workers have been joined.
    pub(crate) unsafe fn take_signal(&self) -> Option<AnswerSignal<A>> {
        (*self.signal.get()).take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::answer_signal;

    #[test]
    fn test_slot_starts_empty() {
        let slot = Slot::<u32, u32>::new();
        unsafe {
            assert!(slot.param().is_none());
            assert!(slot.take_signal().is_none());
        }
    }

    #[test]
    fn test_fill_read_clear() {
        let slot = Slot::<String, ()>::new();
        unsafe {
            slot.fill("hello".to_string());
            assert_eq!(slot.param().map(String::as_str), Some("hello"));

            // A second fill overwrites (slot reuse after a full cycle).
            slot.fill("world".to_string());
            assert_eq!(slot.param().map(String::as_str), Some("world"));

            assert_eq!(slot.clear().as_deref(), Some("world"));
            assert!(slot.param().is_none());
        }
    }

    #[tokio::test]
    async fn test_parked_signal_round_trip() {
        let slot = Slot::<u32, u32>::new();
        let (signal, ticket) = answer_signal::<u32>();

        unsafe {
            slot.park_signal(Some(signal));
            let taken = slot.take_signal().expect("signal was parked");
            taken.resolve(Ok(9));
            assert!(slot.take_signal().is_none());
        }
        assert_eq!(ticket.wait().await.unwrap(), 9);
    }
}
