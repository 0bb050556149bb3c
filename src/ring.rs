//! The bounded reservation ring at the core of the event link.
//!
//! 256 slots, addressed by `u8` indices whose wrapping arithmetic *is*
//! the modulus. Slot allocation is decoupled from slot readiness by a
//! four-phase protocol with two index pairs:
//!
//! ```text
//!   reserved_head ≤ head ≤ tail ≤ reserved_tail      (walking the ring)
//!
//!   producer:  reserve_for_reporting ── fill in place ──► commit
//!   worker:    reserve_for_dispatching ── read in place ──► release
//! ```
//!
//! - `reserve_for_reporting` hands out `reserved_tail` and marks the slot
//!   reserved; `commit` clears the mark and advances `tail` by one step
//!   when the committed slot *is* the tail. An out-of-order commit leaves
//!   `tail` alone; the stranded region merges when the earlier commit
//!   arrives (or is collected lazily by a later dispatch claim).
//! - `reserve_for_dispatching` hands out `head`; `release` clears the
//!   mark and advances `reserved_head` symmetrically.
//!
//! At most 255 slots are ever outstanding: a producer finding
//! `reserved_tail + 1 == reserved_head` parks on the full [`Gate`], a
//! worker finding `head == tail` parks on the empty one. All index
//! mutations happen inside the [`Fence`] critical section, which is also
//! what publishes a producer's payload write to the claiming worker.

use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

use crate::error::EventError;
use crate::fence::{Fence, Guard};
use crate::gate::Gate;
use crate::signal::AnswerSignal;
use crate::slot::Slot;

/// Number of slots in the ring. Index arithmetic is mod 256 by virtue of
/// the `u8` index width; at most `CAPACITY - 1` slots can be outstanding.
pub const CAPACITY: usize = 256;

/// A consistent observation of the ring's four indices.
///
/// Produced under the index lock, so the invariant
/// `reserved_head ≤ head ≤ tail ≤ reserved_tail` always holds within one
/// snapshot. Used by `stop_when_empty`, the debug tracer, and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingSnapshot {
    /// Next slot to be recycled for producers.
    pub reserved_head: u8,
    /// Next slot a worker may claim.
    pub head: u8,
    /// One past the highest committed slot.
    pub tail: u8,
    /// Next slot to be handed to a producer.
    pub reserved_tail: u8,
    /// Whether any slot is currently in a reserved phase.
    pub has_reservations: bool,
}

impl RingSnapshot {
    /// Committed events awaiting dispatch.
    pub fn committed_len(&self) -> u8 {
        self.tail.wrapping_sub(self.head)
    }

    /// Outstanding slots in any phase (reserved or committed).
    pub fn reserved_len(&self) -> u8 {
        self.reserved_tail.wrapping_sub(self.reserved_head)
    }

    /// Whether the ring is fully drained: all four indices coincide and
    /// no slot is mid-phase.
    pub fn is_idle(&self) -> bool {
        self.reserved_len() == 0
            && self.committed_len() == 0
            && self.reserved_head == self.head
            && !self.has_reservations
    }
}

/// The index block, only ever touched under the ring's fence.
struct Indices {
    reserved_head: u8,
    head: u8,
    tail: u8,
    reserved_tail: u8,
    reserved: [bool; CAPACITY],
}

impl Indices {
    fn new() -> Self {
        Self {
            reserved_head: 0,
            head: 0,
            tail: 0,
            reserved_tail: 0,
            reserved: [false; CAPACITY],
        }
    }

    /// Claims the next slot for a producer, or `None` if the ring is full.
    fn claim_for_produce(&mut self) -> Option<u8> {
        if self.reserved_tail.wrapping_add(1) == self.reserved_head {
            if self.reserved[self.reserved_head as usize] || self.reserved_head == self.head {
                // Full: the slot ahead has not been released yet.
                return None;
            }
            // The slot ahead was released out of order and never
            // collected; collect it now, one step per claim.
            self.reserved_head = self.reserved_head.wrapping_add(1);
        }
        let id = self.reserved_tail;
        self.reserved_tail = self.reserved_tail.wrapping_add(1);
        self.reserved[id as usize] = true;
        Some(id)
    }

    /// Claims the next committed slot for a worker, or `None` if empty.
    fn claim_for_dispatch(&mut self) -> Option<u8> {
        if self.head == self.tail {
            if self.reserved[self.tail as usize] || self.tail == self.reserved_tail {
                // Empty: the slot ahead has not been committed yet.
                return None;
            }
            // The slot ahead was committed out of order and never
            // collected; collect it now, one step per claim.
            self.tail = self.tail.wrapping_add(1);
        }
        let id = self.head;
        self.head = self.head.wrapping_add(1);
        self.reserved[id as usize] = true;
        Some(id)
    }

    /// Publishes a filled slot. Returns true when `tail` advanced, i.e.
    /// when parked workers should be woken.
    fn commit(&mut self, id: u8) -> bool {
        self.reserved[id as usize] = false;
        if id == self.tail {
            self.tail = self.tail.wrapping_add(1);
            true
        } else {
            false
        }
    }

    /// Recycles a consumed slot. Returns true when `reserved_head`
    /// advanced, i.e. when parked producers should be woken.
    fn release(&mut self, id: u8) -> bool {
        self.reserved[id as usize] = false;
        if id == self.reserved_head {
            self.reserved_head = self.reserved_head.wrapping_add(1);
            true
        } else {
            false
        }
    }

    fn snapshot(&self) -> RingSnapshot {
        RingSnapshot {
            reserved_head: self.reserved_head,
            head: self.head,
            tail: self.tail,
            reserved_tail: self.reserved_tail,
            has_reservations: self.reserved.iter().any(|r| *r),
        }
    }
}

pub(crate) struct Ring<P, A> {
    slots: Box<[Slot<P, A>]>,
    state: Fence<Indices>,
    full_gate: Gate,
    empty_gate: Gate,
    closed: AtomicBool,
    closed_notify: Notify,
}

impl<P, A> Ring<P, A> {
    pub(crate) fn new() -> Self {
        let slots = (0..CAPACITY)
            .map(|_| Slot::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            state: Fence::new(Indices::new()),
            full_gate: Gate::new(),
            empty_gate: Gate::new(),
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
        }
    }

    /// Reserves a slot for a producer, parking while the ring is full.
    ///
    /// The answer signal, if any, is parked on the slot for the
    /// dispatching worker. On success the caller owns the slot's produce
    /// phase until it commits.
    pub(crate) async fn reserve_for_reporting(
        &self,
        mut signal: Option<AnswerSignal<A>>,
    ) -> Result<u8, EventError> {
        loop {
            let mut parked = pin!(self.full_gate.notified());
            parked.as_mut().enable();
            {
                let mut state = self.state.acquire().await;
                if self.closed.load(Ordering::Acquire) {
                    return Err(EventError::ShutdownObserved);
                }
                if let Some(id) = state.claim_for_produce() {
                    // SAFETY: the reserved flag just set grants this
                    // producer exclusive slot access until commit.
                    unsafe { self.slots[id as usize].park_signal(signal.take()) };
                    return Ok(id);
                }
                self.full_gate.engage();
            }
            parked.await;
        }
    }

    /// Publishes a reserved slot for dispatch.
    pub(crate) async fn commit(&self, id: u8) {
        let state = self.state.acquire().await;
        self.finish_commit(state, id);
    }

    /// `commit` for synchronous contexts (see `Fence::acquire_blocking`).
    pub(crate) fn commit_blocking(&self, id: u8) {
        let state = self.state.acquire_blocking();
        self.finish_commit(state, id);
    }

    fn finish_commit(&self, mut state: Guard<'_, Indices>, id: u8) {
        if self.closed.load(Ordering::Acquire) {
            // The teardown sweep owns the indices now.
            return;
        }
        if state.commit(id) {
            self.empty_gate.open();
        }
    }

    /// Claims the next committed slot, parking while the ring is empty.
    ///
    /// On success the caller owns the slot's dispatch phase until it
    /// releases.
    pub(crate) async fn reserve_for_dispatching(&self) -> Result<u8, EventError> {
        loop {
            let mut parked = pin!(self.empty_gate.notified());
            parked.as_mut().enable();
            {
                let mut state = self.state.acquire().await;
                if self.closed.load(Ordering::Acquire) {
                    return Err(EventError::ShutdownObserved);
                }
                if let Some(id) = state.claim_for_dispatch() {
                    return Ok(id);
                }
                self.empty_gate.engage();
            }
            parked.await;
        }
    }

    /// Recycles a dispatched slot for new reservations.
    pub(crate) async fn release(&self, id: u8) {
        // SAFETY: the dispatch-phase reservation is still held; drop the
        // consumed payload and any signal left by a dispatch path that
        // had no use for it (its drop unblocks the producer).
        unsafe {
            self.slots[id as usize].clear();
            self.slots[id as usize].take_signal();
        }
        let mut state = self.state.acquire().await;
        if state.release(id) {
            self.full_gate.open();
        }
    }

    /// Reads the claimed slot's parameter in place.
    ///
    /// # Safety
    /// The caller must hold the dispatch-phase reservation for `id`.
    pub(crate) unsafe fn param(&self, id: u8) -> Option<&P> {
        self.slots[id as usize].param()
    }

    /// Writes the reserved slot's parameter in place.
    ///
    /// # Safety
    /// The caller must hold the produce-phase reservation for `id`.
    pub(crate) unsafe fn fill(&self, id: u8, param: P) {
        self.slots[id as usize].fill(param);
    }

    /// Takes the answer signal parked on a claimed slot.
    ///
    /// # Safety
    /// The caller must hold the dispatch-phase reservation for `id`.
    pub(crate) unsafe fn take_signal(&self, id: u8) -> Option<AnswerSignal<A>> {
        self.slots[id as usize].take_signal()
    }

    pub(crate) async fn snapshot(&self) -> RingSnapshot {
        self.state.acquire().await.snapshot()
    }

    /// Latches the ring closed and wakes everything parked on it:
    /// producers waiting on full, workers waiting on empty, and producers
    /// awaiting an answer. Idempotent.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.full_gate.force_open();
        self.empty_gate.force_open();
        self.closed_notify.notify_waiters();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Completes when the ring has been closed.
    pub(crate) async fn closed(&self) {
        loop {
            let mut latched = pin!(self.closed_notify.notified());
            latched.as_mut().enable();
            if self.is_closed() {
                return;
            }
            latched.await;
        }
    }

    /// Resets the ring to the canonical empty configuration after a
    /// shutdown: stranded payloads are dropped, stranded answer signals
    /// are discarded (their drop resolves the waiting producers), and the
    /// indices return to zero.
    ///
    /// Must run after the dispatcher's workers have been joined; slots
    /// still reserved by an in-flight producer are left untouched (the
    /// closed latch keeps them from ever being committed).
    pub(crate) async fn sweep(&self) {
        let mut state = self.state.acquire().await;
        for id in 0..CAPACITY {
            if state.reserved[id] {
                continue;
            }
            // SAFETY: not reserved, workers joined, producers fenced off
            // by the closed latch: nobody else can touch this slot.
            unsafe {
                self.slots[id].clear();
                self.slots[id].take_signal();
            }
        }
        let reserved = state.reserved;
        *state = Indices::new();
        state.reserved = reserved;
    }

    // Gate and lock observations for the debug tracer.

    pub(crate) fn full_gate_engaged(&self) -> bool {
        self.full_gate.is_engaged()
    }

    pub(crate) fn empty_gate_engaged(&self) -> bool {
        self.empty_gate.is_engaged()
    }

    pub(crate) fn state_held(&self) -> bool {
        self.state.is_held()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::{timeout, Duration};

    fn ring() -> Ring<u32, ()> {
        Ring::new()
    }

    #[tokio::test]
    async fn test_single_event_cycle() {
        let ring = ring();

        let id = ring.reserve_for_reporting(None).await.unwrap();
        assert_eq!(id, 0);
        unsafe { ring.fill(id, 42) };
        ring.commit(id).await;

        let claimed = ring.reserve_for_dispatching().await.unwrap();
        assert_eq!(claimed, 0);
        assert_eq!(unsafe { ring.param(claimed) }, Some(&42));
        ring.release(claimed).await;

        let snapshot = ring.snapshot().await;
        assert!(snapshot.is_idle());
        assert_eq!(snapshot.reserved_tail, 1);
    }

    #[tokio::test]
    async fn test_indices_wrap_mod_256() {
        let ring = ring();

        for round in 0..600u32 {
            let id = ring.reserve_for_reporting(None).await.unwrap();
            assert_eq!(id, (round % 256) as u8);
            unsafe { ring.fill(id, round) };
            ring.commit(id).await;

            let claimed = ring.reserve_for_dispatching().await.unwrap();
            assert_eq!(claimed, id);
            assert_eq!(unsafe { ring.param(claimed) }, Some(&round));
            ring.release(claimed).await;
        }

        assert!(ring.snapshot().await.is_idle());
    }

    #[tokio::test]
    async fn test_dispatch_parks_on_empty_ring() {
        let ring = Arc::new(ring());

        let ring_clone = ring.clone();
        let mut worker = tokio::spawn(async move {
            ring_clone.reserve_for_dispatching().await.unwrap()
        });

        assert!(
            timeout(Duration::from_millis(20), &mut worker).await.is_err(),
            "dispatch must park while nothing is committed"
        );

        let id = ring.reserve_for_reporting(None).await.unwrap();
        unsafe { ring.fill(id, 5) };
        ring.commit(id).await;

        let claimed = timeout(Duration::from_millis(500), worker)
            .await
            .expect("commit should wake the parked worker")
            .unwrap();
        assert_eq!(claimed, id);
    }

    #[tokio::test]
    async fn test_reserve_parks_on_full_ring() {
        let ring = Arc::new(ring());

        // 255 outstanding reservations saturate the ring.
        for n in 0..255u32 {
            let id = ring.reserve_for_reporting(None).await.unwrap();
            unsafe { ring.fill(id, n) };
            ring.commit(id).await;
        }

        let ring_clone = ring.clone();
        let mut producer = tokio::spawn(async move {
            ring_clone.reserve_for_reporting(None).await.unwrap()
        });

        assert!(
            timeout(Duration::from_millis(20), &mut producer).await.is_err(),
            "the 256th reservation must park"
        );
        assert_eq!(ring.snapshot().await.reserved_len(), 255);

        // Draining one event makes room for exactly the parked producer.
        let claimed = ring.reserve_for_dispatching().await.unwrap();
        ring.release(claimed).await;

        let id = timeout(Duration::from_millis(500), producer)
            .await
            .expect("release should wake the parked producer")
            .unwrap();
        assert_eq!(id, 255);
    }

    #[tokio::test]
    async fn test_out_of_order_commit_is_stranded_then_merged() {
        let ring = Arc::new(ring());

        let first = ring.reserve_for_reporting(None).await.unwrap();
        let second = ring.reserve_for_reporting(None).await.unwrap();
        assert_eq!((first, second), (0, 1));

        // Committing the later reservation first leaves the committed
        // region stranded behind the uncommitted slot 0.
        unsafe { ring.fill(second, 2) };
        ring.commit(second).await;

        let ring_clone = ring.clone();
        let mut worker = tokio::spawn(async move {
            let a = ring_clone.reserve_for_dispatching().await.unwrap();
            ring_clone.release(a).await;
            let b = ring_clone.reserve_for_dispatching().await.unwrap();
            ring_clone.release(b).await;
            (a, b)
        });
        assert!(
            timeout(Duration::from_millis(20), &mut worker).await.is_err(),
            "slot 1 must not dispatch while slot 0 is uncommitted"
        );

        // The earlier commit merges the region; both dispatch in order.
        unsafe { ring.fill(first, 1) };
        ring.commit(first).await;

        let order = timeout(Duration::from_millis(500), worker)
            .await
            .expect("commit of slot 0 should unblock dispatch")
            .unwrap();
        assert_eq!(order, (0, 1));
        assert!(ring.snapshot().await.is_idle());
    }

    #[tokio::test]
    async fn test_stranded_release_is_collected_at_the_full_boundary() {
        let ring = ring();

        // Two committed events, claimed by two "workers", released out of
        // order: reserved_head advances one step for slot 0 and the
        // release of slot 1 strands.
        for n in 0..2u32 {
            let id = ring.reserve_for_reporting(None).await.unwrap();
            unsafe { ring.fill(id, n) };
            ring.commit(id).await;
        }
        let a = ring.reserve_for_dispatching().await.unwrap();
        let b = ring.reserve_for_dispatching().await.unwrap();
        ring.release(b).await;
        assert_eq!(ring.snapshot().await.reserved_head, 0);
        ring.release(a).await;
        assert_eq!(ring.snapshot().await.reserved_head, 1);

        // Fill the ring right up to the stranded slot; the claim that
        // hits the full boundary collects it instead of parking.
        for _ in 0..254 {
            ring.reserve_for_reporting(None).await.unwrap();
        }
        let boundary = ring.reserve_for_reporting(None).await.unwrap();
        assert_eq!(boundary, 0);
        assert_eq!(ring.snapshot().await.reserved_head, 2);
    }

    #[tokio::test]
    async fn test_close_fails_new_and_parked_operations() {
        let ring = Arc::new(ring());

        let ring_clone = ring.clone();
        let worker = tokio::spawn(async move { ring_clone.reserve_for_dispatching().await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        ring.close();

        let parked = timeout(Duration::from_millis(500), worker)
            .await
            .expect("close should wake the parked worker")
            .unwrap();
        assert!(matches!(parked, Err(EventError::ShutdownObserved)));
        assert!(matches!(
            ring.reserve_for_reporting(None).await,
            Err(EventError::ShutdownObserved)
        ));
    }

    #[tokio::test]
    async fn test_sweep_resets_to_canonical_empty() {
        let ring = ring();

        for n in 0..10u32 {
            let id = ring.reserve_for_reporting(None).await.unwrap();
            unsafe { ring.fill(id, n) };
            ring.commit(id).await;
        }
        ring.close();
        ring.sweep().await;

        let snapshot = ring.snapshot().await;
        assert!(snapshot.is_idle());
        assert_eq!(snapshot.reserved_tail, 0);
        assert_eq!(snapshot.tail, 0);
    }

    #[test]
    fn test_snapshot_lengths() {
        let mut indices = Indices::new();
        let a = indices.claim_for_produce().unwrap();
        let b = indices.claim_for_produce().unwrap();
        indices.commit(a);

        let snapshot = indices.snapshot();
        assert_eq!(snapshot.reserved_len(), 2);
        assert_eq!(snapshot.committed_len(), 1);
        assert!(!snapshot.is_idle());
        assert!(snapshot.has_reservations);

        indices.commit(b);
        indices.claim_for_dispatch().unwrap();
        indices.claim_for_dispatch().unwrap();
        indices.release(a);
        indices.release(b);
        assert!(indices.snapshot().is_idle());
    }
}
