//! Defines `EventLink`, the public face of the event-bus core.
//!
//! An `EventLink<P, A>` couples producers of events carrying a parameter
//! `P` (and optionally awaiting an answer `A`) to one registered consumer
//! and a fixed table of listeners, through the bounded reservation ring.
//!
//! The producer side is a three-step protocol with zero payload copying:
//!
//! ```text
//!   let mut event = link.reserve().await?;   // claim a slot (parks on full)
//!   event.fill(param);                       // write the payload in place
//!   let ticket = event.commit().await;       // publish for dispatch
//! ```
//!
//! For request/response events, `reserve_for_answer` arms the slot's
//! answer signal and `wait_for_answer(ticket)` parks the producer until
//! the consumer's answer (or captured failure) arrives.
//!
//! Registration is completed *before* the link is shared: all
//! registration methods take `&mut self`, and a dispatcher takes
//! `Arc<EventLink>`, so registering a consumer or listener against a
//! running dispatcher cannot be expressed.

use std::borrow::Cow;
use std::sync::Arc;

use crate::consumer::{AnswerfullConsumer, AnswerlessConsumer, ConsumerSlot, Listener};
use crate::error::{ConfigError, EventError};
use crate::ring::{Ring, RingSnapshot};
use crate::signal::{answer_signal, AnswerTicket};

/// Default capacity of the listener table; pick a larger one with
/// [`EventLink::with_listener_capacity`] when needed.
pub const DEFAULT_LISTENER_CAPACITY: usize = 8;

/// An in-process event link: bounded reservation ring plus registration
/// state for one consumer and a fixed array of listeners.
pub struct EventLink<P, A = ()> {
    name: Cow<'static, str>,
    ring: Ring<P, A>,
    answerless: ConsumerSlot<dyn AnswerlessConsumer<P>>,
    answerfull: ConsumerSlot<dyn AnswerfullConsumer<P, A>>,
    listeners: Vec<Arc<dyn Listener<P>>>,
    listener_capacity: usize,
}

impl<P, A> EventLink<P, A>
where
    P: Send + Sync + 'static,
    A: Send + 'static,
{
    /// Creates an empty link with the default listener capacity.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self::with_listener_capacity(name, DEFAULT_LISTENER_CAPACITY)
    }

    /// Creates an empty link with room for `capacity` listeners.
    pub fn with_listener_capacity(name: impl Into<Cow<'static, str>>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            ring: Ring::new(),
            answerless: ConsumerSlot::Unset,
            answerfull: ConsumerSlot::Unset,
            listeners: Vec::with_capacity(capacity),
            listener_capacity: capacity,
        }
    }

    /// The link's name, threaded through every diagnostic line.
    pub fn name(&self) -> &str {
        &self.name
    }

    // ---- Registration ----

    /// Registers the answerless consumer, shared by all workers.
    /// Replaces any previously registered answerless consumer.
    pub fn set_answerless_consumer(&mut self, consumer: Arc<dyn AnswerlessConsumer<P>>) {
        self.answerless = ConsumerSlot::Shared(consumer);
    }

    /// Registers one answerless consumer instance per worker. The pool
    /// must hold exactly one instance for each worker the dispatcher is
    /// later configured with; worker `i` uses `pool[i]`.
    pub fn set_answerless_consumer_pool(&mut self, pool: Vec<Arc<dyn AnswerlessConsumer<P>>>) {
        self.answerless = ConsumerSlot::Pool(pool);
    }

    /// Registers the answerfull consumer, shared by all workers.
    /// Replaces any previously registered answerfull consumer.
    pub fn set_answerfull_consumer(&mut self, consumer: Arc<dyn AnswerfullConsumer<P, A>>) {
        self.answerfull = ConsumerSlot::Shared(consumer);
    }

    /// Registers one answerfull consumer instance per worker; worker `i`
    /// uses `pool[i]`.
    pub fn set_answerfull_consumer_pool(&mut self, pool: Vec<Arc<dyn AnswerfullConsumer<P, A>>>) {
        self.answerfull = ConsumerSlot::Pool(pool);
    }

    /// Unregisters both consumers. Idempotent.
    pub fn unset_consumer(&mut self) {
        self.answerless = ConsumerSlot::Unset;
        self.answerfull = ConsumerSlot::Unset;
    }

    /// Appends a listener, failing with
    /// [`ConfigError::CapacityExceeded`] once the fixed table is full.
    /// Returns the listener's index.
    pub fn add_listener(&mut self, listener: Arc<dyn Listener<P>>) -> Result<usize, ConfigError> {
        if self.listeners.len() >= self.listener_capacity {
            return Err(ConfigError::CapacityExceeded {
                capacity: self.listener_capacity,
            });
        }
        self.listeners.push(listener);
        Ok(self.listeners.len() - 1)
    }

    /// Finds a listener by its name.
    pub fn find_listener(&self, name: &str) -> Option<usize> {
        self.listeners.iter().position(|l| l.name() == name)
    }

    /// Removes the listener with the given name, shifting the tail of the
    /// table down by one. Returns whether a listener was removed.
    pub fn remove_listener(&mut self, name: &str) -> bool {
        match self.find_listener(name) {
            Some(index) => {
                self.listeners.remove(index);
                true
            }
            None => false,
        }
    }

    // ---- Producer protocol ----

    /// Reserves a slot for an event that produces no answer. Parks while
    /// the ring is full; fails with [`EventError::ShutdownObserved`] once
    /// the dispatcher is tearing down.
    pub async fn reserve(&self) -> Result<Reservation<'_, P, A>, EventError> {
        let slot = self.ring.reserve_for_reporting(None).await?;
        Ok(Reservation {
            ring: &self.ring,
            slot,
            answer: None,
            committed: false,
        })
    }

    /// Reserves a slot for an event whose answer the producer will await
    /// via [`wait_for_answer`](Self::wait_for_answer).
    pub async fn reserve_for_answer(&self) -> Result<Reservation<'_, P, A>, EventError> {
        let (signal, ticket) = answer_signal();
        let slot = self.ring.reserve_for_reporting(Some(signal)).await?;
        Ok(Reservation {
            ring: &self.ring,
            slot,
            answer: Some(ticket),
            committed: false,
        })
    }

    /// Awaits the answer for a committed event.
    ///
    /// Fails with [`EventError::NoAnswerConfigured`] if the ticket came
    /// from a plain [`reserve`](Self::reserve); surfaces the consumer's
    /// captured fault as [`EventError::ConsumerFailure`]; returns
    /// [`EventError::ShutdownObserved`] if the dispatcher tears the link
    /// down before the answer arrives.
    pub async fn wait_for_answer(&self, ticket: Ticket<A>) -> Result<A, EventError> {
        let Some(answer) = ticket.answer else {
            return Err(EventError::NoAnswerConfigured);
        };
        tokio::select! {
            biased;
            outcome = answer.wait() => outcome,
            _ = self.ring.closed() => Err(EventError::ShutdownObserved),
        }
    }

    /// A consistent observation of the ring's indices.
    pub async fn snapshot(&self) -> RingSnapshot {
        self.ring.snapshot().await
    }

    // ---- Crate-internal access for the dispatcher ----

    pub(crate) fn ring(&self) -> &Ring<P, A> {
        &self.ring
    }

    pub(crate) fn listeners(&self) -> &[Arc<dyn Listener<P>>] {
        &self.listeners
    }

    pub(crate) fn answerless(&self) -> &ConsumerSlot<dyn AnswerlessConsumer<P>> {
        &self.answerless
    }

    pub(crate) fn answerfull(&self) -> &ConsumerSlot<dyn AnswerfullConsumer<P, A>> {
        &self.answerfull
    }
}

/// A claimed ring slot in its produce phase.
///
/// Fill the payload in place, then [`commit`](Reservation::commit) to
/// publish it. A reservation dropped without committing publishes the
/// slot *empty*; workers dispatch empty slots as no-ops, so an early
/// return can never leak a slot or stall the ring.
pub struct Reservation<'a, P, A> {
    ring: &'a Ring<P, A>,
    slot: u8,
    answer: Option<AnswerTicket<A>>,
    committed: bool,
}

impl<P, A> Reservation<'_, P, A> {
    /// The claimed slot id.
    pub fn slot(&self) -> u8 {
        self.slot
    }

    /// Writes the event parameter into the slot, in place. Calling it
    /// again overwrites the previous payload.
    pub fn fill(&mut self, param: P) {
        // SAFETY: this reservation holds the slot's produce phase.
        unsafe { self.ring.fill(self.slot, param) };
    }

    /// Publishes the slot for dispatch and returns the ticket for
    /// [`EventLink::wait_for_answer`].
    pub async fn commit(mut self) -> Ticket<A> {
        self.committed = true;
        let ticket = Ticket {
            slot: self.slot,
            answer: self.answer.take(),
        };
        self.ring.commit(self.slot).await;
        ticket
    }
}

impl<P, A> Drop for Reservation<'_, P, A> {
    fn drop(&mut self) {
        if !self.committed {
            // Abandoned: publish the slot empty so the indices stay sound.
            self.ring.commit_blocking(self.slot);
        }
    }
}

/// Handle for a committed event, used to await its answer.
pub struct Ticket<A> {
    slot: u8,
    answer: Option<AnswerTicket<A>>,
}

impl<A> Ticket<A> {
    /// The ring slot the event was published through.
    pub fn slot(&self) -> u8 {
        self.slot
    }

    /// Whether the event was reserved with an answer expected.
    pub fn expects_answer(&self) -> bool {
        self.answer.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::ListenerFn;
    use crate::error::ConsumerFault;
    use tokio::time::{timeout, Duration};

    fn noop_listener(name: &'static str) -> Arc<dyn Listener<u32>> {
        ListenerFn::arc(name, |_: &u32| Ok(()))
    }

    #[test]
    fn test_listener_table_capacity() {
        let mut link = EventLink::<u32>::with_listener_capacity("capacity", 2);
        assert_eq!(link.add_listener(noop_listener("a")).unwrap(), 0);
        assert_eq!(link.add_listener(noop_listener("b")).unwrap(), 1);
        assert!(matches!(
            link.add_listener(noop_listener("c")),
            Err(ConfigError::CapacityExceeded { capacity: 2 })
        ));
    }

    #[test]
    fn test_find_and_remove_listener() {
        let mut link = EventLink::<u32>::new("listeners");
        link.add_listener(noop_listener("first")).unwrap();
        link.add_listener(noop_listener("second")).unwrap();
        link.add_listener(noop_listener("third")).unwrap();

        assert_eq!(link.find_listener("second"), Some(1));
        assert_eq!(link.find_listener("missing"), None);

        // Removal shifts the tail down, preserving order.
        assert!(link.remove_listener("second"));
        assert_eq!(link.find_listener("third"), Some(1));
        assert!(!link.remove_listener("second"));
    }

    #[test]
    fn test_registration_is_idempotent() {
        let mut link = EventLink::<u32, u32>::new("registration");
        assert!(!link.answerless().is_set());

        link.set_answerless_consumer(crate::consumer::ConsumerFn::arc("c", |_: &u32| Ok(())));
        assert!(link.answerless().is_set());
        link.set_answerless_consumer(crate::consumer::ConsumerFn::arc("c", |_: &u32| Ok(())));
        assert!(link.answerless().is_set());

        link.unset_consumer();
        assert!(!link.answerless().is_set());
        assert!(!link.answerfull().is_set());
        link.unset_consumer();
    }

    #[tokio::test]
    async fn test_wait_for_answer_on_answerless_ticket() {
        let link = EventLink::<u32, u32>::new("misuse");

        let mut event = link.reserve().await.unwrap();
        event.fill(1);
        let ticket = event.commit().await;
        assert!(!ticket.expects_answer());

        assert!(matches!(
            link.wait_for_answer(ticket).await,
            Err(EventError::NoAnswerConfigured)
        ));
    }

    #[tokio::test]
    async fn test_answer_round_trip_through_the_slot() {
        let link = EventLink::<u32, u32>::new("roundtrip");

        let mut event = link.reserve_for_answer().await.unwrap();
        event.fill(7);
        assert_eq!(event.slot(), 0);
        let ticket = event.commit().await;
        assert!(ticket.expects_answer());

        // Stand in for a dispatch worker: claim, answer, release.
        let id = link.ring().reserve_for_dispatching().await.unwrap();
        let param = *unsafe { link.ring().param(id) }.unwrap();
        let signal = unsafe { link.ring().take_signal(id) }.unwrap();
        signal.resolve(Ok(param * param));
        link.ring().release(id).await;

        assert_eq!(link.wait_for_answer(ticket).await.unwrap(), 49);
        assert!(link.snapshot().await.is_idle());
    }

    #[tokio::test]
    async fn test_wait_for_answer_observes_teardown() {
        let link = EventLink::<u32, u32>::new("teardown");

        let mut event = link.reserve_for_answer().await.unwrap();
        event.fill(3);
        let ticket = event.commit().await;

        // Nothing will ever consume the event; closing the ring must
        // unpark the waiting producer with the shutdown sentinel.
        let waiter = link.wait_for_answer(ticket);
        tokio::pin!(waiter);
        assert!(timeout(Duration::from_millis(20), &mut waiter).await.is_err());

        link.ring().close();
        let outcome = timeout(Duration::from_millis(500), waiter)
            .await
            .expect("close should wake the answer waiter");
        assert!(matches!(outcome, Err(EventError::ShutdownObserved)));
    }

    #[tokio::test]
    async fn test_abandoned_reservation_commits_empty() {
        let link = EventLink::<u32>::new("abandoned");

        {
            let event = link.reserve().await.unwrap();
            assert_eq!(event.slot(), 0);
            // Dropped without fill or commit.
        }

        // The slot flowed through as an empty event: claimable, no param.
        let id = link.ring().reserve_for_dispatching().await.unwrap();
        assert_eq!(id, 0);
        assert!(unsafe { link.ring().param(id) }.is_none());
        link.ring().release(id).await;
        assert!(link.snapshot().await.is_idle());
    }
}
