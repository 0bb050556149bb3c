//! Capabilities invoked by dispatch workers.
//!
//! Three extension points, all trait objects registered on the
//! [`EventLink`](crate::EventLink) before a dispatcher is spawned:
//!
//! - [`AnswerlessConsumer`] — consumes the event, produces no result.
//! - [`AnswerfullConsumer`] — consumes the event and returns the answer
//!   the reserving producer is waiting for.
//! - [`Listener`] — side-effect-only observer notified in addition to the
//!   consumer.
//!
//! All three receive the event parameter by reference, read in place from
//! the ring slot. Implementations may be slow or asynchronous; they run
//! on a dispatch worker and must not block its thread (prefer async waits).
//! A body signals failure by returning a [`ConsumerFault`]; the
//! dispatcher captures answerfull faults on the event's answer signal and
//! logs-and-swallows the rest.
//!
//! For bodies that are plain synchronous functions, the `*Fn` adapters
//! wrap a closure without the ceremony of a trait impl.

use async_trait::async_trait;
use std::borrow::Cow;
use std::sync::Arc;

use crate::error::ConsumerFault;

/// Consumer of events that produce no answer.
#[async_trait]
pub trait AnswerlessConsumer<P: Send + Sync>: Send + Sync + 'static {
    /// Consumes one event.
    async fn consume(&self, param: &P) -> Result<(), ConsumerFault>;

    /// Human-readable name (for logs).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Consumer of events whose producer awaits a computed answer.
///
/// The returned answer resolves the event's answer signal *before*
/// listeners are notified, so the producer never waits on listener
/// side effects.
#[async_trait]
pub trait AnswerfullConsumer<P: Send + Sync, A: Send>: Send + Sync + 'static {
    /// Consumes one event and computes its answer.
    async fn consume(&self, param: &P) -> Result<A, ConsumerFault>;

    /// Human-readable name (for logs).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Side-effect-only callback invoked in addition to the consumer.
#[async_trait]
pub trait Listener<P: Send + Sync>: Send + Sync + 'static {
    /// Observes one event.
    async fn notify(&self, param: &P) -> Result<(), ConsumerFault>;

    /// Human-readable name; also the identity used by
    /// [`find_listener`](crate::EventLink::find_listener) and
    /// [`remove_listener`](crate::EventLink::remove_listener).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Function-backed answerless consumer.
pub struct ConsumerFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> ConsumerFn<F> {
    /// Creates a named consumer from a synchronous closure.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the consumer and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<P, F> AnswerlessConsumer<P> for ConsumerFn<F>
where
    P: Send + Sync + 'static,
    F: Fn(&P) -> Result<(), ConsumerFault> + Send + Sync + 'static,
{
    async fn consume(&self, param: &P) -> Result<(), ConsumerFault> {
        (self.f)(param)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Function-backed answerfull consumer.
pub struct ResponderFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> ResponderFn<F> {
    /// Creates a named responder from a synchronous closure.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the responder and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<P, A, F> AnswerfullConsumer<P, A> for ResponderFn<F>
where
    P: Send + Sync + 'static,
    A: Send + 'static,
    F: Fn(&P) -> Result<A, ConsumerFault> + Send + Sync + 'static,
{
    async fn consume(&self, param: &P) -> Result<A, ConsumerFault> {
        (self.f)(param)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Function-backed listener.
pub struct ListenerFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> ListenerFn<F> {
    /// Creates a named listener from a synchronous closure.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the listener and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<P, F> Listener<P> for ListenerFn<F>
where
    P: Send + Sync + 'static,
    F: Fn(&P) -> Result<(), ConsumerFault> + Send + Sync + 'static,
{
    async fn notify(&self, param: &P) -> Result<(), ConsumerFault> {
        (self.f)(param)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Registered consumer state for one consumer kind: absent, one shared
/// instance for all workers, or one instance per worker.
pub(crate) enum ConsumerSlot<T: ?Sized> {
    Unset,
    Shared(Arc<T>),
    Pool(Vec<Arc<T>>),
}

impl<T: ?Sized> ConsumerSlot<T> {
    pub(crate) fn is_set(&self) -> bool {
        !matches!(self, ConsumerSlot::Unset)
    }

    /// Pool size, if this slot holds a per-worker pool.
    pub(crate) fn pool_len(&self) -> Option<usize> {
        match self {
            ConsumerSlot::Pool(pool) => Some(pool.len()),
            _ => None,
        }
    }

    /// The instance worker `index` should use.
    pub(crate) fn for_worker(&self, index: usize) -> Option<Arc<T>> {
        match self {
            ConsumerSlot::Unset => None,
            ConsumerSlot::Shared(consumer) => Some(Arc::clone(consumer)),
            ConsumerSlot::Pool(pool) => pool.get(index).map(Arc::clone),
        }
    }
}
