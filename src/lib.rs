//! # evlink
//!
//! `evlink` is an in-process event bus built around a bounded,
//! slot-reservation ring buffer. Producers claim a slot, fill the event
//! parameter **in place**, and publish it; a pool of dispatch workers
//! consumes it **in place** and recycles the slot; no payload is ever
//! copied between buffers. An event may optionally carry an answer: the
//! producer parks on a one-shot signal that the consumer's computed
//! answer (or captured failure) resolves.
//!
//! ## Core pieces
//!
//! * **[`EventLink`]** — registration surface (one consumer, a fixed
//!   table of [`Listener`]s) plus the producer protocol:
//!   `reserve` / `fill` / `commit`, and `wait_for_answer` for
//!   request/response events.
//! * **[`Dispatcher`]** — N worker tasks looping
//!   *claim → consume → notify → release*, with validated mode flags,
//!   `stop_asap` / `stop_when_empty`, and a teardown that wakes every
//!   parked operation.
//! * **The ring** — 256 slots behind four wrapping `u8` indices;
//!   producers park when it is full, workers when it is empty, with no
//!   condition variables and no lock-state probing.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use evlink::{ConsumerFn, DispatchConfig, Dispatcher, EventLink};
//!
//! #[tokio::main]
//! async fn main() {
//!     let seen = Arc::new(AtomicUsize::new(0));
//!     let counter = Arc::clone(&seen);
//!
//!     let mut link = EventLink::<u32>::new("doc");
//!     link.set_answerless_consumer(ConsumerFn::arc("count", move |_param: &u32| {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!         Ok(())
//!     }));
//!
//!     let link = Arc::new(link);
//!     let dispatcher = Dispatcher::spawn(Arc::clone(&link), DispatchConfig::default()).unwrap();
//!
//!     for n in 0..8u32 {
//!         let mut event = link.reserve().await.unwrap();
//!         event.fill(n);
//!         event.commit().await;
//!     }
//!
//!     dispatcher.stop_when_empty().await;
//!     dispatcher.shutdown().await;
//!     assert_eq!(seen.load(Ordering::Relaxed), 8);
//! }
//! ```
//!
//! ## Guarantees
//!
//! * At most 255 events are outstanding at once; a producer that would
//!   exceed that parks until a slot is recycled.
//! * Events become dispatchable in commit order; any worker may pick up
//!   any committed event.
//! * A producer returning from `wait_for_answer` observes the complete
//!   answer written by the consumer, or the consumer's fault, or, once
//!   the dispatcher tears down, a shutdown sentinel. Teardown wakes
//!   every parked producer and worker; nothing stays parked.

mod consumer;
mod dispatch;
mod error;
mod fence;
mod gate;
mod link;
mod ring;
mod signal;
mod slot;
mod tracer;

pub use consumer::{
    AnswerfullConsumer, AnswerlessConsumer, ConsumerFn, Listener, ListenerFn, ResponderFn,
};
pub use dispatch::{DispatchConfig, Dispatcher};
pub use error::{ConfigError, ConsumerFault, EventError};
pub use link::{EventLink, Reservation, Ticket, DEFAULT_LISTENER_CAPACITY};
pub use ring::{RingSnapshot, CAPACITY};
