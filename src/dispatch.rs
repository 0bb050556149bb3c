//! Defines `Dispatcher`, the worker pool that drives an `EventLink`.
//!
//! A dispatcher owns N worker tasks, each looping
//! *claim → consume → notify listeners → release* against the link's
//! ring, plus one optional debug tracer task. Which steps run is fixed at
//! construction by the mode flags; exactly five combinations are
//! supported (see [`DispatchConfig`]), and everything else (including a
//! non-zero worker priority and a consumer pool whose size does not match
//! the worker count) is rejected synchronously.
//!
//! ## Fault handling
//!
//! A fault from an answerfull consumer is captured on the event's answer
//! signal, so the waiting producer observes
//! [`EventError::ConsumerFailure`](crate::EventError::ConsumerFailure)
//! instead of an answer. Faults from answerless consumers and listeners
//! are logged and swallowed; there is no fallback queue and the event is
//! not retried.
//!
//! ## Lifecycle
//!
//! - [`stop_asap`](Dispatcher::stop_asap) flips the active flag; workers
//!   finish their current event and exit at the next claim. Workers
//!   already parked on the empty ring stay parked until teardown.
//! - [`stop_when_empty`](Dispatcher::stop_when_empty) samples the ring
//!   every couple of milliseconds and invokes `stop_asap` once the
//!   indices have been stable and idle for `5 × workers` consecutive
//!   samples.
//! - [`shutdown`](Dispatcher::shutdown) is the teardown: it closes the
//!   ring, waking every parked producer, worker, and answer waiter with
//!   the shutdown sentinel; joins the workers within a grace period,
//!   aborting stragglers; and sweeps the ring back to its canonical
//!   empty state. Dropping a dispatcher without calling `shutdown` still
//!   stops and wakes everything, it just cannot await the joins.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::consumer::{AnswerfullConsumer, AnswerlessConsumer, Listener};
use crate::error::{ConfigError, EventError};
use crate::link::EventLink;
use crate::tracer;

/// How often `stop_when_empty` samples the ring.
const SETTLE_INTERVAL: Duration = Duration::from_millis(2);

/// Construction parameters for a [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of worker tasks. Must be at least 1.
    pub workers: usize,
    /// Worker scheduling priority. Only 0 is supported.
    pub priority: i32,
    /// Dispatch events in place, straight from the ring slot. Buffered
    /// dispatch is not implemented; this must stay `true`.
    pub zero_copy: bool,
    /// Notify the link's listeners for every dispatched event.
    pub notify_listeners: bool,
    /// Consume events with the link's answerless consumer.
    pub consume_answerless: bool,
    /// Consume events with the link's answerfull consumer.
    pub consume_answerfull: bool,
    /// Run the debug tracer task alongside the workers.
    pub debug_tracer: bool,
    /// How long `shutdown` waits for workers to finish their current
    /// event before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            priority: 0,
            zero_copy: true,
            notify_listeners: true,
            consume_answerless: true,
            consume_answerfull: false,
            debug_tracer: false,
            shutdown_grace: Duration::from_millis(100),
        }
    }
}

/// The five supported flag combinations, resolved once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchMode {
    ConsumeAnswerlessAndNotify,
    ConsumeAnswerfullAndNotify,
    ConsumeAnswerless,
    ConsumeAnswerfull,
    NotifyOnly,
}

impl DispatchMode {
    fn from_flags(cfg: &DispatchConfig) -> Result<Self, ConfigError> {
        if !cfg.zero_copy {
            return Err(ConfigError::InvalidConfiguration {
                reason: "buffered (non-zero-copy) dispatch is not implemented".to_string(),
            });
        }
        match (
            cfg.notify_listeners,
            cfg.consume_answerless,
            cfg.consume_answerfull,
        ) {
            (true, true, false) => Ok(DispatchMode::ConsumeAnswerlessAndNotify),
            (true, false, true) => Ok(DispatchMode::ConsumeAnswerfullAndNotify),
            (false, true, false) => Ok(DispatchMode::ConsumeAnswerless),
            (false, false, true) => Ok(DispatchMode::ConsumeAnswerfull),
            (true, false, false) => Ok(DispatchMode::NotifyOnly),
            (notify, answerless, answerfull) => Err(ConfigError::InvalidConfiguration {
                reason: format!(
                    "unsupported mode combination: notify_listeners={notify}, \
                     consume_answerless={answerless}, consume_answerfull={answerfull}"
                ),
            }),
        }
    }

    fn consumes_answerless(&self) -> bool {
        matches!(
            self,
            DispatchMode::ConsumeAnswerlessAndNotify | DispatchMode::ConsumeAnswerless
        )
    }

    fn consumes_answerfull(&self) -> bool {
        matches!(
            self,
            DispatchMode::ConsumeAnswerfullAndNotify | DispatchMode::ConsumeAnswerfull
        )
    }

    fn notifies(&self) -> bool {
        matches!(
            self,
            DispatchMode::ConsumeAnswerlessAndNotify
                | DispatchMode::ConsumeAnswerfullAndNotify
                | DispatchMode::NotifyOnly
        )
    }
}

/// Pool of worker tasks dispatching one `EventLink`.
pub struct Dispatcher<P, A = ()>
where
    P: fmt::Debug + Send + Sync + 'static,
    A: Send + 'static,
{
    link: Arc<EventLink<P, A>>,
    workers: usize,
    active: Arc<AtomicBool>,
    token: CancellationToken,
    tasks: JoinSet<()>,
    grace: Duration,
}

impl<P, A> Dispatcher<P, A>
where
    P: fmt::Debug + Send + Sync + 'static,
    A: Send + 'static,
{
    /// Validates the configuration and spawns the worker tasks.
    ///
    /// Must be called within a Tokio runtime. All configuration errors
    /// are raised here, before any worker exists.
    pub fn spawn(link: Arc<EventLink<P, A>>, cfg: DispatchConfig) -> Result<Self, ConfigError> {
        let mode = DispatchMode::from_flags(&cfg)?;
        if cfg.priority != 0 {
            return Err(ConfigError::InvalidConfiguration {
                reason: format!(
                    "worker priority {} is not supported; it must be 0",
                    cfg.priority
                ),
            });
        }
        if cfg.workers == 0 {
            return Err(ConfigError::InvalidConfiguration {
                reason: "at least one worker is required".to_string(),
            });
        }

        if mode.consumes_answerless() {
            if !link.answerless().is_set() {
                return Err(ConfigError::ConsumerNotSet { kind: "answerless" });
            }
            if let Some(pool) = link.answerless().pool_len() {
                if pool != cfg.workers {
                    return Err(ConfigError::InvalidConfiguration {
                        reason: format!(
                            "answerless consumer pool holds {pool} instances \
                             for {} workers; one instance per worker is required",
                            cfg.workers
                        ),
                    });
                }
            }
        }
        if mode.consumes_answerfull() {
            if !link.answerfull().is_set() {
                return Err(ConfigError::ConsumerNotSet { kind: "answerfull" });
            }
            if let Some(pool) = link.answerfull().pool_len() {
                if pool != cfg.workers {
                    return Err(ConfigError::InvalidConfiguration {
                        reason: format!(
                            "answerfull consumer pool holds {pool} instances \
                             for {} workers; one instance per worker is required",
                            cfg.workers
                        ),
                    });
                }
            }
        }

        let active = Arc::new(AtomicBool::new(true));
        let token = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for id in 0..cfg.workers {
            let worker = Worker {
                id,
                link: Arc::clone(&link),
                answerless: if mode.consumes_answerless() {
                    link.answerless().for_worker(id)
                } else {
                    None
                },
                answerfull: if mode.consumes_answerfull() {
                    link.answerfull().for_worker(id)
                } else {
                    None
                },
                notify: mode.notifies(),
                active: Arc::clone(&active),
            };
            tasks.spawn(worker.run());
        }
        if cfg.debug_tracer {
            tasks.spawn(tracer::run(Arc::clone(&link), token.clone()));
        }

        debug!(
            link = %link.name(),
            workers = cfg.workers,
            mode = ?mode,
            tracer = cfg.debug_tracer,
            "dispatcher started"
        );

        Ok(Self {
            link,
            workers: cfg.workers,
            active,
            token,
            tasks,
            grace: cfg.shutdown_grace,
        })
    }

    /// Number of worker tasks (the tracer, if any, is not counted).
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Stops the workers as soon as each finishes its current event.
    ///
    /// Workers parked on the empty ring stay parked; only
    /// [`shutdown`](Self::shutdown) (or dropping the dispatcher) wakes
    /// them. Idempotent.
    pub fn stop_asap(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            self.token.cancel();
            debug!(link = %self.link.name(), "dispatcher stopping");
        }
    }

    /// Waits for the ring to drain, then stops the workers.
    ///
    /// The ring counts as drained after `5 × workers` consecutive samples
    /// (one every ~2 ms) in which it is idle and the indices have not
    /// moved.
    pub async fn stop_when_empty(&self) {
        let required = 5 * self.workers;
        let mut stable = 0usize;
        let mut last = None;

        while stable < required {
            let snapshot = self.link.snapshot().await;
            if snapshot.is_idle() && last == Some(snapshot) {
                stable += 1;
            } else {
                stable = 0;
                last = Some(snapshot);
            }
            tokio::time::sleep(SETTLE_INTERVAL).await;
        }
        self.stop_asap();
    }

    /// Tears the dispatcher down.
    ///
    /// Closes the ring (waking every parked producer, worker, and answer
    /// waiter with [`EventError::ShutdownObserved`]), joins the workers
    /// within the configured grace period (aborting any that are stuck
    /// inside a consumer body), and resets the ring to its canonical
    /// empty configuration.
    pub async fn shutdown(mut self) {
        self.stop_asap();
        self.link.ring().close();

        let grace = self.grace;
        let drained = async {
            while self.tasks.join_next().await.is_some() {}
        };
        if timeout(grace, drained).await.is_err() {
            warn!(
                link = %self.link.name(),
                grace = ?grace,
                "workers exceeded the shutdown grace period; aborting them"
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }

        self.link.ring().sweep().await;
        debug!(link = %self.link.name(), "dispatcher stopped");
    }
}

impl<P, A> Drop for Dispatcher<P, A>
where
    P: fmt::Debug + Send + Sync + 'static,
    A: Send + 'static,
{
    fn drop(&mut self) {
        // Best effort for dispatchers dropped without `shutdown`: stop
        // the workers and wake everything parked on the ring. The tasks
        // themselves are aborted by the JoinSet drop.
        self.stop_asap();
        self.link.ring().close();
    }
}

/// One dispatch worker. At most one of `answerless`/`answerfull` is set,
/// matching the resolved [`DispatchMode`].
struct Worker<P, A>
where
    P: fmt::Debug + Send + Sync + 'static,
    A: Send + 'static,
{
    id: usize,
    link: Arc<EventLink<P, A>>,
    answerless: Option<Arc<dyn AnswerlessConsumer<P>>>,
    answerfull: Option<Arc<dyn AnswerfullConsumer<P, A>>>,
    notify: bool,
    active: Arc<AtomicBool>,
}

impl<P, A> Worker<P, A>
where
    P: fmt::Debug + Send + Sync + 'static,
    A: Send + 'static,
{
    async fn run(self) {
        while self.active.load(Ordering::Acquire) {
            let id = match self.link.ring().reserve_for_dispatching().await {
                Ok(id) => id,
                Err(_) => break,
            };
            self.dispatch(id).await;
            self.link.ring().release(id).await;
        }
    }

    async fn dispatch(&self, id: u8) {
        let ring = self.link.ring();
        // SAFETY: this worker holds the slot's dispatch phase between the
        // claim above and the release after this returns.
        let Some(param) = (unsafe { ring.param(id) }) else {
            // Abandoned reservation, committed empty: nothing to do.
            return;
        };

        if let Some(consumer) = &self.answerless {
            if let Err(fault) = consumer.consume(param).await {
                error!(
                    link = %self.link.name(),
                    worker = self.id,
                    consumer = consumer.name(),
                    param = ?param,
                    %fault,
                    "answerless consumer failed; the event will not be retried"
                );
            }
        }

        if let Some(consumer) = &self.answerfull {
            // SAFETY: dispatch phase held, as above.
            let signal = unsafe { ring.take_signal(id) };
            match consumer.consume(param).await {
                Ok(answer) => match signal {
                    Some(signal) => signal.resolve(Ok(answer)),
                    None => warn!(
                        link = %self.link.name(),
                        worker = self.id,
                        consumer = consumer.name(),
                        param = ?param,
                        "consumer produced an answer for an event reserved without one"
                    ),
                },
                Err(fault) => {
                    error!(
                        link = %self.link.name(),
                        worker = self.id,
                        consumer = consumer.name(),
                        param = ?param,
                        %fault,
                        "answerfull consumer failed; the fault is carried to the producer"
                    );
                    if let Some(signal) = signal {
                        signal.resolve(Err(EventError::ConsumerFailure { fault }));
                    }
                }
            }
        }

        if self.notify {
            for listener in self.link.listeners() {
                if let Err(fault) = listener.notify(param).await {
                    error!(
                        link = %self.link.name(),
                        worker = self.id,
                        listener = listener.name(),
                        param = ?param,
                        %fault,
                        "listener failed; continuing"
                    );
                }
            }
        }
    }
}
