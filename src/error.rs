//! Error types raised by the event link and its dispatcher.
//!
//! Two enums split the failure surface the way the rest of the crate is
//! split:
//!
//! - [`ConfigError`] — registration and dispatcher-construction failures.
//!   These are always raised synchronously, before any worker is spawned.
//! - [`EventError`] — per-event failures delivered to a producer through
//!   the reservation protocol or the answer signal.
//!
//! Consumer and listener bodies report their own failures as
//! [`ConsumerFault`] values; the dispatcher decides whether a fault is
//! captured on the event's answer signal or logged and swallowed.

use thiserror::Error;

/// Failures in link registration or dispatcher construction.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The requested dispatcher configuration is not supported: an
    /// unknown mode-flag combination, a non-zero worker priority, zero
    /// workers, or a consumer pool whose size does not match the worker
    /// count.
    #[error("invalid dispatcher configuration: {reason}")]
    InvalidConfiguration {
        /// Human-readable description of the rejected combination.
        reason: String,
    },

    /// The dispatcher was asked to consume events of a kind for which no
    /// consumer has been registered on the link.
    #[error("no {kind} consumer is registered on the link")]
    ConsumerNotSet {
        /// Which consumer kind was missing (`"answerless"` or `"answerfull"`).
        kind: &'static str,
    },

    /// `add_listener` was called on a link whose listener table is full.
    #[error("listener table is full (capacity {capacity})")]
    CapacityExceeded {
        /// The fixed capacity chosen at link construction.
        capacity: usize,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::InvalidConfiguration { .. } => "invalid_configuration",
            ConfigError::ConsumerNotSet { .. } => "consumer_not_set",
            ConfigError::CapacityExceeded { .. } => "capacity_exceeded",
        }
    }
}

/// Per-event failures observed by a producer.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum EventError {
    /// `wait_for_answer` was called with a ticket from a reservation that
    /// was not prepared to produce an answer. Use `reserve_for_answer`
    /// instead of `reserve` when an answer is expected.
    #[error("event was reserved without an answer slot")]
    NoAnswerConfigured,

    /// The answerfull consumer failed while processing the event; the
    /// fault it reported is carried to the waiting producer in place of
    /// the answer.
    #[error("consumer failed: {fault}")]
    ConsumerFailure {
        /// The fault reported by the consumer body.
        fault: ConsumerFault,
    },

    /// The operation was parked (or the answer still pending) when the
    /// dispatcher began tearing the link down; no event was published and
    /// no answer will arrive.
    #[error("link is shutting down")]
    ShutdownObserved,
}

impl EventError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventError::NoAnswerConfigured => "no_answer_configured",
            EventError::ConsumerFailure { .. } => "consumer_failure",
            EventError::ShutdownObserved => "shutdown_observed",
        }
    }
}

/// A failure reported by a consumer or listener body.
///
/// Faults from answerfull consumers are captured on the event and
/// surfaced to the waiting producer as [`EventError::ConsumerFailure`];
/// faults from answerless consumers and listeners are logged and
/// swallowed; there is no fallback queue and the event is not retried.
#[derive(Error, Debug, Clone)]
#[error("{reason}")]
pub struct ConsumerFault {
    reason: String,
}

impl ConsumerFault {
    /// Creates a fault with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// The reason reported by the failing body.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<String> for ConsumerFault {
    fn from(reason: String) -> Self {
        Self { reason }
    }
}

impl From<&str> for ConsumerFault {
    fn from(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_stable() {
        let err = ConfigError::InvalidConfiguration {
            reason: "zero workers".into(),
        };
        assert_eq!(err.as_label(), "invalid_configuration");
        assert_eq!(
            ConfigError::ConsumerNotSet { kind: "answerless" }.as_label(),
            "consumer_not_set"
        );
        assert_eq!(
            ConfigError::CapacityExceeded { capacity: 8 }.as_label(),
            "capacity_exceeded"
        );
        assert_eq!(EventError::NoAnswerConfigured.as_label(), "no_answer_configured");
        assert_eq!(EventError::ShutdownObserved.as_label(), "shutdown_observed");
    }

    #[test]
    fn test_display_includes_context() {
        let err = ConfigError::CapacityExceeded { capacity: 4 };
        assert!(err.to_string().contains("capacity 4"));

        let err = EventError::ConsumerFailure {
            fault: ConsumerFault::new("boom"),
        };
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_fault_conversions() {
        let fault: ConsumerFault = "broken".into();
        assert_eq!(fault.reason(), "broken");

        let fault: ConsumerFault = String::from("still broken").into();
        assert_eq!(fault.to_string(), "still broken");
    }
}
