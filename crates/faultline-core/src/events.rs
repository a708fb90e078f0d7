//! Engine lifecycle events for observability.
//!
//! The engine emits these through the [`crate::host::EventSink`]
//! collaborator as it processes faults. Sinks must be cheap and must not
//! report faults back into the engine.

use serde::Serialize;
use uuid::Uuid;

use crate::fault::{FaultKind, Severity};

/// Observable engine lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A fault was classified.
    FaultClassified {
        /// Fingerprint token.
        fingerprint: String,
        /// Fault kind.
        kind: FaultKind,
        /// Assigned severity.
        severity: Severity,
        /// Whether this was a repeat of a known fingerprint.
        duplicate: bool,
    },
    /// The circuit breaker tripped open.
    CircuitOpened {
        /// When it opened, in monotonic milliseconds.
        at_ms: u64,
    },
    /// The circuit breaker cool-down elapsed.
    CircuitClosed {
        /// When it closed, in monotonic milliseconds.
        at_ms: u64,
    },
    /// A recovery strategy reported success.
    RecoverySucceeded {
        /// Stable strategy name.
        strategy: &'static str,
        /// Fingerprint of the recovered fault.
        fingerprint: String,
    },
    /// Every applicable strategy was tried without success.
    RecoveryExhausted {
        /// Fingerprint of the unrecovered fault.
        fingerprint: String,
    },
    /// A recovery hook failed. Logged once; never re-reported as a fault.
    RecoveryStrategyFailed {
        /// Stable strategy name.
        strategy: &'static str,
        /// Hook failure description.
        reason: String,
    },
    /// A notification was handed to the renderer.
    NotificationShown {
        /// Notification id.
        id: Uuid,
        /// Severity tier it occupies.
        severity: Severity,
    },
}

impl EngineEvent {
    /// Returns the stable event name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::FaultClassified { .. } => "fault_classified",
            Self::CircuitOpened { .. } => "circuit_opened",
            Self::CircuitClosed { .. } => "circuit_closed",
            Self::RecoverySucceeded { .. } => "recovery_succeeded",
            Self::RecoveryExhausted { .. } => "recovery_exhausted",
            Self::RecoveryStrategyFailed { .. } => "recovery_strategy_failed",
            Self::NotificationShown { .. } => "notification_shown",
        }
    }
}
