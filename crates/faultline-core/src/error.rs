//! Engine error types.
//!
//! Faults reported *into* the engine are never re-thrown: the engine is a
//! terminal sink. The errors here cover the engine's own outbound edges
//! (transport, recovery hooks) and are always handled locally.

use thiserror::Error;

/// Errors returned by the collector transport.
///
/// Any of these counts as a transport failure for batching purposes: the
/// whole batch is returned to the front of the delivery queue and retried
/// on the next natural flush trigger.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The collector was reached but rejected the batch.
    #[error("collector rejected batch: {reason}")]
    Rejected {
        /// Collector-supplied rejection reason.
        reason: String,
    },

    /// The collector could not be reached.
    #[error("collector unreachable: {reason}")]
    Unreachable {
        /// Description of the connectivity failure.
        reason: String,
    },
}

/// Errors produced by host-supplied recovery hooks.
///
/// A hook failure never escalates into a new reportable fault; it is logged
/// once via the `recovery_strategy_failed` event and the pipeline moves on.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// A retry, refresh, or restore hook reported failure.
    #[error("recovery hook failed: {reason}")]
    HookFailed {
        /// Host-supplied failure description.
        reason: String,
    },
}

impl RecoveryError {
    /// Convenience constructor for hook failures.
    #[must_use]
    pub fn hook(reason: impl Into<String>) -> Self {
        Self::HookFailed {
            reason: reason.into(),
        }
    }
}
