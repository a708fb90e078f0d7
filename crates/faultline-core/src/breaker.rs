//! Circuit breaker ("recovery mode").
//!
//! The breaker watches the fault arrival rate over a trailing window. When
//! the window count exceeds the configured threshold it trips open and the
//! engine degrades to delivery-only handling for non-critical faults: no
//! recovery attempts, no notifications. This prevents feedback loops where
//! recovery attempts themselves throw and re-trigger the breaker.
//!
//! Critical faults are always fully admitted, open or closed. Self-
//! protection must never mask faults serious enough to need escalation.
//!
//! The open state resets on a timer, not a count: exactly `cool_down`
//! after opening the breaker closes again, independent of further fault
//! arrivals. Callers observe the reset through [`CircuitBreaker::poll`].

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::fault::Severity;

/// Breaker mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitMode {
    /// Normal handling.
    Closed,
    /// Recovery mode: non-critical faults are queued for delivery only.
    Open,
}

/// How much of the pipeline a fault is admitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Recovery and notification proceed.
    Full,
    /// Delivery batcher only; recovery and notification are skipped.
    DeliverOnly,
}

/// Breaker state transition observed during `admit` or `poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitTransition {
    /// The breaker tripped open.
    Opened {
        /// When it opened, in monotonic milliseconds.
        at_ms: u64,
    },
    /// The cool-down elapsed and the breaker closed.
    Closed {
        /// When it closed, in monotonic milliseconds.
        at_ms: u64,
    },
}

/// Trailing-window circuit breaker.
///
/// Every fault is recorded in the window regardless of severity or
/// duplicate status; the window is the engine's measure of raw fault
/// pressure.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    window_ms: u64,
    cool_down_ms: u64,
    mode: CircuitMode,
    opened_at_ms: u64,
    arrivals: VecDeque<u64>,
}

impl CircuitBreaker {
    /// Creates a breaker from the engine configuration.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            threshold: config.error_threshold,
            window_ms: config.window.as_millis() as u64,
            cool_down_ms: config.cool_down.as_millis() as u64,
            mode: CircuitMode::Closed,
            opened_at_ms: 0,
            arrivals: VecDeque::new(),
        }
    }

    /// Returns the current mode.
    #[must_use]
    pub const fn mode(&self) -> CircuitMode {
        self.mode
    }

    /// Returns `true` while the breaker is open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.mode, CircuitMode::Open)
    }

    /// Returns the number of arrivals currently inside the window.
    #[must_use]
    pub fn window_count(&self) -> usize {
        self.arrivals.len()
    }

    /// Records a fault arrival and decides how far it is admitted.
    ///
    /// Returns the admission decision plus any state transition the arrival
    /// caused (the cool-down reset is checked first, so a single call can
    /// observe `Closed` followed by a fresh storm re-opening on a later
    /// call, but never both at once).
    pub fn admit(&mut self, severity: Severity, now_ms: u64) -> (Admission, Option<CircuitTransition>) {
        let mut transition = self.poll(now_ms);

        self.arrivals.push_back(now_ms);
        self.prune(now_ms);

        if self.mode == CircuitMode::Closed && self.arrivals.len() > self.threshold as usize {
            self.mode = CircuitMode::Open;
            self.opened_at_ms = now_ms;
            transition = Some(CircuitTransition::Opened { at_ms: now_ms });
            warn!(
                window_count = self.arrivals.len(),
                threshold = self.threshold,
                "fault storm detected, entering recovery mode"
            );
        }

        let admission = match self.mode {
            CircuitMode::Closed => Admission::Full,
            // Critical faults bypass the degraded state.
            CircuitMode::Open if severity == Severity::Critical => Admission::Full,
            CircuitMode::Open => Admission::DeliverOnly,
        };
        (admission, transition)
    }

    /// Applies the time-based reset: closes the breaker once `cool_down`
    /// has elapsed since it opened.
    pub fn poll(&mut self, now_ms: u64) -> Option<CircuitTransition> {
        if self.mode == CircuitMode::Open
            && now_ms.saturating_sub(self.opened_at_ms) >= self.cool_down_ms
        {
            self.mode = CircuitMode::Closed;
            self.arrivals.clear();
            debug!(opened_at_ms = self.opened_at_ms, "cool-down elapsed, leaving recovery mode");
            return Some(CircuitTransition::Closed { at_ms: now_ms });
        }
        None
    }

    /// Returns when the breaker will auto-close, if open.
    #[must_use]
    pub const fn closes_at_ms(&self) -> Option<u64> {
        match self.mode {
            CircuitMode::Open => Some(self.opened_at_ms + self.cool_down_ms),
            CircuitMode::Closed => None,
        }
    }

    fn prune(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        while let Some(&oldest) = self.arrivals.front() {
            if oldest >= cutoff {
                break;
            }
            self.arrivals.pop_front();
        }
    }
}
