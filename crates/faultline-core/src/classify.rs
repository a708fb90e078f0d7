//! Severity classification.
//!
//! Classification is a pure function of the fault shape plus two pieces of
//! live context: current connectivity and the running session fault count.
//! Rules are evaluated in a fixed order and the first match wins; the
//! session-pressure escalation is then applied to whatever tier came out.
//!
//! Critical message patterns are checked before generic network matching:
//! an undefined-reference error surfaced through a network callback is
//! still a code defect, not a connectivity issue.

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

use crate::fault::{FaultKind, Severity};

/// Session fault count beyond which the computed tier is escalated by one.
pub const ESCALATION_FAULT_COUNT: u64 = 10;

/// Message patterns that always indicate a code defect.
static CRITICAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)cannot read propert(y|ies)\b.*\bof (undefined|null)",
        r"(?i)\bis not defined\b",
        r"(?i)\bis not a function\b",
        r"(?i)null is not an object",
        r"(?i)service worker registration failed",
        r"(?i)\bmaximum call stack size exceeded\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid critical pattern"))
    .collect()
});

/// Message patterns that indicate a recognizable fetch/transport failure.
static NETWORK_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)failed to fetch",
        r"(?i)network\s?error",
        r"(?i)network request failed",
        r"(?i)load failed",
        r"(?i)\btimed? ?out\b",
        r"(?i)\berr_(network|internet|connection)[a-z_]*\b",
        r"(?i)socket hang up",
        r"(?i)\beconn(refused|reset)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid network pattern"))
    .collect()
});

/// Returns whether `message` matches a known critical pattern.
#[must_use]
pub fn is_critical_message(message: &str) -> bool {
    CRITICAL_PATTERNS.iter().any(|p| p.is_match(message))
}

/// Returns whether `message` looks like a fetch/transport failure.
#[must_use]
pub fn is_network_message(message: &str) -> bool {
    NETWORK_PATTERNS.iter().any(|p| p.is_match(message))
}

/// Assigns a severity tier to a fault.
///
/// Rules, in order, first match wins:
/// 1. Network fault while offline: expected condition, `Warning`.
/// 2. Resource load failure: `Warning`.
/// 3. Known critical message pattern: `Critical`.
/// 4. Network fault with a recognizable transport failure: `Warning`.
/// 5. Default: `Error`.
///
/// When the session has already accumulated more than
/// [`ESCALATION_FAULT_COUNT`] faults, the computed tier is escalated by
/// exactly one level, capped at `Critical`.
#[must_use]
pub fn classify(
    kind: FaultKind,
    raw_message: &str,
    is_online: bool,
    session_fault_count: u64,
) -> Severity {
    let base = base_tier(kind, raw_message, is_online);
    let severity = if session_fault_count > ESCALATION_FAULT_COUNT {
        base.escalate()
    } else {
        base
    };
    trace!(kind = %kind, %severity, session_fault_count, "classified fault");
    severity
}

fn base_tier(kind: FaultKind, raw_message: &str, is_online: bool) -> Severity {
    if kind == FaultKind::Network && !is_online {
        return Severity::Warning;
    }
    if kind == FaultKind::Resource {
        return Severity::Warning;
    }
    if is_critical_message(raw_message) {
        return Severity::Critical;
    }
    if kind == FaultKind::Network && is_network_message(raw_message) {
        return Severity::Warning;
    }
    Severity::Error
}
