//! Fault fingerprinting and session-scoped deduplication.
//!
//! A fingerprint is the deduplication identity of a fault: a hash of the
//! fault kind, the first line of the raw message, and the triggering action.
//! Stack traces are noisy (they vary with bundling, minification, and async
//! scheduling) and are deliberately excluded, so two faults with the same
//! root cause collapse to one fingerprint regardless of stack differences.
//!
//! The [`SeenSet`] records fingerprints observed this session. It grows
//! monotonically but is capped: on overflow the oldest half is dropped,
//! which keeps eviction deterministic and testable.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::fault::FaultKind;

/// Width of the fingerprint token in bytes (rendered as 16 hex chars).
pub const FINGERPRINT_BYTES: usize = 8;

/// Stable deduplication identity for a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_BYTES]);

impl Fingerprint {
    /// Derives the fingerprint for `(kind, message, action)`.
    ///
    /// Only the first line of the message participates in the hash; stack
    /// frames on subsequent lines are excluded from identity.
    #[must_use]
    pub fn derive(kind: FaultKind, raw_message: &str, action: &str) -> Self {
        let first_line = raw_message.lines().next().unwrap_or("").trim();

        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0x1f]);
        hasher.update(first_line.as_bytes());
        hasher.update([0x1f]);
        hasher.update(action.as_bytes());
        let digest = hasher.finalize();

        let mut token = [0u8; FINGERPRINT_BYTES];
        token.copy_from_slice(&digest[..FINGERPRINT_BYTES]);
        Self(token)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Set of fingerprints observed this session.
///
/// Insertion order is tracked so the eviction policy (drop the oldest half
/// when over capacity) stays deterministic.
#[derive(Debug)]
pub struct SeenSet {
    order: VecDeque<Fingerprint>,
    seen: HashSet<Fingerprint>,
    cap: usize,
}

impl SeenSet {
    /// Creates a seen-set holding at most `cap` fingerprints.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            order: VecDeque::new(),
            seen: HashSet::new(),
            cap: cap.max(2),
        }
    }

    /// Registers `fingerprint` and reports whether it was already present.
    ///
    /// The first occurrence registers the fingerprint and returns `false`;
    /// every subsequent occurrence returns `true`.
    pub fn observe(&mut self, fingerprint: Fingerprint) -> bool {
        if self.seen.contains(&fingerprint) {
            return true;
        }

        if self.order.len() >= self.cap {
            self.evict_oldest_half();
        }

        self.order.push_back(fingerprint);
        self.seen.insert(fingerprint);
        false
    }

    /// Returns whether `fingerprint` has been observed without registering it.
    #[must_use]
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.seen.contains(fingerprint)
    }

    /// Returns the number of tracked fingerprints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if nothing has been observed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn evict_oldest_half(&mut self) {
        let drop_count = self.order.len() / 2;
        for evicted in self.order.drain(..drop_count) {
            self.seen.remove(&evicted);
        }
        debug!(dropped = drop_count, "seen-set over capacity, dropped oldest half");
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_identical_cause_collapses_despite_stack_differences() {
        let a = Fingerprint::derive(
            FaultKind::Script,
            "TypeError: x is undefined\n  at render (app.js:10)",
            "checkout",
        );
        let b = Fingerprint::derive(
            FaultKind::Script,
            "TypeError: x is undefined\n  at hydrate (vendor.js:993)\n  at tick (vendor.js:7)",
            "checkout",
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_kind_and_action_participate_in_identity() {
        let base = Fingerprint::derive(FaultKind::Script, "boom", "checkout");
        assert_ne!(base, Fingerprint::derive(FaultKind::Rejection, "boom", "checkout"));
        assert_ne!(base, Fingerprint::derive(FaultKind::Script, "boom", "pricing"));
    }

    #[test]
    fn test_fingerprint_renders_fixed_width() {
        let fp = Fingerprint::derive(FaultKind::Network, "failed to fetch", "sync");
        assert_eq!(fp.to_string().len(), FINGERPRINT_BYTES * 2);
    }

    #[test]
    fn test_first_observation_is_not_duplicate() {
        let mut set = SeenSet::new(16);
        let fp = Fingerprint::derive(FaultKind::Script, "boom", "a");
        assert!(!set.observe(fp));
        assert!(set.observe(fp));
        assert!(set.observe(fp));
    }

    #[test]
    fn test_eviction_drops_oldest_half() {
        let mut set = SeenSet::new(4);
        let fps: Vec<Fingerprint> = (0..5)
            .map(|i| Fingerprint::derive(FaultKind::Script, &format!("boom {i}"), "a"))
            .collect();

        for fp in &fps[..4] {
            assert!(!set.observe(*fp));
        }
        assert_eq!(set.len(), 4);

        // Fifth distinct fingerprint forces the oldest two out.
        assert!(!set.observe(fps[4]));
        assert!(!set.contains(&fps[0]));
        assert!(!set.contains(&fps[1]));
        assert!(set.contains(&fps[2]));
        assert!(set.contains(&fps[3]));
        assert!(set.contains(&fps[4]));
    }

    #[test]
    fn test_evicted_fingerprint_is_fresh_again() {
        let mut set = SeenSet::new(2);
        let a = Fingerprint::derive(FaultKind::Script, "a", "x");
        let b = Fingerprint::derive(FaultKind::Script, "b", "x");
        let c = Fingerprint::derive(FaultKind::Script, "c", "x");

        set.observe(a);
        set.observe(b);
        set.observe(c); // evicts a
        assert!(!set.observe(a));
    }

    proptest! {
        #[test]
        fn prop_fingerprint_ignores_trailing_lines(
            first in "[a-zA-Z0-9 :._-]{1,60}",
            tail in "[a-zA-Z0-9 :._\n-]{0,200}",
        ) {
            let with_stack = format!("{first}\n{tail}");
            let a = Fingerprint::derive(FaultKind::Script, &first, "op");
            let b = Fingerprint::derive(FaultKind::Script, &with_stack, "op");
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_seen_set_never_exceeds_cap(messages in prop::collection::vec("[a-z]{1,8}", 0..64)) {
            let mut set = SeenSet::new(8);
            for message in &messages {
                set.observe(Fingerprint::derive(FaultKind::Script, message, "op"));
            }
            prop_assert!(set.len() <= 8);
        }
    }
}
