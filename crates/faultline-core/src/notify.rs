//! Notification throttling.
//!
//! The engine decides *whether* a fault becomes a user-facing message; the
//! passive renderer collaborator does the drawing. At most
//! `max_notifications_per_session` messages are shown per session, at most
//! one notification is visible per severity tier at a time, and raw error
//! messages are never shown — every kind maps to a fixed user-facing
//! string.
//!
//! Non-critical notifications carry an auto-dismiss deadline; Critical
//! notifications require explicit user action. Dismissal (auto or manual)
//! frees the per-tier slot but never refunds the session budget.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::fault::{FaultKind, Severity};

/// Fixed user-facing message for a fault kind. Raw messages never surface.
#[must_use]
pub const fn user_message(kind: FaultKind) -> &'static str {
    match kind {
        FaultKind::Script => "Something went wrong. The problem has been reported.",
        FaultKind::Rejection => "An operation could not be completed. Please try again.",
        FaultKind::Resource => "Some content failed to load.",
        FaultKind::Component => "Part of the page stopped responding and was reset.",
        FaultKind::Network => "Connection problem. Check your network and try again.",
        FaultKind::Environment => "Your browser is missing a feature this page needs.",
    }
}

/// An action the renderer offers alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    /// Close the notification.
    Dismiss,
    /// Reload the page via the host capability.
    Reload,
}

/// A notification request handed to the renderer.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    /// Identity used for dismissal callbacks.
    pub id: Uuid,
    /// Severity tier occupying the visible slot.
    pub severity: Severity,
    /// Fixed user-facing message.
    pub message: &'static str,
    /// Offered actions.
    pub actions: Vec<NotificationAction>,
    /// Auto-dismiss deadline in monotonic milliseconds; `None` for
    /// Critical (explicit dismissal required).
    pub auto_dismiss_at_ms: Option<u64>,
}

/// Why a notification was suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// The fault is a repeat of an already-seen fingerprint.
    Duplicate,
    /// The per-session budget is spent.
    BudgetSpent,
    /// A notification of the same tier is already visible.
    TierOccupied,
}

/// Outcome of a notification request.
#[derive(Debug)]
pub enum NotifyOutcome {
    /// The notification should be rendered.
    Shown(Notification),
    /// The notification was withheld.
    Suppressed(SuppressReason),
}

/// Per-session notification budget and visible-slot accounting.
#[derive(Debug)]
pub struct NotificationThrottler {
    shown: u32,
    max_per_session: u32,
    duration_ms: u64,
    visible: HashMap<Severity, Uuid>,
    deadlines: Vec<(Uuid, u64)>,
}

impl NotificationThrottler {
    /// Creates a throttler from the engine configuration.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            shown: 0,
            max_per_session: config.max_notifications_per_session,
            duration_ms: config.notification_duration.as_millis() as u64,
            visible: HashMap::new(),
            deadlines: Vec::new(),
        }
    }

    /// Returns how many notifications have been shown this session.
    #[must_use]
    pub const fn shown(&self) -> u32 {
        self.shown
    }

    /// Requests a user-facing notification for a fault.
    ///
    /// Suppressed when the fault is a duplicate, the session budget is
    /// spent, or the tier slot is occupied — in that order.
    pub fn request(
        &mut self,
        kind: FaultKind,
        severity: Severity,
        duplicate: bool,
        actions: Vec<NotificationAction>,
        now_ms: u64,
    ) -> NotifyOutcome {
        if duplicate {
            return NotifyOutcome::Suppressed(SuppressReason::Duplicate);
        }
        if self.shown >= self.max_per_session {
            debug!(shown = self.shown, "notification budget spent, suppressing");
            return NotifyOutcome::Suppressed(SuppressReason::BudgetSpent);
        }
        if self.visible.contains_key(&severity) {
            return NotifyOutcome::Suppressed(SuppressReason::TierOccupied);
        }

        let id = Uuid::new_v4();
        let auto_dismiss_at_ms = if severity == Severity::Critical {
            None
        } else {
            Some(now_ms + self.duration_ms)
        };

        self.shown += 1;
        self.visible.insert(severity, id);
        if let Some(deadline) = auto_dismiss_at_ms {
            self.deadlines.push((id, deadline));
        }

        debug!(%id, %severity, shown = self.shown, "notification shown");
        NotifyOutcome::Shown(Notification {
            id,
            severity,
            message: user_message(kind),
            actions,
            auto_dismiss_at_ms,
        })
    }

    /// Frees the visible slot for `id`. Budget is never refunded.
    ///
    /// Returns `true` if the id was visible.
    pub fn dismiss(&mut self, id: Uuid) -> bool {
        let Some(severity) = self
            .visible
            .iter()
            .find_map(|(sev, vid)| (*vid == id).then_some(*sev))
        else {
            return false;
        };
        self.visible.remove(&severity);
        self.deadlines.retain(|(vid, _)| *vid != id);
        debug!(%id, %severity, "notification dismissed");
        true
    }

    /// Auto-dismisses notifications whose deadline has passed.
    ///
    /// Returns the ids that were dismissed.
    pub fn poll(&mut self, now_ms: u64) -> Vec<Uuid> {
        let due: Vec<Uuid> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| *deadline <= now_ms)
            .map(|(id, _)| *id)
            .collect();
        for id in &due {
            self.dismiss(*id);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttler(max: u32) -> NotificationThrottler {
        NotificationThrottler::new(&EngineConfig::default().with_max_notifications(max))
    }

    #[test]
    fn test_budget_suppresses_fourth_notification() {
        let mut t = throttler(3);
        let severities = [Severity::Error, Severity::Warning, Severity::Critical];
        for severity in severities {
            let outcome = t.request(FaultKind::Script, severity, false, vec![], 0);
            assert!(matches!(outcome, NotifyOutcome::Shown(_)));
        }
        // Fourth otherwise-eligible fault, fresh tier slot and all.
        let mut t2 = t;
        t2.visible.clear();
        let outcome = t2.request(FaultKind::Script, Severity::Error, false, vec![], 0);
        assert!(matches!(
            outcome,
            NotifyOutcome::Suppressed(SuppressReason::BudgetSpent)
        ));
    }

    #[test]
    fn test_duplicates_are_suppressed_first() {
        let mut t = throttler(3);
        let outcome = t.request(FaultKind::Script, Severity::Error, true, vec![], 0);
        assert!(matches!(
            outcome,
            NotifyOutcome::Suppressed(SuppressReason::Duplicate)
        ));
        assert_eq!(t.shown(), 0);
    }

    #[test]
    fn test_one_visible_notification_per_tier() {
        let mut t = throttler(10);
        let first = t.request(FaultKind::Script, Severity::Error, false, vec![], 0);
        assert!(matches!(first, NotifyOutcome::Shown(_)));

        let second = t.request(FaultKind::Network, Severity::Error, false, vec![], 0);
        assert!(matches!(
            second,
            NotifyOutcome::Suppressed(SuppressReason::TierOccupied)
        ));

        // A different tier is fine.
        let critical = t.request(FaultKind::Script, Severity::Critical, false, vec![], 0);
        assert!(matches!(critical, NotifyOutcome::Shown(_)));
    }

    #[test]
    fn test_dismissal_frees_slot_but_not_budget() {
        let mut t = throttler(2);
        let NotifyOutcome::Shown(n) = t.request(FaultKind::Script, Severity::Error, false, vec![], 0)
        else {
            panic!("expected shown");
        };
        assert!(t.dismiss(n.id));
        assert_eq!(t.shown(), 1);

        // Slot is free again.
        let outcome = t.request(FaultKind::Script, Severity::Error, false, vec![], 0);
        assert!(matches!(outcome, NotifyOutcome::Shown(_)));

        // Budget is spent after two shows regardless of dismissals.
        let outcome = t.request(FaultKind::Script, Severity::Warning, false, vec![], 0);
        assert!(matches!(
            outcome,
            NotifyOutcome::Suppressed(SuppressReason::BudgetSpent)
        ));
    }

    #[test]
    fn test_critical_never_auto_dismisses() {
        let mut t = throttler(3);
        let NotifyOutcome::Shown(n) =
            t.request(FaultKind::Script, Severity::Critical, false, vec![], 100)
        else {
            panic!("expected shown");
        };
        assert_eq!(n.auto_dismiss_at_ms, None);

        // No amount of clock advancement dismisses it.
        assert!(t.poll(u64::MAX).is_empty());
    }

    #[test]
    fn test_auto_dismiss_deadline_applies_to_non_critical() {
        let mut t = throttler(3);
        let NotifyOutcome::Shown(n) = t.request(FaultKind::Network, Severity::Error, false, vec![], 100)
        else {
            panic!("expected shown");
        };
        assert_eq!(n.auto_dismiss_at_ms, Some(5100));

        assert!(t.poll(5099).is_empty());
        assert_eq!(t.poll(5100), vec![n.id]);

        // Slot is free after auto-dismiss.
        let outcome = t.request(FaultKind::Network, Severity::Error, false, vec![], 6000);
        assert!(matches!(outcome, NotifyOutcome::Shown(_)));
    }

    #[test]
    fn test_raw_messages_never_surface() {
        // The message is a pure mapping from kind; there is no API through
        // which a raw message reaches the notification.
        assert_eq!(
            user_message(FaultKind::Network),
            "Connection problem. Check your network and try again."
        );
    }
}
