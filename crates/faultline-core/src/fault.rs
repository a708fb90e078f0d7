//! Fault taxonomy and record types.
//!
//! A *fault* is any captured runtime anomaly: a script error, a rejected
//! asynchronous operation, a failed resource load, a degraded component,
//! a network failure, or a missing host capability. Host adapters wrap the
//! native events and feed the engine [`Fault`] values; the engine freezes
//! each into an immutable [`FaultRecord`] at classification time.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;
use crate::recovery::RecoveryHooks;

/// Well-known context key naming the user action that triggered the fault.
pub const CTX_ACTION: &str = "action";
/// Well-known context key naming the component that reported the fault.
pub const CTX_COMPONENT: &str = "component";
/// Well-known context key naming the retryable operation.
pub const CTX_OPERATION: &str = "operation";
/// Well-known context key naming a local cache entry usable for restore.
pub const CTX_CACHE_KEY: &str = "cache_key";

/// Classification of what kind of runtime anomaly was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Synchronous script error.
    Script,
    /// Unhandled rejection of an asynchronous operation.
    Rejection,
    /// Failed resource load (image, stylesheet, chunk).
    Resource,
    /// Degraded component lifecycle.
    Component,
    /// Network or transport failure.
    Network,
    /// Missing host capability (absent fetch/storage APIs).
    Environment,
}

impl FaultKind {
    /// Returns the stable string form used in fingerprints and telemetry.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Rejection => "rejection",
            Self::Resource => "resource",
            Self::Component => "component",
            Self::Network => "network",
            Self::Environment => "environment",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity tier assigned by the classifier. Ordered: `Info < Warning <
/// Error < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational; never surfaced to the user.
    Info,
    /// Expected or low-impact condition.
    Warning,
    /// A defect worth surfacing.
    Error,
    /// A defect that blocks the session.
    Critical,
}

impl Severity {
    /// Escalates one tier, capped at `Critical`.
    #[must_use]
    pub const fn escalate(self) -> Self {
        match self {
            Self::Info => Self::Warning,
            Self::Warning => Self::Error,
            Self::Error | Self::Critical => Self::Critical,
        }
    }

    /// Returns the stable string form for telemetry.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied context for a fault: an ordered string map with a few
/// recognized keys (`action`, `component`, `operation`, `cache_key`).
///
/// Recovery hooks are carried separately on [`Fault`]; only string entries
/// are serialized into outgoing telemetry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaultContext {
    entries: BTreeMap<String, String>,
}

impl FaultContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Looks up an entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Returns the triggering action, or `""` when absent. The action
    /// participates in the fault fingerprint.
    #[must_use]
    pub fn action(&self) -> &str {
        self.get(CTX_ACTION).unwrap_or("")
    }

    /// Returns the cache key usable for a cache-restore attempt.
    #[must_use]
    pub fn cache_key(&self) -> Option<&str> {
        self.get(CTX_CACHE_KEY)
    }

    /// Derives the retry-ledger operation key.
    ///
    /// The explicit `operation` entry wins; otherwise the key is the
    /// `component`/`action` pair. Operation keys deliberately differ from
    /// fingerprints: distinct faults of the same operation share one retry
    /// budget.
    #[must_use]
    pub fn operation_key(&self) -> Option<String> {
        if let Some(op) = self.get(CTX_OPERATION) {
            return Some(op.to_string());
        }
        let action = self.action();
        if action.is_empty() {
            return None;
        }
        match self.get(CTX_COMPONENT) {
            Some(component) => Some(format!("{component}/{action}")),
            None => Some(action.to_string()),
        }
    }

    /// Iterates over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A captured fault as reported by a host adapter, before classification.
///
/// Recovery hooks are local-only closures; they are invoked by the recovery
/// pipeline and never serialized.
pub struct Fault {
    /// What kind of anomaly this is.
    pub kind: FaultKind,
    /// The raw message, including any stack trace lines. Never shown to
    /// end users.
    pub raw_message: String,
    /// Caller-supplied context.
    pub context: FaultContext,
    /// Local recovery hooks.
    pub hooks: RecoveryHooks,
}

impl Fault {
    /// Creates a fault with empty context and no hooks.
    #[must_use]
    pub fn new(kind: FaultKind, raw_message: impl Into<String>) -> Self {
        Self {
            kind,
            raw_message: raw_message.into(),
            context: FaultContext::new(),
            hooks: RecoveryHooks::default(),
        }
    }

    /// Attaches context.
    #[must_use]
    pub fn with_context(mut self, context: FaultContext) -> Self {
        self.context = context;
        self
    }

    /// Attaches recovery hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: RecoveryHooks) -> Self {
        self.hooks = hooks;
        self
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("kind", &self.kind)
            .field("raw_message", &self.raw_message)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Immutable snapshot of one classified fault.
///
/// Created once at capture time and read-only thereafter; referenced by the
/// seen-set, the recovery pipeline, and the delivery queue.
#[derive(Debug, Clone, Serialize)]
pub struct FaultRecord {
    /// What kind of anomaly this is.
    pub kind: FaultKind,
    /// The raw message. Sanitized before it leaves the process.
    pub raw_message: String,
    /// Caller-supplied context entries.
    pub context: FaultContext,
    /// Monotonic capture timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// Deduplication identity.
    pub fingerprint: Fingerprint,
    /// Severity assigned by the classifier; immutable after assignment.
    pub severity: Severity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering_and_escalation() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);

        assert_eq!(Severity::Info.escalate(), Severity::Warning);
        assert_eq!(Severity::Error.escalate(), Severity::Critical);
        assert_eq!(Severity::Critical.escalate(), Severity::Critical);
    }

    #[test]
    fn test_operation_key_prefers_explicit_operation() {
        let ctx = FaultContext::new()
            .with(CTX_OPERATION, "cart/sync")
            .with(CTX_ACTION, "checkout")
            .with(CTX_COMPONENT, "Cart");
        assert_eq!(ctx.operation_key().as_deref(), Some("cart/sync"));
    }

    #[test]
    fn test_operation_key_falls_back_to_component_action() {
        let ctx = FaultContext::new()
            .with(CTX_ACTION, "checkout")
            .with(CTX_COMPONENT, "Cart");
        assert_eq!(ctx.operation_key().as_deref(), Some("Cart/checkout"));

        let ctx = FaultContext::new().with(CTX_ACTION, "checkout");
        assert_eq!(ctx.operation_key().as_deref(), Some("checkout"));
    }

    #[test]
    fn test_operation_key_absent_without_action() {
        let ctx = FaultContext::new().with(CTX_COMPONENT, "Cart");
        assert_eq!(ctx.operation_key(), None);
    }

    #[test]
    fn test_context_serializes_as_plain_map() {
        let ctx = FaultContext::new().with("action", "checkout");
        let json = serde_json::to_string(&ctx).expect("serialize");
        assert_eq!(json, r#"{"action":"checkout"}"#);
    }
}
