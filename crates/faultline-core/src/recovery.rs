//! Recovery strategy pipeline.
//!
//! Strategies are tried in a fixed priority order and the first one that
//! reports success stops the pipeline:
//!
//! 1. Retry with exponential backoff (per-operation budget in the
//!    [`RetryLedger`]; the retry itself fires later via the engine timer,
//!    and a retry that fails re-enters the pipeline with its remaining
//!    backoff budget and the downstream strategies)
//! 2. Data refresh (host-supplied hook, invoked once)
//! 3. Restore from local cache
//! 4. Offline fallback (Network fault while offline; always available)
//! 5. Last-resort refresh prompt (Critical, high fault pressure; the
//!    explicit giving-up state, routed through the notification throttler)
//!
//! Hook failures are caught here and surfaced as strategy failures for the
//! `recovery_strategy_failed` event; they never re-enter the engine as new
//! faults. That is the anti-loop guarantee: a failure inside the error
//! handler must not call the error handler.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use tracing::{debug, trace};

use crate::config::EngineConfig;
use crate::error::RecoveryError;
use crate::fault::{FaultKind, FaultRecord, Severity};
use crate::host::{CacheStore, Host};

/// Session fault count above which the refresh prompt becomes applicable.
pub const PROMPT_FAULT_COUNT: u64 = 5;

/// A host-supplied retry or refresh action.
pub type HookFn = Box<dyn FnMut() -> Result<(), RecoveryError>>;

/// A host-supplied restore action receiving the cached value.
pub type RestoreFn = Box<dyn FnMut(&str) -> Result<(), RecoveryError>>;

/// Local recovery hooks attached to a reported fault.
///
/// Hooks are invoked by the pipeline (or later by the engine timer for
/// scheduled retries) and are never serialized.
#[derive(Default)]
pub struct RecoveryHooks {
    /// Re-runs the failed operation. Required for the backoff strategy.
    pub retry: Option<HookFn>,
    /// Re-fetches fresh data. Required for the data-refresh strategy.
    pub refresh: Option<HookFn>,
    /// Applies a cached value. Required for the cache-restore strategy.
    pub restore: Option<RestoreFn>,
}

impl RecoveryHooks {
    /// Creates an empty hook set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry hook.
    #[must_use]
    pub fn with_retry(mut self, hook: impl FnMut() -> Result<(), RecoveryError> + 'static) -> Self {
        self.retry = Some(Box::new(hook));
        self
    }

    /// Sets the refresh hook.
    #[must_use]
    pub fn with_refresh(
        mut self,
        hook: impl FnMut() -> Result<(), RecoveryError> + 'static,
    ) -> Self {
        self.refresh = Some(Box::new(hook));
        self
    }

    /// Sets the restore hook.
    #[must_use]
    pub fn with_restore(
        mut self,
        hook: impl FnMut(&str) -> Result<(), RecoveryError> + 'static,
    ) -> Self {
        self.restore = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for RecoveryHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryHooks")
            .field("retry", &self.retry.is_some())
            .field("refresh", &self.refresh.is_some())
            .field("restore", &self.restore.is_some())
            .finish()
    }
}

/// The strategies in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Retry with exponential backoff.
    RetryBackoff,
    /// Data refresh via host hook.
    DataRefresh,
    /// Restore from local cache.
    CacheRestore,
    /// Switch the host into degraded offline mode.
    OfflineFallback,
    /// Ask the user whether to reload.
    RefreshPrompt,
}

impl StrategyKind {
    /// Returns the stable strategy name used in lifecycle events.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RetryBackoff => "retry_backoff",
            Self::DataRefresh => "data_refresh",
            Self::CacheRestore => "cache_restore",
            Self::OfflineFallback => "offline_fallback",
            Self::RefreshPrompt => "refresh_prompt",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default bound on tracked operation keys.
pub const RETRY_LEDGER_CAP: usize = 256;

/// Per-operation retry accounting.
///
/// Keyed by operation key (derived from fault context, not fingerprint),
/// so distinct faults of the same operation share one budget. A key is
/// cleared on success; an exhausted key stays pinned at the cap until a
/// success clears it, so the budget cannot silently refresh mid-storm.
///
/// The ledger is bounded: when it is full, admitting a new key evicts the
/// oldest tracked key, whose pending retries are then abandoned by the
/// engine. This keeps a long session with many distinct failing operations
/// from growing the map without limit.
#[derive(Debug)]
pub struct RetryLedger {
    attempts: HashMap<String, u32>,
    order: VecDeque<String>,
    max_retries: u32,
    cap: usize,
}

impl RetryLedger {
    /// Creates a ledger with the given per-key attempt cap and the default
    /// key bound.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self::with_cap(max_retries, RETRY_LEDGER_CAP)
    }

    /// Creates a ledger bounded to at most `cap` tracked keys.
    #[must_use]
    pub fn with_cap(max_retries: u32, cap: usize) -> Self {
        Self {
            attempts: HashMap::new(),
            order: VecDeque::new(),
            max_retries,
            cap: cap.max(1),
        }
    }

    /// Returns the number of tracked operation keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    /// Returns `true` when no keys are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Claims the next attempt for `key`.
    ///
    /// Returns the zero-based attempt number, or `None` when the key has
    /// exhausted its budget (the strategy is then inapplicable, not failed).
    pub fn next_attempt(&mut self, key: &str) -> Option<u32> {
        if !self.attempts.contains_key(key) {
            while self.attempts.len() >= self.cap {
                let Some(oldest) = self.order.pop_front() else {
                    break;
                };
                self.attempts.remove(&oldest);
                debug!(operation_key = %oldest, "retry ledger full, evicted oldest key");
            }
            self.order.push_back(key.to_string());
        }
        let count = self.attempts.entry(key.to_string()).or_insert(0);
        if *count >= self.max_retries {
            return None;
        }
        let attempt = *count;
        *count += 1;
        Some(attempt)
    }

    /// Clears the key after a successful retry.
    ///
    /// Returns `true` if the key was tracked. Pending retries whose key has
    /// been cleared are abandoned by the engine rather than fired.
    pub fn record_success(&mut self, key: &str) -> bool {
        let removed = self.attempts.remove(key).is_some();
        if removed {
            self.order.retain(|tracked| tracked != key);
        }
        removed
    }

    /// Returns whether `key` currently holds ledger state.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.attempts.contains_key(key)
    }

    /// Returns the attempts consumed so far for `key`.
    #[must_use]
    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts.get(key).copied().unwrap_or(0)
    }
}

/// A claimed backoff slot: when the retry fires and which attempt it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledRetry {
    /// Operation key the retry belongs to.
    pub operation_key: String,
    /// Zero-based attempt number.
    pub attempt: u32,
    /// Monotonic due time in milliseconds.
    pub due_ms: u64,
}

/// A retry awaiting its due time on the engine timer.
///
/// Carries the fault record and the remaining hooks so that a retry which
/// fires and fails can re-enter the pipeline instead of dead-ending.
pub struct PendingRetry {
    /// Operation key the retry belongs to.
    pub operation_key: String,
    /// Monotonic due time in milliseconds.
    pub due_ms: u64,
    /// The fault being recovered.
    pub record: FaultRecord,
    /// The fault's recovery hooks, retry hook included.
    pub hooks: RecoveryHooks,
}

impl fmt::Debug for PendingRetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRetry")
            .field("operation_key", &self.operation_key)
            .field("due_ms", &self.due_ms)
            .field("fingerprint", &self.record.fingerprint)
            .finish_non_exhaustive()
    }
}

/// What the pipeline decided for one fault.
#[derive(Debug)]
pub enum PipelineDecision {
    /// A backoff retry was scheduled; the outcome is observed later.
    Scheduled(ScheduledRetry),
    /// A strategy reported synchronous success.
    Recovered(StrategyKind),
    /// The last-resort refresh prompt should be offered to the user.
    Prompt,
    /// No strategy applied or succeeded.
    Exhausted,
}

/// Pipeline result plus any hook failures encountered along the way.
#[derive(Debug)]
pub struct PipelineOutcome {
    /// The terminal decision.
    pub decision: PipelineDecision,
    /// Hook failures, one per failed strategy, in attempt order.
    pub failures: Vec<(StrategyKind, RecoveryError)>,
}

/// Live context the pipeline consults.
pub struct RecoveryContext<'a> {
    /// Current connectivity.
    pub is_online: bool,
    /// Total faults this session, including the one being handled.
    pub session_fault_count: u64,
    /// Current monotonic time in milliseconds.
    pub now_ms: u64,
    /// Local cache lookup for the restore strategy.
    pub cache: &'a dyn CacheStore,
    /// Host capabilities for the offline fallback.
    pub host: &'a dyn Host,
}

/// Ordered recovery strategy pipeline.
#[derive(Debug)]
pub struct RecoveryPipeline {
    ledger: RetryLedger,
    base_delay_ms: u64,
    multiplier: f64,
}

impl RecoveryPipeline {
    /// Creates a pipeline from the engine configuration.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            ledger: RetryLedger::new(config.max_retries),
            base_delay_ms: config.base_delay.as_millis() as u64,
            multiplier: config.retry_multiplier,
        }
    }

    /// Returns the retry ledger for inspection.
    #[must_use]
    pub const fn ledger(&self) -> &RetryLedger {
        &self.ledger
    }

    /// Mutable ledger access for the engine (success bookkeeping).
    pub fn ledger_mut(&mut self) -> &mut RetryLedger {
        &mut self.ledger
    }

    /// Backoff delay for a zero-based attempt number.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        #[allow(clippy::cast_possible_wrap)] // attempt count is bounded by max_retries
        let delay = self.base_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        delay as u64
    }

    /// Runs the pipeline for one admitted, non-duplicate fault.
    ///
    /// Refresh and restore hooks are invoked in place; the retry hook stays
    /// in `hooks` so the caller can park it alongside the record until the
    /// scheduled due time.
    pub fn attempt(
        &mut self,
        record: &FaultRecord,
        hooks: &mut RecoveryHooks,
        ctx: &RecoveryContext<'_>,
    ) -> PipelineOutcome {
        let mut failures = Vec::new();

        // 1. Retry with exponential backoff.
        if hooks.retry.is_some() {
            if let Some(key) = record.context.operation_key() {
                match self.ledger.next_attempt(&key) {
                    Some(attempt) => {
                        let delay = self.delay_for_attempt(attempt);
                        debug!(operation_key = %key, attempt, delay_ms = delay, "scheduled backoff retry");
                        return PipelineOutcome {
                            decision: PipelineDecision::Scheduled(ScheduledRetry {
                                operation_key: key,
                                attempt,
                                due_ms: ctx.now_ms + delay,
                            }),
                            failures,
                        };
                    }
                    None => {
                        trace!(operation_key = %key, "retry budget exhausted, falling through");
                    }
                }
            }
        }

        // 2. Data refresh.
        if let Some(refresh) = hooks.refresh.as_mut() {
            match refresh() {
                Ok(()) => {
                    debug!(fingerprint = %record.fingerprint, "data refresh recovered fault");
                    return PipelineOutcome {
                        decision: PipelineDecision::Recovered(StrategyKind::DataRefresh),
                        failures,
                    };
                }
                Err(err) => failures.push((StrategyKind::DataRefresh, err)),
            }
        }

        // 3. Restore from local cache.
        if let Some(restore) = hooks.restore.as_mut() {
            if let Some(cached) = record.context.cache_key().and_then(|k| ctx.cache.get(k)) {
                match restore(&cached) {
                    Ok(()) => {
                        debug!(fingerprint = %record.fingerprint, "cache restore recovered fault");
                        return PipelineOutcome {
                            decision: PipelineDecision::Recovered(StrategyKind::CacheRestore),
                            failures,
                        };
                    }
                    Err(err) => failures.push((StrategyKind::CacheRestore, err)),
                }
            }
        }

        // 4. Offline fallback: always available when the network is the problem.
        if record.kind == FaultKind::Network && !ctx.is_online {
            ctx.host.enter_offline_mode();
            debug!(fingerprint = %record.fingerprint, "switched host to offline mode");
            return PipelineOutcome {
                decision: PipelineDecision::Recovered(StrategyKind::OfflineFallback),
                failures,
            };
        }

        // 5. Last-resort refresh prompt: terminates the pipeline without
        // fixing anything.
        if record.severity == Severity::Critical && ctx.session_fault_count > PROMPT_FAULT_COUNT {
            debug!(fingerprint = %record.fingerprint, "offering last-resort refresh prompt");
            return PipelineOutcome {
                decision: PipelineDecision::Prompt,
                failures,
            };
        }

        PipelineOutcome {
            decision: PipelineDecision::Exhausted,
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::fault::FaultContext;
    use crate::fingerprint::Fingerprint;
    use crate::host::{MemoryCacheStore, NullHost};

    fn record(kind: FaultKind, severity: Severity, context: FaultContext) -> FaultRecord {
        FaultRecord {
            kind,
            raw_message: "test fault".to_string(),
            fingerprint: Fingerprint::derive(kind, "test fault", context.action()),
            context,
            timestamp_ms: 0,
            severity,
        }
    }

    fn ctx<'a>(cache: &'a MemoryCacheStore, host: &'a NullHost) -> RecoveryContext<'a> {
        RecoveryContext {
            is_online: true,
            session_fault_count: 1,
            now_ms: 0,
            cache,
            host,
        }
    }

    fn retryable_context() -> FaultContext {
        FaultContext::new().with("operation", "cart/sync")
    }

    #[test]
    fn test_backoff_delays_are_monotonic_then_exhaust() {
        let config = EngineConfig::default();
        let mut pipeline = RecoveryPipeline::new(&config);
        let cache = MemoryCacheStore::new();
        let host = NullHost;
        let rec = record(FaultKind::Rejection, Severity::Error, retryable_context());

        let mut delays = Vec::new();
        for _ in 0..3 {
            let mut hooks = RecoveryHooks::new().with_retry(|| Ok(()));
            let outcome = pipeline.attempt(&rec, &mut hooks, &ctx(&cache, &host));
            match outcome.decision {
                PipelineDecision::Scheduled(retry) => delays.push(retry.due_ms),
                other => panic!("expected scheduled retry, got {other:?}"),
            }
        }
        assert_eq!(delays, vec![1000, 2000, 4000]);

        // Fourth attempt: budget exhausted, strategy inapplicable, pipeline
        // falls through to the refresh strategy.
        let mut hooks = RecoveryHooks::new().with_retry(|| Ok(())).with_refresh(|| Ok(()));
        let outcome = pipeline.attempt(&rec, &mut hooks, &ctx(&cache, &host));
        assert!(matches!(
            outcome.decision,
            PipelineDecision::Recovered(StrategyKind::DataRefresh)
        ));
    }

    #[test]
    fn test_success_clears_operation_key() {
        let mut ledger = RetryLedger::new(3);
        assert_eq!(ledger.next_attempt("op"), Some(0));
        assert_eq!(ledger.next_attempt("op"), Some(1));
        assert!(ledger.record_success("op"));
        assert!(!ledger.contains("op"));
        // Budget is fresh again after a success.
        assert_eq!(ledger.next_attempt("op"), Some(0));
    }

    #[test]
    fn test_exhausted_key_stays_pinned() {
        let mut ledger = RetryLedger::new(2);
        assert_eq!(ledger.next_attempt("op"), Some(0));
        assert_eq!(ledger.next_attempt("op"), Some(1));
        assert_eq!(ledger.next_attempt("op"), None);
        assert_eq!(ledger.next_attempt("op"), None);
        assert_eq!(ledger.attempts("op"), 2);
    }

    #[test]
    fn test_ledger_evicts_oldest_key_under_pressure() {
        let mut ledger = RetryLedger::with_cap(3, 2);
        assert_eq!(ledger.next_attempt("a"), Some(0));
        assert_eq!(ledger.next_attempt("b"), Some(0));
        assert_eq!(ledger.len(), 2);

        // A third distinct key evicts the oldest tracked key.
        assert_eq!(ledger.next_attempt("c"), Some(0));
        assert_eq!(ledger.len(), 2);
        assert!(!ledger.contains("a"));
        assert!(ledger.contains("b"));
        assert!(ledger.contains("c"));

        // An evicted key re-enters with a fresh budget.
        assert_eq!(ledger.next_attempt("a"), Some(0));
        assert!(!ledger.contains("b"));
    }

    #[test]
    fn test_refresh_invoked_once() {
        let config = EngineConfig::default();
        let mut pipeline = RecoveryPipeline::new(&config);
        let cache = MemoryCacheStore::new();
        let host = NullHost;
        let rec = record(FaultKind::Component, Severity::Error, FaultContext::new());

        let calls = Rc::new(Cell::new(0u32));
        let counted = Rc::clone(&calls);
        let mut hooks = RecoveryHooks::new().with_refresh(move || {
            counted.set(counted.get() + 1);
            Ok(())
        });

        let outcome = pipeline.attempt(&rec, &mut hooks, &ctx(&cache, &host));
        assert!(matches!(
            outcome.decision,
            PipelineDecision::Recovered(StrategyKind::DataRefresh)
        ));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_failed_refresh_falls_through_to_cache_restore() {
        let config = EngineConfig::default();
        let mut pipeline = RecoveryPipeline::new(&config);
        let cache = MemoryCacheStore::new();
        cache.put("cart", r#"{"items":3}"#);
        let host = NullHost;
        let rec = record(
            FaultKind::Component,
            Severity::Error,
            FaultContext::new().with("cache_key", "cart"),
        );

        let restored = Rc::new(Cell::new(false));
        let seen = Rc::clone(&restored);
        let mut hooks = RecoveryHooks::new()
            .with_refresh(|| Err(RecoveryError::hook("backend unavailable")))
            .with_restore(move |value| {
                assert_eq!(value, r#"{"items":3}"#);
                seen.set(true);
                Ok(())
            });

        let outcome = pipeline.attempt(&rec, &mut hooks, &ctx(&cache, &host));
        assert!(matches!(
            outcome.decision,
            PipelineDecision::Recovered(StrategyKind::CacheRestore)
        ));
        assert!(restored.get());
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, StrategyKind::DataRefresh);
    }

    #[test]
    fn test_cache_restore_inapplicable_without_cached_value() {
        let config = EngineConfig::default();
        let mut pipeline = RecoveryPipeline::new(&config);
        let cache = MemoryCacheStore::new();
        let host = NullHost;
        let rec = record(
            FaultKind::Component,
            Severity::Error,
            FaultContext::new().with("cache_key", "missing"),
        );

        let mut hooks = RecoveryHooks::new().with_restore(|_| panic!("must not be invoked"));
        let outcome = pipeline.attempt(&rec, &mut hooks, &ctx(&cache, &host));
        assert!(matches!(outcome.decision, PipelineDecision::Exhausted));
    }

    #[test]
    fn test_offline_fallback_for_offline_network_fault() {
        let config = EngineConfig::default();
        let mut pipeline = RecoveryPipeline::new(&config);
        let cache = MemoryCacheStore::new();
        let host = NullHost;
        let rec = record(FaultKind::Network, Severity::Warning, FaultContext::new());

        let mut context = ctx(&cache, &host);
        context.is_online = false;
        let mut hooks = RecoveryHooks::new();
        let outcome = pipeline.attempt(&rec, &mut hooks, &context);
        assert!(matches!(
            outcome.decision,
            PipelineDecision::Recovered(StrategyKind::OfflineFallback)
        ));
    }

    #[test]
    fn test_prompt_requires_critical_and_fault_pressure() {
        let config = EngineConfig::default();
        let mut pipeline = RecoveryPipeline::new(&config);
        let cache = MemoryCacheStore::new();
        let host = NullHost;

        let critical = record(FaultKind::Script, Severity::Critical, FaultContext::new());
        let mut context = ctx(&cache, &host);

        // Critical but low pressure: exhausted.
        context.session_fault_count = PROMPT_FAULT_COUNT;
        let outcome = pipeline.attempt(&critical, &mut RecoveryHooks::new(), &context);
        assert!(matches!(outcome.decision, PipelineDecision::Exhausted));

        // Critical and high pressure: prompt.
        context.session_fault_count = PROMPT_FAULT_COUNT + 1;
        let outcome = pipeline.attempt(&critical, &mut RecoveryHooks::new(), &context);
        assert!(matches!(outcome.decision, PipelineDecision::Prompt));

        // High pressure but non-critical: exhausted.
        let plain = record(FaultKind::Script, Severity::Error, FaultContext::new());
        let outcome = pipeline.attempt(&plain, &mut RecoveryHooks::new(), &context);
        assert!(matches!(outcome.decision, PipelineDecision::Exhausted));
    }

    #[test]
    fn test_retry_without_operation_key_is_inapplicable() {
        let config = EngineConfig::default();
        let mut pipeline = RecoveryPipeline::new(&config);
        let cache = MemoryCacheStore::new();
        let host = NullHost;
        let rec = record(FaultKind::Rejection, Severity::Error, FaultContext::new());

        let mut hooks = RecoveryHooks::new().with_retry(|| Ok(()));
        let outcome = pipeline.attempt(&rec, &mut hooks, &ctx(&cache, &host));
        assert!(matches!(outcome.decision, PipelineDecision::Exhausted));
        // The hook was not consumed.
        assert!(hooks.retry.is_some());
    }
}
