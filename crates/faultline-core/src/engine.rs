//! The resilience engine facade.
//!
//! One [`ResilienceEngine`] instance owns all mutable state — seen-set,
//! retry ledger, circuit state, notification budget, delivery queue — and
//! wires the components into the processing path:
//!
//! ```text
//! report_fault
//!     ├── fingerprint + seen-set (duplicate?)
//!     ├── severity classifier
//!     ├── circuit breaker gate
//!     ├── delivery batcher (always; duplicates carry frequency data)
//!     ├── recovery pipeline        (skipped for duplicates / throttled)
//!     └── notification throttler   (skipped for duplicates / throttled)
//! ```
//!
//! The engine is a terminal sink: nothing reported into it is re-thrown,
//! and failures inside recovery hooks or the transport are logged and
//! absorbed. There are no globals; multiple isolated instances can coexist,
//! which is how the tests run.
//!
//! Work is driven by fault arrivals, the two environment signals, and
//! [`ResilienceEngine::poll_timers`], which services backoff due-times, the
//! breaker cool-down, notification auto-dismiss deadlines, and the periodic
//! flush — all against the injected [`Clock`].

use std::sync::Arc;

use tracing::{debug, trace};
use uuid::Uuid;

use crate::batcher::{DeliveredFault, DeliveryBatcher, FlushResult};
use crate::breaker::{Admission, CircuitBreaker, CircuitMode, CircuitTransition};
use crate::classify::classify;
use crate::config::EngineConfig;
use crate::events::EngineEvent;
use crate::fault::{Fault, FaultKind, FaultRecord, Severity};
use crate::fingerprint::{Fingerprint, SeenSet};
use crate::host::{
    CacheStore, Clock, EventSink, Host, MonotonicClock, NullHost, NullRenderer, NullTransport,
    Renderer, TracingEventSink, Transport,
};
use crate::notify::{NotificationAction, NotificationThrottler, NotifyOutcome};
use crate::recovery::{
    PendingRetry, PipelineDecision, RecoveryContext, RecoveryHooks, RecoveryPipeline, StrategyKind,
};
use crate::sanitize::Sanitizer;

/// How a fault's recovery ended up, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryStatus {
    /// A backoff retry was scheduled; outcome observed on a later tick.
    Scheduled {
        /// Operation key the retry belongs to.
        operation_key: String,
        /// When the retry fires, in monotonic milliseconds.
        due_ms: u64,
    },
    /// A strategy reported success.
    Recovered {
        /// Stable strategy name.
        strategy: &'static str,
    },
    /// No strategy applied or succeeded.
    Exhausted,
}

/// What the engine did with one reported fault.
#[derive(Debug)]
pub struct FaultReport {
    /// Fingerprint token.
    pub fingerprint: String,
    /// Assigned severity.
    pub severity: Severity,
    /// Whether this was a repeat of a known fingerprint.
    pub duplicate: bool,
    /// Whether the breaker limited handling to delivery only.
    pub throttled: bool,
    /// Recovery outcome; `None` when recovery was skipped.
    pub recovery: Option<RecoveryStatus>,
    /// Id of the notification shown for this fault, if any.
    pub notification: Option<Uuid>,
}

/// Builder for [`ResilienceEngine`].
///
/// Every collaborator has a working default (monotonic clock, no-op host
/// and renderer, discarding transport, tracing event sink), so
/// `ResilienceEngine::builder().build()` yields a self-contained engine.
pub struct EngineBuilder {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    host: Arc<dyn Host>,
    renderer: Arc<dyn Renderer>,
    cache: Option<Arc<dyn CacheStore>>,
    transport: Arc<dyn Transport>,
    events: Arc<dyn EventSink>,
}

impl EngineBuilder {
    fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            clock: Arc::new(MonotonicClock::new()),
            host: Arc::new(NullHost),
            renderer: Arc::new(NullRenderer),
            cache: None,
            transport: Arc::new(NullTransport),
            events: Arc::new(TracingEventSink),
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the host capabilities.
    #[must_use]
    pub fn host(mut self, host: Arc<dyn Host>) -> Self {
        self.host = host;
        self
    }

    /// Sets the notification renderer.
    #[must_use]
    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Sets the local cache store.
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the collector transport.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Sets the lifecycle event sink.
    #[must_use]
    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Builds the engine.
    #[must_use]
    pub fn build(self) -> ResilienceEngine {
        let cache: Arc<dyn CacheStore> = self
            .cache
            .unwrap_or_else(|| Arc::new(crate::host::MemoryCacheStore::new()));
        ResilienceEngine {
            seen: SeenSet::new(self.config.seen_set_cap),
            breaker: CircuitBreaker::new(&self.config),
            pipeline: RecoveryPipeline::new(&self.config),
            throttler: NotificationThrottler::new(&self.config),
            sanitizer: Sanitizer::new(),
            batcher: DeliveryBatcher::new(&self.config),
            pending_retries: Vec::new(),
            session_fault_count: 0,
            is_online: true,
            config: self.config,
            clock: self.clock,
            host: self.host,
            renderer: self.renderer,
            cache,
            transport: self.transport,
            events: self.events,
        }
    }
}

/// Client-side error resilience and recovery engine.
pub struct ResilienceEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    host: Arc<dyn Host>,
    renderer: Arc<dyn Renderer>,
    cache: Arc<dyn CacheStore>,
    transport: Arc<dyn Transport>,
    events: Arc<dyn EventSink>,

    seen: SeenSet,
    breaker: CircuitBreaker,
    pipeline: RecoveryPipeline,
    throttler: NotificationThrottler,
    sanitizer: Sanitizer,
    batcher: DeliveryBatcher,
    pending_retries: Vec<PendingRetry>,

    session_fault_count: u64,
    is_online: bool,
}

impl ResilienceEngine {
    /// Starts building an engine.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Returns the engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns total faults reported this session.
    #[must_use]
    pub const fn session_fault_count(&self) -> u64 {
        self.session_fault_count
    }

    /// Returns the current breaker mode.
    #[must_use]
    pub const fn circuit_mode(&self) -> CircuitMode {
        self.breaker.mode()
    }

    /// Returns the current connectivity assumption.
    #[must_use]
    pub const fn is_online(&self) -> bool {
        self.is_online
    }

    /// Returns how many records await delivery.
    #[must_use]
    pub fn queued_for_delivery(&self) -> usize {
        self.batcher.len()
    }

    /// Returns the retry ledger for inspection.
    #[must_use]
    pub const fn retry_ledger(&self) -> &crate::recovery::RetryLedger {
        self.pipeline.ledger()
    }

    /// Primary entry point: processes one captured fault.
    ///
    /// Never fails and never re-throws; the returned [`FaultReport`]
    /// describes what was done.
    pub async fn report_fault(&mut self, fault: Fault) -> FaultReport {
        let now_ms = self.clock.now_ms();
        self.session_fault_count += 1;

        let Fault {
            kind,
            raw_message,
            context,
            hooks,
        } = fault;

        let fingerprint = Fingerprint::derive(kind, &raw_message, context.action());
        let duplicate = self.seen.observe(fingerprint);
        let severity = classify(kind, &raw_message, self.is_online, self.session_fault_count);
        self.events.emit(&EngineEvent::FaultClassified {
            fingerprint: fingerprint.to_string(),
            kind,
            severity,
            duplicate,
        });

        let record = FaultRecord {
            kind,
            raw_message,
            context,
            timestamp_ms: now_ms,
            fingerprint,
            severity,
        };

        // Every fault feeds the breaker window, duplicates included.
        let (admission, transition) = self.breaker.admit(severity, now_ms);
        self.emit_transition(transition);
        let throttled = admission == Admission::DeliverOnly;

        // Every fault is delivered; repeats give the collector frequency
        // data even when local handling is skipped.
        let batch_full = self
            .batcher
            .enqueue(DeliveredFault::sanitize(&record, &self.sanitizer));
        if batch_full {
            self.flush().await;
        }

        if duplicate || throttled {
            trace!(
                fingerprint = %record.fingerprint,
                duplicate,
                throttled,
                "fault queued for delivery only"
            );
            return FaultReport {
                fingerprint: record.fingerprint.to_string(),
                severity,
                duplicate,
                throttled,
                recovery: None,
                notification: None,
            };
        }

        let fingerprint = record.fingerprint.to_string();
        let (recovery, notification) = self.resolve_recovery(record, hooks, now_ms);

        FaultReport {
            fingerprint,
            severity,
            duplicate,
            throttled,
            recovery: Some(recovery),
            notification,
        }
    }

    /// Runs one pipeline pass for a fault and applies its outcome: parks a
    /// scheduled retry, emits the lifecycle events, and decides visibility.
    ///
    /// Called from `report_fault` for fresh faults and from the retry timer
    /// when a fired retry fails, which is how a failing backoff ladder
    /// eventually falls through to the downstream strategies.
    fn resolve_recovery(
        &mut self,
        record: FaultRecord,
        mut hooks: RecoveryHooks,
        now_ms: u64,
    ) -> (RecoveryStatus, Option<Uuid>) {
        let kind = record.kind;
        let severity = record.severity;
        let fingerprint = record.fingerprint.to_string();

        let outcome = {
            let ctx = RecoveryContext {
                is_online: self.is_online,
                session_fault_count: self.session_fault_count,
                now_ms,
                cache: self.cache.as_ref(),
                host: self.host.as_ref(),
            };
            self.pipeline.attempt(&record, &mut hooks, &ctx)
        };
        for (strategy, err) in &outcome.failures {
            self.events.emit(&EngineEvent::RecoveryStrategyFailed {
                strategy: strategy.as_str(),
                reason: err.to_string(),
            });
        }

        let mut prompt = false;
        let recovery = match outcome.decision {
            PipelineDecision::Scheduled(scheduled) => {
                let status = RecoveryStatus::Scheduled {
                    operation_key: scheduled.operation_key.clone(),
                    due_ms: scheduled.due_ms,
                };
                self.pending_retries.push(PendingRetry {
                    operation_key: scheduled.operation_key,
                    due_ms: scheduled.due_ms,
                    record,
                    hooks,
                });
                status
            }
            PipelineDecision::Recovered(strategy) => {
                self.events.emit(&EngineEvent::RecoverySucceeded {
                    strategy: strategy.as_str(),
                    fingerprint: fingerprint.clone(),
                });
                RecoveryStatus::Recovered {
                    strategy: strategy.as_str(),
                }
            }
            PipelineDecision::Prompt => {
                prompt = true;
                // The prompt terminates the pipeline without fixing
                // anything; it is the explicit giving-up state.
                self.events.emit(&EngineEvent::RecoverySucceeded {
                    strategy: StrategyKind::RefreshPrompt.as_str(),
                    fingerprint: fingerprint.clone(),
                });
                RecoveryStatus::Recovered {
                    strategy: StrategyKind::RefreshPrompt.as_str(),
                }
            }
            PipelineDecision::Exhausted => {
                self.events.emit(&EngineEvent::RecoveryExhausted {
                    fingerprint: fingerprint.clone(),
                });
                RecoveryStatus::Exhausted
            }
        };

        let notification = if prompt {
            self.show_notification(
                kind,
                severity,
                vec![NotificationAction::Reload, NotificationAction::Dismiss],
                now_ms,
            )
        } else if Self::notification_eligible(severity, &recovery) {
            self.show_notification(kind, severity, vec![NotificationAction::Dismiss], now_ms)
        } else {
            None
        };

        (recovery, notification)
    }

    /// Environment signal: connectivity changed.
    ///
    /// An offline→online transition flushes the delivery queue.
    pub async fn connectivity_changed(&mut self, is_online: bool) {
        let was_online = self.is_online;
        self.is_online = is_online;
        if !was_online && is_online && !self.batcher.is_empty() {
            debug!(queued = self.batcher.len(), "back online, flushing delivery queue");
            let _ = self.batcher.flush_all(self.transport.as_ref()).await;
        }
    }

    /// Environment signal: page visibility changed.
    ///
    /// Hiding the page triggers a best-effort, fire-and-forget flush.
    pub async fn visibility_changed(&mut self, hidden: bool) {
        if hidden && !self.batcher.is_empty() {
            debug!(queued = self.batcher.len(), "page hidden, best-effort flush");
            let _ = self.batcher.flush_all(self.transport.as_ref()).await;
        }
    }

    /// Renderer callback: the user (or the auto-dismiss timer) closed a
    /// notification. Frees the per-tier slot.
    pub fn dismiss(&mut self, notification_id: Uuid) -> bool {
        self.throttler.dismiss(notification_id)
    }

    /// Services every engine timer against the injected clock: breaker
    /// cool-down, notification auto-dismiss, due backoff retries, and the
    /// periodic flush.
    pub async fn poll_timers(&mut self) {
        let now_ms = self.clock.now_ms();

        let transition = self.breaker.poll(now_ms);
        self.emit_transition(transition);

        for id in self.throttler.poll(now_ms) {
            trace!(%id, "notification auto-dismissed");
        }

        self.fire_due_retries(now_ms);

        if self.batcher.poll_due(now_ms) {
            self.flush().await;
        }
    }

    /// Flushes one batch to the collector. Transport failures re-queue the
    /// batch; they are absorbed here, never propagated.
    pub async fn flush(&mut self) -> FlushResult {
        self.batcher.flush(self.transport.as_ref()).await
    }

    fn fire_due_retries(&mut self, now_ms: u64) {
        if self.pending_retries.is_empty() {
            return;
        }
        let due: Vec<PendingRetry> = {
            let mut remaining = Vec::with_capacity(self.pending_retries.len());
            let mut due = Vec::new();
            for retry in self.pending_retries.drain(..) {
                if retry.due_ms <= now_ms {
                    due.push(retry);
                } else {
                    remaining.push(retry);
                }
            }
            self.pending_retries = remaining;
            due
        };

        for mut retry in due {
            // A later success or ledger eviction cleared the key: the
            // pending retry is abandoned, not fired.
            if !self.pipeline.ledger().contains(&retry.operation_key) {
                trace!(operation_key = %retry.operation_key, "abandoning stale retry");
                continue;
            }
            let Some(hook) = retry.hooks.retry.as_mut() else {
                continue;
            };
            match hook() {
                Ok(()) => {
                    self.pipeline.ledger_mut().record_success(&retry.operation_key);
                    self.events.emit(&EngineEvent::RecoverySucceeded {
                        strategy: StrategyKind::RetryBackoff.as_str(),
                        fingerprint: retry.record.fingerprint.to_string(),
                    });
                }
                Err(err) => {
                    self.events.emit(&EngineEvent::RecoveryStrategyFailed {
                        strategy: StrategyKind::RetryBackoff.as_str(),
                        reason: err.to_string(),
                    });
                    // The failed retry re-enters the pipeline: remaining
                    // backoff budget first, then the downstream strategies,
                    // ending in Exhausted when nothing else applies.
                    let _ = self.resolve_recovery(retry.record, retry.hooks, now_ms);
                }
            }
        }
    }

    /// Notification eligibility by tier: Info never surfaces, Critical
    /// always does, Error and first-fingerprint Warning surface only when
    /// recovery came up empty; a mitigated fault is not worth an
    /// interruption.
    const fn notification_eligible(severity: Severity, recovery: &RecoveryStatus) -> bool {
        match severity {
            Severity::Info => false,
            Severity::Critical => true,
            Severity::Warning | Severity::Error => matches!(recovery, RecoveryStatus::Exhausted),
        }
    }

    fn show_notification(
        &mut self,
        kind: FaultKind,
        severity: Severity,
        actions: Vec<NotificationAction>,
        now_ms: u64,
    ) -> Option<Uuid> {
        match self.throttler.request(kind, severity, false, actions, now_ms) {
            NotifyOutcome::Shown(notification) => {
                self.renderer.show(&notification);
                self.events.emit(&EngineEvent::NotificationShown {
                    id: notification.id,
                    severity: notification.severity,
                });
                Some(notification.id)
            }
            NotifyOutcome::Suppressed(reason) => {
                trace!(?reason, "notification suppressed");
                None
            }
        }
    }

    fn emit_transition(&self, transition: Option<CircuitTransition>) {
        match transition {
            Some(CircuitTransition::Opened { at_ms }) => {
                self.events.emit(&EngineEvent::CircuitOpened { at_ms });
            }
            Some(CircuitTransition::Closed { at_ms }) => {
                self.events.emit(&EngineEvent::CircuitClosed { at_ms });
            }
            None => {}
        }
    }
}

impl std::fmt::Debug for ResilienceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceEngine")
            .field("session_fault_count", &self.session_fault_count)
            .field("circuit_mode", &self.breaker.mode())
            .field("is_online", &self.is_online)
            .field("queued_for_delivery", &self.batcher.len())
            .finish_non_exhaustive()
    }
}
