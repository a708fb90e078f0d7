//! Host collaborator traits.
//!
//! The engine is free of any UI-toolkit or platform dependency; everything
//! it needs from the outside world comes through these seams. Host adapters
//! implement them over real browser/runtime capabilities; tests implement
//! them over plain values and a manual clock.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::batcher::DeliveredFault;
use crate::error::TransportError;
use crate::events::EngineEvent;
use crate::notify::Notification;

/// Monotonic time source in milliseconds.
///
/// All engine timers (backoff due times, breaker cool-down, notification
/// deadlines, flush interval) are driven from this clock, which is what
/// makes every timed behavior verifiable under a virtual clock.
pub trait Clock: Send + Sync {
    /// Current monotonic time in milliseconds.
    fn now_ms(&self) -> u64;
}

/// Wall-process monotonic clock.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Creates a clock anchored at construction time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// Creates a clock at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the clock by `delta_ms`.
    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Jumps the clock to an absolute time.
    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Host capabilities the recovery pipeline delegates to.
pub trait Host: Send + Sync {
    /// Switches the host into degraded offline mode.
    fn enter_offline_mode(&self);

    /// Reloads the page/application. Invoked only after the user accepts
    /// the last-resort refresh prompt.
    fn reload(&self);
}

/// Host that logs and otherwise does nothing. Default collaborator.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl Host for NullHost {
    fn enter_offline_mode(&self) {
        info!("host switched to offline mode");
    }

    fn reload(&self) {
        info!("host reload requested");
    }
}

/// Passive notification renderer.
///
/// The renderer owns the visible notification surface; it reports
/// dismissal back through `ResilienceEngine::dismiss`.
pub trait Renderer: Send + Sync {
    /// Renders a notification request.
    fn show(&self, notification: &Notification);
}

/// Renderer that logs and draws nothing. Default collaborator.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn show(&self, notification: &Notification) {
        debug!(id = %notification.id, severity = %notification.severity, "notification requested");
    }
}

/// Local cache lookup for the cache-restore strategy.
pub trait CacheStore: Send + Sync {
    /// Returns the cached value for `key`, if any.
    fn get(&self, key: &str) -> Option<String>;
}

/// In-memory cache store.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCacheStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.into(), value.into());
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

/// Collector transport.
///
/// Any error counts as a transport failure: the engine re-queues the batch
/// and waits for the next natural flush trigger.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Delivers one batch. Accepting means the collector took the whole
    /// batch.
    async fn deliver(&self, batch: &[DeliveredFault]) -> Result<(), TransportError>;
}

/// Transport that drops every batch on the floor.
///
/// Useful for tests and for hosts that only want local mitigation without
/// remote collection.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn deliver(&self, batch: &[DeliveredFault]) -> Result<(), TransportError> {
        debug!(count = batch.len(), "discarding batch (null transport)");
        Ok(())
    }
}

/// Observability sink for engine lifecycle events.
///
/// Sinks must never report faults back into the engine.
pub trait EventSink: Send + Sync {
    /// Receives one lifecycle event.
    fn emit(&self, event: &EngineEvent);
}

/// Sink that emits events as structured log lines. Default collaborator.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &EngineEvent) {
        match event {
            EngineEvent::CircuitOpened { .. } | EngineEvent::RecoveryStrategyFailed { .. } => {
                warn!(event = event.name(), detail = ?event, "engine event");
            }
            _ => debug!(event = event.name(), detail = ?event, "engine event"),
        }
    }
}

/// Sink that collects events for assertions.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<EngineEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of collected events.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EngineEvent> {
        self.events
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Returns the collected event names, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.snapshot().iter().map(EngineEvent::name).collect()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: &EngineEvent) {
        self.events
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event.clone());
    }
}
