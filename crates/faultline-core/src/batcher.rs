//! Delivery batching for the remote collector.
//!
//! Sanitized fault records accumulate in a bounded FIFO queue and are
//! flushed wholesale: a batch either reaches the collector intact or is
//! returned untouched to the front of the queue for the next trigger.
//! There is no immediate retry after a failed flush — the next natural
//! trigger (timer tick, reconnect, batch-size threshold) picks the batch
//! up again, which prevents retry storms during an outage.
//!
//! Delivery is best-effort telemetry, not an audit log: when the queue is
//! full, the oldest entries are dropped to admit new ones.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::fault::{FaultContext, FaultKind, FaultRecord, Severity};
use crate::host::Transport;
use crate::sanitize::Sanitizer;

/// A sanitized fault record in collector wire form.
///
/// Built from a [`FaultRecord`] at enqueue time; the raw message has
/// already been redacted and stack-truncated, and context values have been
/// redacted, so nothing personally identifiable sits in the queue.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveredFault {
    /// Fault kind.
    pub kind: FaultKind,
    /// Sanitized message.
    pub message: String,
    /// Sanitized context entries.
    pub context: FaultContext,
    /// Capture timestamp in monotonic milliseconds.
    pub timestamp_ms: u64,
    /// Fingerprint token (hex). Repeats of one fingerprint give the
    /// collector frequency data.
    pub fingerprint: String,
    /// Assigned severity.
    pub severity: Severity,
}

impl DeliveredFault {
    /// Sanitizes a fault record into wire form.
    #[must_use]
    pub fn sanitize(record: &FaultRecord, sanitizer: &Sanitizer) -> Self {
        let mut context = FaultContext::new();
        for (key, value) in record.context.iter() {
            context = context.with(key, sanitizer.redact(value).into_owned());
        }
        Self {
            kind: record.kind,
            message: sanitizer.sanitize_message(&record.raw_message),
            context,
            timestamp_ms: record.timestamp_ms,
            fingerprint: record.fingerprint.to_string(),
            severity: record.severity,
        }
    }
}

/// Result of one flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushResult {
    /// Nothing to send.
    Empty,
    /// The batch was accepted by the collector.
    Delivered {
        /// Number of records delivered.
        count: usize,
    },
    /// Transport failure; the batch was returned to the front of the queue.
    Requeued {
        /// Number of records returned to the queue.
        count: usize,
    },
}

/// Bounded FIFO delivery queue with all-or-nothing flushing.
#[derive(Debug)]
pub struct DeliveryBatcher {
    queue: VecDeque<DeliveredFault>,
    batch_size: usize,
    max_queue_len: usize,
    flush_interval_ms: u64,
    next_flush_at_ms: u64,
    dropped: u64,
}

impl DeliveryBatcher {
    /// Creates a batcher from the engine configuration.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            queue: VecDeque::new(),
            batch_size: config.batch_size.max(1),
            max_queue_len: config.max_queue_len.max(1),
            flush_interval_ms: config.flush_interval.as_millis() as u64,
            next_flush_at_ms: 0,
            dropped: 0,
        }
    }

    /// Returns the number of queued records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns how many records have been dropped to queue pressure.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Enqueues a sanitized record.
    ///
    /// Returns `true` when the queue has reached the batch-size threshold
    /// and an immediate flush is due. Oldest entries are dropped when the
    /// queue is full.
    pub fn enqueue(&mut self, record: DeliveredFault) -> bool {
        while self.queue.len() >= self.max_queue_len {
            self.queue.pop_front();
            self.dropped += 1;
            warn!(dropped = self.dropped, "delivery queue full, dropped oldest record");
        }
        self.queue.push_back(record);
        self.queue.len() >= self.batch_size
    }

    /// Returns whether the periodic flush timer is due.
    ///
    /// Arms the next deadline when it fires; an empty queue never fires.
    pub fn poll_due(&mut self, now_ms: u64) -> bool {
        if self.next_flush_at_ms == 0 {
            self.next_flush_at_ms = now_ms + self.flush_interval_ms;
            return false;
        }
        if now_ms >= self.next_flush_at_ms {
            self.next_flush_at_ms = now_ms + self.flush_interval_ms;
            return !self.queue.is_empty();
        }
        false
    }

    /// Flushes the next batch to the transport.
    ///
    /// All-or-nothing: on failure the whole batch is returned to the front
    /// of the queue in its original order. FIFO order holds within a batch;
    /// order *between* batches is best-effort after a re-queue.
    pub async fn flush(&mut self, transport: &dyn Transport) -> FlushResult {
        if self.queue.is_empty() {
            return FlushResult::Empty;
        }

        let take = self.queue.len().min(self.batch_size);
        let batch: Vec<DeliveredFault> = self.queue.drain(..take).collect();

        match transport.deliver(&batch).await {
            Ok(()) => {
                debug!(count = batch.len(), "delivered fault batch");
                FlushResult::Delivered { count: batch.len() }
            }
            Err(err) => {
                warn!(error = %err, count = batch.len(), "batch delivery failed, re-queueing");
                let count = batch.len();
                for record in batch.into_iter().rev() {
                    self.queue.push_front(record);
                }
                self.requeue_overflow();
                FlushResult::Requeued { count }
            }
        }
    }

    /// Drains every queued record in batches, stopping at the first
    /// transport failure.
    pub async fn flush_all(&mut self, transport: &dyn Transport) -> FlushResult {
        let mut delivered = 0usize;
        loop {
            match self.flush(transport).await {
                FlushResult::Empty => {
                    return if delivered == 0 {
                        FlushResult::Empty
                    } else {
                        FlushResult::Delivered { count: delivered }
                    };
                }
                FlushResult::Delivered { count } => delivered += count,
                FlushResult::Requeued { count } => return FlushResult::Requeued { count },
            }
        }
    }

    fn requeue_overflow(&mut self) {
        while self.queue.len() > self.max_queue_len {
            self.queue.pop_back();
            self.dropped += 1;
        }
    }
}
