//! Engine configuration.
//!
//! Every tunable in the engine is overridable at construction time so that
//! isolated instances can be built in tests with aggressive thresholds.
//! Defaults follow the values the engine ships with in production.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the resilience engine.
///
/// All durations serialize in humantime form (`"5s"`, `"2m"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Fault count within the trailing window that trips the circuit
    /// breaker into recovery mode.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,

    /// Trailing window over which breaker fault arrivals are counted.
    #[serde(default = "default_window")]
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// How long the breaker stays open before auto-resetting to closed.
    /// The reset is time-based and independent of further fault arrivals.
    #[serde(default = "default_cool_down")]
    #[serde(with = "humantime_serde")]
    pub cool_down: Duration,

    /// Maximum retry attempts per operation key.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for the first retry attempt.
    #[serde(default = "default_base_delay")]
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Backoff multiplier applied per attempt.
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,

    /// Maximum user-facing notifications per session.
    #[serde(default = "default_max_notifications")]
    pub max_notifications_per_session: u32,

    /// Auto-dismiss deadline for non-critical notifications. Critical
    /// notifications never auto-dismiss.
    #[serde(default = "default_notification_duration")]
    #[serde(with = "humantime_serde")]
    pub notification_duration: Duration,

    /// Number of queued records that triggers an immediate flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Periodic flush interval for the delivery queue.
    #[serde(default = "default_flush_interval")]
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Capacity of the fingerprint seen-set. On overflow the oldest half
    /// is dropped.
    #[serde(default = "default_seen_set_cap")]
    pub seen_set_cap: usize,

    /// Hard bound on the delivery queue. Delivery is best-effort telemetry,
    /// so oldest entries are dropped to admit new ones when full.
    #[serde(default = "default_max_queue_len")]
    pub max_queue_len: usize,
}

const fn default_error_threshold() -> u32 {
    5
}

const fn default_window() -> Duration {
    Duration::from_secs(60)
}

const fn default_cool_down() -> Duration {
    Duration::from_millis(120_000)
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_base_delay() -> Duration {
    Duration::from_millis(1000)
}

const fn default_retry_multiplier() -> f64 {
    2.0
}

const fn default_max_notifications() -> u32 {
    3
}

const fn default_notification_duration() -> Duration {
    Duration::from_millis(5000)
}

const fn default_batch_size() -> usize {
    10
}

const fn default_flush_interval() -> Duration {
    Duration::from_millis(5000)
}

const fn default_seen_set_cap() -> usize {
    512
}

const fn default_max_queue_len() -> usize {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            error_threshold: default_error_threshold(),
            window: default_window(),
            cool_down: default_cool_down(),
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            retry_multiplier: default_retry_multiplier(),
            max_notifications_per_session: default_max_notifications(),
            notification_duration: default_notification_duration(),
            batch_size: default_batch_size(),
            flush_interval: default_flush_interval(),
            seen_set_cap: default_seen_set_cap(),
            max_queue_len: default_max_queue_len(),
        }
    }
}

impl EngineConfig {
    /// Sets the breaker trip threshold.
    #[must_use]
    pub const fn with_error_threshold(mut self, threshold: u32) -> Self {
        self.error_threshold = threshold;
        self
    }

    /// Sets the breaker cool-down.
    #[must_use]
    pub const fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down = cool_down;
        self
    }

    /// Sets the per-operation retry cap.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the initial backoff delay.
    #[must_use]
    pub const fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub const fn with_retry_multiplier(mut self, multiplier: f64) -> Self {
        self.retry_multiplier = multiplier;
        self
    }

    /// Sets the per-session notification budget.
    #[must_use]
    pub const fn with_max_notifications(mut self, max: u32) -> Self {
        self.max_notifications_per_session = max;
        self
    }

    /// Sets the flush batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the periodic flush interval.
    #[must_use]
    pub const fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the seen-set capacity.
    #[must_use]
    pub const fn with_seen_set_cap(mut self, cap: usize) -> Self {
        self.seen_set_cap = cap;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_shipped_values() {
        let config = EngineConfig::default();
        assert_eq!(config.error_threshold, 5);
        assert_eq!(config.cool_down, Duration::from_millis(120_000));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay, Duration::from_millis(1000));
        assert!((config.retry_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.max_notifications_per_session, 3);
        assert_eq!(config.notification_duration, Duration::from_millis(5000));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.flush_interval, Duration::from_millis(5000));
        assert_eq!(config.seen_set_cap, 512);
    }

    #[test]
    fn test_builder_overrides() {
        let config = EngineConfig::default()
            .with_error_threshold(2)
            .with_cool_down(Duration::from_secs(10))
            .with_batch_size(3);
        assert_eq!(config.error_threshold, 2);
        assert_eq!(config.cool_down, Duration::from_secs(10));
        assert_eq!(config.batch_size, 3);
    }

    #[test]
    fn test_empty_config_deserializes_to_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").expect("defaults apply");
        assert_eq!(config.batch_size, EngineConfig::default().batch_size);
    }

    #[test]
    fn test_humantime_durations_round_trip() {
        let config = EngineConfig::default().with_cool_down(Duration::from_secs(90));
        let json = serde_json::to_string(&config).expect("serialize");
        assert!(json.contains("\"1m 30s\""));
        let back: EngineConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.cool_down, Duration::from_secs(90));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result = serde_json::from_str::<EngineConfig>(r#"{"bogus": 1}"#);
        assert!(result.is_err());
    }
}
