//! Conflict metrics readout for observability.
//!
//! Sampled by the UI on a fixed interval; has no effect on drawing or sync.

use serde::Serialize;
use std::time::{Duration, Instant};

/// Default interval between metric samples.
pub const DEFAULT_METRICS_INTERVAL_MS: u64 = 200;

/// Point-in-time view of synchronization pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictMetrics {
    /// Inbound events held back while the surface restores.
    pub pending_events: usize,
    /// Strokes currently open across all authors.
    pub buffered_strokes: usize,
    /// Monotonic count of events sent and applied.
    pub logical_clock: u64,
}

/// Emits a metrics sample at most once per interval.
#[derive(Debug, Clone)]
pub struct MetricsSampler {
    interval: Duration,
    last_sample: Option<Instant>,
}

impl MetricsSampler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sample: None,
        }
    }

    /// Check if enough time has passed for another sample.
    pub fn should_sample(&self, now: Instant) -> bool {
        match self.last_sample {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        }
    }

    /// Return `current` if a sample is due, recording the sample time.
    pub fn poll(&mut self, now: Instant, current: ConflictMetrics) -> Option<ConflictMetrics> {
        if !self.should_sample(now) {
            return None;
        }
        self.last_sample = Some(now);
        Some(current)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for MetricsSampler {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_METRICS_INTERVAL_MS))
    }
}
