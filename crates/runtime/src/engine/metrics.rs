//! Engine counters, updated under one lock on every transition.

use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineMetrics {
    pub submitted: u64,
    pub rejected: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub dropped_results: u64,
    pub in_flight: usize,
    pub average_latency_ms: f64,
    pub max_latency_ms: u64,
    pub uptime_secs: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: u64,
    rejected: u64,
    succeeded: u64,
    failed: u64,
    retried: u64,
    dropped_results: u64,
    in_flight: usize,
    attempts: u64,
    total_latency: Duration,
    max_latency: Duration,
}

#[derive(Debug)]
pub(crate) struct MetricsRecorder {
    started_at: Instant,
    counters: Mutex<Counters>,
}

impl MetricsRecorder {
    pub(crate) fn new() -> Self {
        Self {
            started_at: Instant::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    pub(crate) fn submitted(&self) {
        self.counters.lock().submitted += 1;
    }

    pub(crate) fn rejected(&self) {
        self.counters.lock().rejected += 1;
    }

    pub(crate) fn dequeued(&self) {
        self.counters.lock().in_flight += 1;
    }

    pub(crate) fn released(&self) {
        let mut c = self.counters.lock();
        c.in_flight = c.in_flight.saturating_sub(1);
    }

    /// One execution attempt finished, whatever its outcome.
    pub(crate) fn attempt(&self, latency: Duration) {
        let mut c = self.counters.lock();
        c.attempts += 1;
        c.total_latency += latency;
        c.max_latency = c.max_latency.max(latency);
    }

    pub(crate) fn retried(&self) {
        self.counters.lock().retried += 1;
    }

    pub(crate) fn finished(&self, success: bool, delivered: bool) {
        let mut c = self.counters.lock();
        if success {
            c.succeeded += 1;
        } else {
            c.failed += 1;
        }
        if !delivered {
            c.dropped_results += 1;
        }
    }

    pub(crate) fn snapshot(&self) -> EngineMetrics {
        let c = self.counters.lock();
        let average_latency_ms = if c.attempts == 0 {
            0.0
        } else {
            c.total_latency.as_secs_f64() * 1_000.0 / c.attempts as f64
        };
        EngineMetrics {
            submitted: c.submitted,
            rejected: c.rejected,
            succeeded: c.succeeded,
            failed: c.failed,
            retried: c.retried,
            dropped_results: c.dropped_results,
            in_flight: c.in_flight,
            average_latency_ms,
            max_latency_ms: c.max_latency.as_millis() as u64,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}
