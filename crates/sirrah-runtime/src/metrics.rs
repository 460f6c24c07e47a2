//! Metric events emitted by the execution gateway and an in-process
//! histogram registry that aggregates them.
//!
//! Exporting is left to the embedding process; the registry only keeps
//! bucketed counts that can be snapshotted and serialized.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;

pub const ENGINE_LOCK_WAIT_METRIC: &str = "engine_lock_wait";
pub const ENGINE_LOCK_TIMEOUT_METRIC: &str = "engine_lock_timeout";
pub const REQUEST_DURATION_METRIC: &str = "request_duration_api";

/// Upper bucket bounds, in microseconds, for admission gate waits.
pub const ENGINE_LOCK_WAIT_BUCKETS_US: &[u64] = &[
    10, 50, 100, 500, 1_000, 5_000, 10_000, 50_000, 100_000, 500_000, 1_000_000, 5_000_000,
    30_000_000,
];

/// Upper bucket bounds, in microseconds, for full request handling.
pub const REQUEST_DURATION_BUCKETS_US: &[u64] = &[
    100, 500, 1_000, 5_000, 10_000, 50_000, 100_000, 250_000, 500_000, 1_000_000, 5_000_000,
    30_000_000,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricEvent {
    /// Time spent waiting before the execution ticket was granted.
    GateWait { duration_us: u64 },
    /// Time spent waiting before the caller's deadline expired.
    GateTimeout { duration_us: u64 },
    /// End-to-end handling of one JSON-RPC request.
    RequestDuration { duration_us: u64 },
}

impl MetricEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GateWait { .. } => ENGINE_LOCK_WAIT_METRIC,
            Self::GateTimeout { .. } => ENGINE_LOCK_TIMEOUT_METRIC,
            Self::RequestDuration { .. } => REQUEST_DURATION_METRIC,
        }
    }

    pub fn duration_us(&self) -> u64 {
        match self {
            Self::GateWait { duration_us }
            | Self::GateTimeout { duration_us }
            | Self::RequestDuration { duration_us } => *duration_us,
        }
    }
}

/// Trait contract for anything that accepts gateway metric events.
pub trait MetricsSink: Send + Sync {
    fn record(&self, event: MetricEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record(&self, _event: MetricEvent) {}
}

pub fn duration_us(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HistogramSnapshot {
    pub name: String,
    pub bounds_us: Vec<u64>,
    /// One count per bound plus a trailing overflow bucket.
    pub bucket_counts: Vec<u64>,
    pub count: u64,
    pub sum_us: u64,
    pub max_us: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub engine_lock_wait: HistogramSnapshot,
    pub engine_lock_timeout: HistogramSnapshot,
    pub request_duration_api: HistogramSnapshot,
}

#[derive(Debug)]
struct Histogram {
    name: &'static str,
    bounds_us: &'static [u64],
    bucket_counts: Vec<u64>,
    count: u64,
    sum_us: u64,
    max_us: u64,
}

impl Histogram {
    fn new(name: &'static str, bounds_us: &'static [u64]) -> Self {
        Self {
            name,
            bounds_us,
            bucket_counts: vec![0; bounds_us.len() + 1],
            count: 0,
            sum_us: 0,
            max_us: 0,
        }
    }

    fn observe(&mut self, value_us: u64) {
        let index = self
            .bounds_us
            .iter()
            .position(|bound| value_us <= *bound)
            .unwrap_or(self.bounds_us.len());
        self.bucket_counts[index] = self.bucket_counts[index].saturating_add(1);
        self.count = self.count.saturating_add(1);
        self.sum_us = self.sum_us.saturating_add(value_us);
        self.max_us = self.max_us.max(value_us);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            name: self.name.to_string(),
            bounds_us: self.bounds_us.to_vec(),
            bucket_counts: self.bucket_counts.clone(),
            count: self.count,
            sum_us: self.sum_us,
            max_us: self.max_us,
        }
    }
}

#[derive(Debug)]
struct RegistryHistograms {
    engine_lock_wait: Histogram,
    engine_lock_timeout: Histogram,
    request_duration_api: Histogram,
}

/// Aggregates [`MetricEvent`]s into fixed-bucket histograms.
#[derive(Debug)]
pub struct MetricsRegistry {
    histograms: Mutex<RegistryHistograms>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            histograms: Mutex::new(RegistryHistograms {
                engine_lock_wait: Histogram::new(
                    ENGINE_LOCK_WAIT_METRIC,
                    ENGINE_LOCK_WAIT_BUCKETS_US,
                ),
                engine_lock_timeout: Histogram::new(
                    ENGINE_LOCK_TIMEOUT_METRIC,
                    ENGINE_LOCK_WAIT_BUCKETS_US,
                ),
                request_duration_api: Histogram::new(
                    REQUEST_DURATION_METRIC,
                    REQUEST_DURATION_BUCKETS_US,
                ),
            }),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let histograms = lock_or_recover(&self.histograms);
        MetricsSnapshot {
            engine_lock_wait: histograms.engine_lock_wait.snapshot(),
            engine_lock_timeout: histograms.engine_lock_timeout.snapshot(),
            request_duration_api: histograms.request_duration_api.snapshot(),
        }
    }
}

impl MetricsSink for MetricsRegistry {
    fn record(&self, event: MetricEvent) {
        let mut histograms = lock_or_recover(&self.histograms);
        let histogram = match event {
            MetricEvent::GateWait { .. } => &mut histograms.engine_lock_wait,
            MetricEvent::GateTimeout { .. } => &mut histograms.engine_lock_timeout,
            MetricEvent::RequestDuration { .. } => &mut histograms.request_duration_api,
        };
        histogram.observe(event.duration_us());
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
