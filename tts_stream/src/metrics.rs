// Pipeline metrics collection

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::delivery::DeliveryReport;
use crate::player::PlaybackReport;

const MAX_LATENCY_SAMPLES: usize = 1000;

/// Counters shared by every request of a synthesizer or player. Cloning
/// shares the underlying counters.
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    requests: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,
    silent_requests: Arc<AtomicU64>,
    bytes_written: Arc<AtomicU64>,
    chunk_writes: Arc<AtomicU64>,
    failed_writes: Arc<AtomicU64>,
    segments_played: Arc<AtomicU64>,
    total_latency_ms: Arc<AtomicU64>,
    min_latency_ms: Arc<AtomicU64>,
    max_latency_ms: Arc<AtomicU64>,
    latency_samples: Arc<Mutex<Vec<u64>>>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(AtomicU64::new(0)),
            errors: Arc::new(AtomicU64::new(0)),
            silent_requests: Arc::new(AtomicU64::new(0)),
            bytes_written: Arc::new(AtomicU64::new(0)),
            chunk_writes: Arc::new(AtomicU64::new(0)),
            failed_writes: Arc::new(AtomicU64::new(0)),
            segments_played: Arc::new(AtomicU64::new(0)),
            total_latency_ms: Arc::new(AtomicU64::new(0)),
            min_latency_ms: Arc::new(AtomicU64::new(u64::MAX)),
            max_latency_ms: Arc::new(AtomicU64::new(0)),
            latency_samples: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A request that finished with `done()` after delivering audio.
    pub fn record_delivery(&self, latency_ms: u64, report: &DeliveryReport) {
        self.record_latency(latency_ms);
        self.bytes_written
            .fetch_add(report.bytes_written as u64, Ordering::Relaxed);
        self.chunk_writes
            .fetch_add(report.writes as u64, Ordering::Relaxed);
        self.failed_writes
            .fetch_add(report.failed_writes as u64, Ordering::Relaxed);
    }

    /// A blank request, completed without touching the engine.
    pub fn record_silent(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.silent_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, latency_ms: u64) {
        self.record_latency(latency_ms);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_playback(&self, report: &PlaybackReport) {
        self.segments_played
            .fetch_add(report.segments as u64, Ordering::Relaxed);
        self.failed_writes
            .fetch_add(report.failed_writes as u64, Ordering::Relaxed);
    }

    fn record_latency(&self, latency_ms: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.min_latency_ms.fetch_min(latency_ms, Ordering::Relaxed);
        self.max_latency_ms.fetch_max(latency_ms, Ordering::Relaxed);

        let mut samples = self.latency_samples.lock();
        samples.push(latency_ms);
        if samples.len() > MAX_LATENCY_SAMPLES {
            samples.remove(0);
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let samples = self.latency_samples.lock().len();
        if samples == 0 {
            return 0.0;
        }
        let timed = self.requests.load(Ordering::Relaxed) - self.silent_requests.load(Ordering::Relaxed);
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        total as f64 / timed.max(1) as f64
    }

    fn percentile(&self, p: u8) -> u64 {
        let samples = self.latency_samples.lock();
        if samples.is_empty() {
            return 0;
        }
        let mut sorted = samples.clone();
        sorted.sort_unstable();
        let index = (sorted.len() * p as usize / 100).min(sorted.len() - 1);
        sorted[index]
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let min = self.min_latency_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            timestamp: Utc::now(),
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            silent_requests: self.silent_requests.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            chunk_writes: self.chunk_writes.load(Ordering::Relaxed),
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
            segments_played: self.segments_played.load(Ordering::Relaxed),
            avg_latency_ms: self.avg_latency_ms(),
            min_latency_ms: if min == u64::MAX { 0 } else { min },
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
            p50_latency_ms: self.percentile(50),
            p95_latency_ms: self.percentile(95),
            p99_latency_ms: self.percentile(99),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub requests: u64,
    pub errors: u64,
    pub silent_requests: u64,
    pub bytes_written: u64,
    pub chunk_writes: u64,
    pub failed_writes: u64,
    pub segments_played: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
}
