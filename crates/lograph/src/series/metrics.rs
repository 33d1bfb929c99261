use std::sync::atomic::{AtomicU64, Ordering};
use serde::Serialize;

/// Counters for one [`super::SeriesSet`] loading pass.
///
/// Atomics because `load_parallel` updates them from rayon workers.
/// All operations use `Ordering::Relaxed`; the snapshot may tear slightly
/// while a load is running, which is fine for reporting.
#[derive(Debug, Default)]
pub struct LoadMetrics {
    files_parsed: AtomicU64,
    files_unrecognized: AtomicU64,
    files_failed: AtomicU64,
    series_merged: AtomicU64,
    samples_merged: AtomicU64,
}

impl LoadMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_parsed(&self) {
        self.files_parsed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unrecognized(&self) {
        self.files_unrecognized.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_merge(&self, samples: usize) {
        self.series_merged.fetch_add(1, Ordering::Relaxed);
        self.samples_merged.fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LoadMetricsSnapshot {
        LoadMetricsSnapshot {
            files_parsed: self.files_parsed.load(Ordering::Relaxed),
            files_unrecognized: self.files_unrecognized.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            series_merged: self.series_merged.load(Ordering::Relaxed),
            samples_merged: self.samples_merged.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadMetricsSnapshot {
    pub files_parsed: u64,
    pub files_unrecognized: u64,
    pub files_failed: u64,
    pub series_merged: u64,
    pub samples_merged: u64,
}
