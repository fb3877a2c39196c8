//! Run counters and stage timers.
//!
//! Counters are plain atomic adds so the reader thread and stage code
//! can bump them without coordination; the per-frame latency histogram
//! sits behind a mutex and is only read after the run finishes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

/// Cumulative totals for one pipeline run.
#[derive(Debug)]
pub struct ProcessingStats {
    pub packets: AtomicU64,
    pub parse_errors: AtomicU64,
    pub skipped_datagrams: AtomicU64,
    pub points: AtomicU64,
    pub frames: AtomicU64,
    pub foreground_points: AtomicU64,
    pub background_points: AtomicU64,
    pub out_of_grid_points: AtomicU64,
    pub degenerate_points: AtomicU64,
    pub rpm_changes: AtomicU64,
    frame_time_ns: Mutex<Histogram<u64>>,
}

impl Default for ProcessingStats {
    fn default() -> Self {
        Self {
            packets: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            skipped_datagrams: AtomicU64::new(0),
            points: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            foreground_points: AtomicU64::new(0),
            background_points: AtomicU64::new(0),
            out_of_grid_points: AtomicU64::new(0),
            degenerate_points: AtomicU64::new(0),
            rpm_changes: AtomicU64::new(0),
            frame_time_ns: Mutex::new(
                Histogram::new(3).expect("histogram with default bounds"),
            ),
        }
    }
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_frame_time(&self, elapsed: Duration) {
        self.frame_time_ns
            .lock()
            .saturating_record(elapsed.as_nanos() as u64);
    }

    /// Plain-value snapshot for reporting after finalization.
    pub fn summary(&self) -> StatsSummary {
        let hist = self.frame_time_ns.lock();
        StatsSummary {
            packets: self.packets.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            skipped_datagrams: self.skipped_datagrams.load(Ordering::Relaxed),
            points: self.points.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            foreground_points: self.foreground_points.load(Ordering::Relaxed),
            background_points: self.background_points.load(Ordering::Relaxed),
            out_of_grid_points: self.out_of_grid_points.load(Ordering::Relaxed),
            degenerate_points: self.degenerate_points.load(Ordering::Relaxed),
            rpm_changes: self.rpm_changes.load(Ordering::Relaxed),
            frame_time_p50_ns: hist.value_at_quantile(0.50),
            frame_time_p95_ns: hist.value_at_quantile(0.95),
            frame_time_max_ns: hist.max(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSummary {
    pub packets: u64,
    pub parse_errors: u64,
    pub skipped_datagrams: u64,
    pub points: u64,
    pub frames: u64,
    pub foreground_points: u64,
    pub background_points: u64,
    pub out_of_grid_points: u64,
    pub degenerate_points: u64,
    pub rpm_changes: u64,
    pub frame_time_p50_ns: u64,
    pub frame_time_p95_ns: u64,
    pub frame_time_max_ns: u64,
}

/// Cumulative per-stage wall time, appended atomically and read once
/// after the run.
#[derive(Debug, Default)]
pub struct StageTimers {
    clustering_ns: AtomicU64,
    tracking_ns: AtomicU64,
    classification_ns: AtomicU64,
}

impl StageTimers {
    pub fn add_clustering(&self, elapsed: Duration) {
        self.clustering_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn add_tracking(&self, elapsed: Duration) {
        self.tracking_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn add_classification(&self, elapsed: Duration) {
        self.classification_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn clustering_ns(&self) -> u64 {
        self.clustering_ns.load(Ordering::Relaxed)
    }

    pub fn tracking_ns(&self) -> u64 {
        self.tracking_ns.load(Ordering::Relaxed)
    }

    pub fn classification_ns(&self) -> u64 {
        self.classification_ns.load(Ordering::Relaxed)
    }
}
