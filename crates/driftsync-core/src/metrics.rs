//! Rolling-window throughput samples.
//!
//! Samples arrive from two triggers: once per wall-second per in-flight file
//! and once per file completion. Retention is relative to the newest sample,
//! not to the wall clock, so an idle window keeps its history until fresh
//! samples displace it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sample retention horizon. The scaling controller acts on the same period.
pub const SAMPLE_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct RateSample {
    pub at: Instant,
    pub bytes: u64,
    pub read_time: Duration,
    pub write_time: Duration,
    pub active_workers: usize,
}

/// Time-bounded ring of [`RateSample`]s with derived smoothed metrics.
#[derive(Debug, Clone, Default)]
pub struct RateWindow {
    samples: VecDeque<RateSample>,
}

impl RateWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a sample and prune everything older than the window relative to
    /// the newest entry.
    pub fn push(&mut self, sample: RateSample) {
        self.samples.push_back(sample);
        let newest = self
            .samples
            .back()
            .map(|s| s.at)
            .unwrap_or_else(Instant::now);
        while let Some(front) = self.samples.front() {
            if newest.duration_since(front.at) > SAMPLE_WINDOW {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Smoothed bytes/s across the window. `None` until two samples span a
    /// non-zero interval.
    pub fn total_rate(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        let oldest = self.samples.front()?.at;
        let newest = self.samples.back()?.at;
        let span = newest.duration_since(oldest).as_secs_f64();
        if span <= 0.0 {
            return None;
        }
        let bytes: u64 = self.samples.iter().map(|s| s.bytes).sum();
        Some(bytes as f64 / span)
    }

    /// Smoothed bytes/s per worker, using the mean active-worker count across
    /// the window.
    pub fn per_worker_rate(&self) -> Option<f64> {
        let total = self.total_rate()?;
        let worker_sum: usize = self.samples.iter().map(|s| s.active_workers).sum();
        let mean = worker_sum as f64 / self.samples.len() as f64;
        if mean <= 0.0 {
            return None;
        }
        Some(total / mean)
    }

    /// (read %, write %) of I/O time across the window.
    pub fn io_split(&self) -> Option<(f64, f64)> {
        if self.samples.len() < 2 {
            return None;
        }
        let read: Duration = self.samples.iter().map(|s| s.read_time).sum();
        let write: Duration = self.samples.iter().map(|s| s.write_time).sum();
        let total = read + write;
        if total.is_zero() {
            return None;
        }
        let read_pct = read.as_secs_f64() / total.as_secs_f64() * 100.0;
        Some((read_pct, 100.0 - read_pct))
    }
}
