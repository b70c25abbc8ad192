//! Sliding-window signal collector (spec.md §4.2).
//!
//! Retains `(timestamp, latency, success)` points for `window_duration` and
//! derives error rate, percentiles, average, median, and throughput over
//! the un-evicted set. Lifetime counters (`total`, `total_success`) are
//! monotone and never evicted.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct WindowPoint {
    at: Instant,
    latency_ms: u64,
    success: bool,
}

/// All derived metrics in one consistent read.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowSnapshot {
    pub count: usize,
    pub error_rate: f64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub avg_ms: f64,
    pub median_ms: u64,
    pub throughput_per_sec: f64,
    pub total: u64,
    pub total_success: u64,
}

struct Inner {
    points: VecDeque<WindowPoint>,
    total: u64,
    total_success: u64,
}

/// Thread-safe rolling window over recent send outcomes.
pub struct Window {
    window_duration: Duration,
    inner: Mutex<Inner>,
}

impl Window {
    pub fn new(window_duration: Duration) -> Self {
        Self {
            window_duration,
            inner: Mutex::new(Inner {
                points: VecDeque::new(),
                total: 0,
                total_success: 0,
            }),
        }
    }

    /// Appends a point tagged with the current time.
    pub fn record(&self, latency_ms: u64, success: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.points.push_back(WindowPoint {
            at: Instant::now(),
            latency_ms,
            success,
        });
        inner.total += 1;
        if success {
            inner.total_success += 1;
        }
        self.evict(&mut inner);
    }

    fn evict(&self, inner: &mut Inner) {
        let now = Instant::now();
        while let Some(front) = inner.points.front() {
            if now.saturating_duration_since(front.at) > self.window_duration {
                inner.points.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns all derived metrics from a single, consistent read.
    ///
    /// Idempotent: repeated calls without an intervening `record` return
    /// identical values.
    pub fn snapshot(&self) -> WindowSnapshot {
        let mut inner = self.inner.lock().unwrap();
        self.evict(&mut inner);

        let count = inner.points.len();
        if count == 0 {
            return WindowSnapshot {
                total: inner.total,
                total_success: inner.total_success,
                ..Default::default()
            };
        }

        let failures = inner.points.iter().filter(|p| !p.success).count();
        let error_rate = failures as f64 / count as f64;

        let mut latencies: Vec<u64> = inner.points.iter().map(|p| p.latency_ms).collect();
        latencies.sort_unstable();

        let p95_ms = percentile(&latencies, 0.95);
        let p99_ms = percentile(&latencies, 0.99);
        let median_ms = percentile(&latencies, 0.5);
        let avg_ms = latencies.iter().sum::<u64>() as f64 / count as f64;

        let oldest = inner.points.front().unwrap().at;
        let span = Instant::now().saturating_duration_since(oldest).as_secs_f64();
        let throughput_per_sec = if span > 0.0 { count as f64 / span } else { 0.0 };

        WindowSnapshot {
            count,
            error_rate,
            p95_ms,
            p99_ms,
            avg_ms,
            median_ms,
            throughput_per_sec,
            total: inner.total,
            total_success: inner.total_success,
        }
    }

    pub fn error_rate(&self) -> f64 {
        self.snapshot().error_rate
    }

    pub fn p95(&self) -> u64 {
        self.snapshot().p95_ms
    }

    pub fn count(&self) -> usize {
        self.snapshot().count
    }
}

/// `floor(n * p)` index into a sorted slice, per spec.md §4.2's numeric
/// contract. Empty input returns 0.
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() as f64) * p).floor() as usize;
    let idx = idx.min(sorted.len() - 1);
    sorted[idx]
}
