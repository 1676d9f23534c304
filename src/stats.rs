//! Request counting and latency percentiles over a fixed sample window

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

#[cfg(feature = "serde")]
use serde::Serialize;

/// Point-in-time view of a [`RequestStatistics`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct StatisticsSnapshot {
    pub requests: u64,
    pub failures: u64,
    /// Samples the percentiles were computed from
    pub samples: usize,
    pub p50: Duration,
    pub p90: Duration,
    pub p99: Duration,
    pub max: Duration,
}

struct SampleWindow {
    samples: Vec<Duration>,
    next: usize,
}

/// Request counters plus the most recent latency samples
///
/// # Examples
///
/// ```
/// use recyclable_pool::RequestStatistics;
/// use std::time::Duration;
///
/// let stats = RequestStatistics::new(128);
/// for ms in 1..=10 {
///     stats.record(Duration::from_millis(ms));
/// }
/// stats.record_failure();
///
/// let snapshot = stats.snapshot();
/// assert_eq!(snapshot.requests, 10);
/// assert_eq!(snapshot.failures, 1);
/// assert_eq!(snapshot.p50, Duration::from_millis(5));
/// assert_eq!(snapshot.max, Duration::from_millis(10));
/// ```
pub struct RequestStatistics {
    requests: AtomicU64,
    failures: AtomicU64,
    window_size: usize,
    window: Mutex<SampleWindow>,
}

impl RequestStatistics {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            window_size,
            window: Mutex::new(SampleWindow {
                samples: Vec::with_capacity(window_size),
                next: 0,
            }),
        }
    }

    /// Count a completed request and keep its latency
    pub fn record(&self, latency: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let mut window = self.window.lock();
        if window.samples.len() < self.window_size {
            window.samples.push(latency);
        } else {
            let next = window.next;
            window.samples[next] = latency;
        }
        window.next = (window.next + 1) % self.window_size;
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let mut samples = self.window.lock().samples.clone();
        samples.sort_unstable();

        StatisticsSnapshot {
            requests: self.requests(),
            failures: self.failures(),
            samples: samples.len(),
            p50: percentile(&samples, 50.0),
            p90: percentile(&samples, 90.0),
            p99: percentile(&samples, 99.0),
            max: samples.last().copied().unwrap_or_default(),
        }
    }
}

impl Default for RequestStatistics {
    fn default() -> Self {
        Self::new(4096)
    }
}

/// Nearest-rank percentile of sorted samples
fn percentile(sorted: &[Duration], pct: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot_is_zeroed() {
        let snapshot = RequestStatistics::new(8).snapshot();
        assert_eq!(snapshot, StatisticsSnapshot::default());
    }

    #[test]
    fn test_window_keeps_most_recent_samples() {
        let stats = RequestStatistics::new(4);
        for ms in [100, 200, 1, 2, 3, 4] {
            stats.record(Duration::from_millis(ms));
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.requests, 6);
        assert_eq!(snapshot.samples, 4);
        assert_eq!(snapshot.max, Duration::from_millis(4));
    }

    #[test]
    fn test_nearest_rank() {
        let sorted: Vec<Duration> = (1..=100).map(Duration::from_millis).collect();
        assert_eq!(percentile(&sorted, 50.0), Duration::from_millis(50));
        assert_eq!(percentile(&sorted, 99.0), Duration::from_millis(99));
        assert_eq!(percentile(&sorted, 100.0), Duration::from_millis(100));
    }
}
