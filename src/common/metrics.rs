//! Acquisition metrics
//!
//! # Design Principles (KISS)
//! - Lock-free atomic counters on the read/decode path
//! - Simple snapshot mechanism for progress reporting

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for one device's acquisition loop
///
/// All operations use Relaxed ordering. Values are eventually consistent,
/// which is enough for progress display.
#[derive(Debug)]
pub struct AtomicCounters {
    /// FIFO reads that returned at least one record
    pub batches: AtomicU64,
    /// Raw records read
    pub records: AtomicU64,
    /// Events handed downstream
    pub events: AtomicU64,
    /// Overflow records applied
    pub overflows: AtomicU64,
    /// Undefined special records skipped
    pub anomalies: AtomicU64,
}

impl AtomicCounters {
    /// Create new zeroed counters
    pub fn new() -> Self {
        Self {
            batches: AtomicU64::new(0),
            records: AtomicU64::new(0),
            events: AtomicU64::new(0),
            overflows: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
        }
    }

    /// Account one decoded batch
    #[inline]
    pub fn add_batch(&self, records: u64, events: u64, overflows: u64, anomalies: u64) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.records.fetch_add(records, Ordering::Relaxed);
        self.events.fetch_add(events, Ordering::Relaxed);
        self.overflows.fetch_add(overflows, Ordering::Relaxed);
        self.anomalies.fetch_add(anomalies, Ordering::Relaxed);
    }

    /// Take a snapshot of current values
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
        }
    }
}

impl Default for AtomicCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of counter values at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub batches: u64,
    pub records: u64,
    pub events: u64,
    pub overflows: u64,
    pub anomalies: u64,
}

impl CounterSnapshot {
    /// Calculate rates between two snapshots given elapsed seconds
    pub fn rate_from(&self, prev: &CounterSnapshot, elapsed_secs: f64) -> RateSnapshot {
        if elapsed_secs <= 0.0 {
            return RateSnapshot::default();
        }

        RateSnapshot {
            records_rate: (self.records.saturating_sub(prev.records)) as f64 / elapsed_secs,
            events_rate: (self.events.saturating_sub(prev.events)) as f64 / elapsed_secs,
        }
    }
}

/// Rates derived from two snapshots
#[derive(Debug, Clone, Copy, Default)]
pub struct RateSnapshot {
    /// Records read per second
    pub records_rate: f64,
    /// Events decoded per second
    pub events_rate: f64,
}

impl RateSnapshot {
    /// Format record rate as human-readable string (K/s, M/s, etc.)
    pub fn format_records_rate(&self) -> String {
        format_rate(self.records_rate)
    }

    /// Format event rate as human-readable string (K/s, M/s, etc.)
    pub fn format_events_rate(&self) -> String {
        format_rate(self.events_rate)
    }
}

fn format_rate(rate: f64) -> String {
    if rate >= 1_000_000.0 {
        format!("{:.2} M/s", rate / 1_000_000.0)
    } else if rate >= 1_000.0 {
        format!("{:.2} K/s", rate / 1_000.0)
    } else {
        format!("{:.0} /s", rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_counters_new() {
        let counters = AtomicCounters::new();
        assert_eq!(counters.snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn test_add_batch() {
        let counters = AtomicCounters::new();
        counters.add_batch(100, 90, 8, 2);
        counters.add_batch(10, 10, 0, 0);

        let snap = counters.snapshot();
        assert_eq!(snap.batches, 2);
        assert_eq!(snap.records, 110);
        assert_eq!(snap.events, 100);
        assert_eq!(snap.overflows, 8);
        assert_eq!(snap.anomalies, 2);
    }

    #[test]
    fn test_rate_calculation() {
        let prev = CounterSnapshot {
            records: 1000,
            events: 900,
            ..Default::default()
        };
        let current = CounterSnapshot {
            records: 3000,
            events: 2700,
            ..Default::default()
        };

        let rate = current.rate_from(&prev, 2.0);
        assert_eq!(rate.records_rate, 1000.0);
        assert_eq!(rate.events_rate, 900.0);
    }

    #[test]
    fn test_rate_zero_elapsed() {
        let current = CounterSnapshot {
            records: 100,
            ..Default::default()
        };
        let rate = current.rate_from(&CounterSnapshot::default(), 0.0);
        assert_eq!(rate.records_rate, 0.0);
    }

    #[test]
    fn test_format_rates() {
        let rate = RateSnapshot {
            records_rate: 500.0,
            events_rate: 1500.0,
        };
        assert_eq!(rate.format_records_rate(), "500 /s");
        assert_eq!(rate.format_events_rate(), "1.50 K/s");

        let rate = RateSnapshot {
            records_rate: 2_500_000.0,
            events_rate: 0.0,
        };
        assert_eq!(rate.format_records_rate(), "2.50 M/s");
    }
}
