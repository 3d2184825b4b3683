//! Time-series storage for stream health samples
//!
//! The health monitor records one sample per polling cycle. The store keeps
//! a bounded recent history plus running CPU load statistics for display.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Maximum number of samples to keep (1 hour at 1 sample/sec)
const MAX_HISTORY_SIZE: usize = 3600;

/// A single health sample
#[derive(Debug, Clone)]
pub struct HealthSample {
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
    /// CPU load of the processing callback (percent)
    pub cpu_load_percent: f32,
    /// Measured stream latency (ms)
    pub latency_ms: f32,
}

/// Running statistics over recorded samples
#[derive(Debug, Default, Clone)]
pub struct HealthSummary {
    /// Most recent CPU load (percent)
    pub current_cpu_load: f32,
    /// Minimum CPU load observed (percent)
    pub min_cpu_load: f32,
    /// Maximum CPU load observed (percent)
    pub max_cpu_load: f32,
    /// Average CPU load over the retained history (percent)
    pub avg_cpu_load: f32,
    /// Most recent latency (ms)
    pub latency_ms: f32,
    /// Samples recorded since the last reset
    pub sample_count: u64,
    /// When the first sample since the last reset was taken
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds between the first and the latest sample
    pub uptime_seconds: u64,
}

/// Bounded history of health samples
#[derive(Debug)]
pub struct HealthStore {
    history: VecDeque<HealthSample>,
    max_size: usize,
    summary: HealthSummary,
}

impl HealthStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::with_capacity(MAX_HISTORY_SIZE)
    }

    /// Create an empty store keeping at most `max_size` samples
    pub fn with_capacity(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            history: VecDeque::with_capacity(max_size),
            max_size,
            summary: Self::empty_summary(),
        }
    }

    fn empty_summary() -> HealthSummary {
        HealthSummary {
            min_cpu_load: f32::MAX,
            ..Default::default()
        }
    }

    /// Record a health sample taken now
    ///
    /// # Arguments
    /// * `cpu_load_percent` - CPU load of the processing callback
    /// * `latency_ms` - Current stream latency
    pub fn record(&mut self, cpu_load_percent: f32, latency_ms: f32) {
        self.record_at(Utc::now(), cpu_load_percent, latency_ms);
    }

    /// Record a health sample with an explicit timestamp
    pub fn record_at(&mut self, timestamp: DateTime<Utc>, cpu_load_percent: f32, latency_ms: f32) {
        if self.history.len() >= self.max_size {
            self.history.pop_front();
        }
        self.history.push_back(HealthSample {
            timestamp,
            cpu_load_percent,
            latency_ms,
        });

        let summary = &mut self.summary;
        summary.current_cpu_load = cpu_load_percent;
        summary.min_cpu_load = summary.min_cpu_load.min(cpu_load_percent);
        summary.max_cpu_load = summary.max_cpu_load.max(cpu_load_percent);
        summary.latency_ms = latency_ms;
        summary.sample_count += 1;

        let started = *summary.started_at.get_or_insert(timestamp);
        summary.uptime_seconds = (timestamp - started).num_seconds().max(0) as u64;

        let sum: f32 = self.history.iter().map(|s| s.cpu_load_percent).sum();
        summary.avg_cpu_load = sum / self.history.len() as f32;
    }

    /// Recorded samples, oldest first
    pub fn history(&self) -> &VecDeque<HealthSample> {
        &self.history
    }

    /// Running statistics
    pub fn summary(&self) -> &HealthSummary {
        &self.summary
    }

    /// CPU load values for plotting (last N points)
    ///
    /// # Returns
    /// Vector of (time_offset_seconds, cpu_load_percent) pairs, newest first
    pub fn cpu_plot_data(&self, count: usize) -> Vec<(f64, f32)> {
        let now = Utc::now();
        self.history
            .iter()
            .rev()
            .take(count)
            .map(|s| {
                let time_offset = (now - s.timestamp).num_milliseconds() as f64 / 1000.0;
                (-time_offset, s.cpu_load_percent)
            })
            .collect()
    }

    /// Clear history and reset statistics
    pub fn clear(&mut self) {
        self.history.clear();
        self.summary = Self::empty_summary();
    }
}

impl Default for HealthStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_record_updates_summary() {
        let mut store = HealthStore::new();
        store.record(10.0, 4.0);
        store.record(30.0, 4.0);
        store.record(20.0, 5.0);

        let summary = store.summary();
        assert_eq!(summary.sample_count, 3);
        assert_eq!(summary.current_cpu_load, 20.0);
        assert_eq!(summary.min_cpu_load, 10.0);
        assert_eq!(summary.max_cpu_load, 30.0);
        assert_relative_eq!(summary.avg_cpu_load, 20.0);
        assert_eq!(summary.latency_ms, 5.0);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut store = HealthStore::with_capacity(3);
        for i in 0..5 {
            store.record(i as f32, 0.0);
        }
        assert_eq!(store.history().len(), 3);
        assert_eq!(store.history()[0].cpu_load_percent, 2.0);
        assert_eq!(store.summary().sample_count, 5);
        assert_relative_eq!(store.summary().avg_cpu_load, 3.0);
    }

    #[test]
    fn test_uptime_from_timestamps() {
        let mut store = HealthStore::new();
        let t0 = Utc::now();
        store.record_at(t0, 1.0, 0.0);
        store.record_at(t0 + chrono::Duration::seconds(42), 1.0, 0.0);
        assert_eq!(store.summary().uptime_seconds, 42);
        assert_eq!(store.summary().started_at, Some(t0));
    }

    #[test]
    fn test_clear() {
        let mut store = HealthStore::new();
        store.record(50.0, 2.0);
        store.clear();
        assert!(store.history().is_empty());
        assert_eq!(store.summary().sample_count, 0);
        assert_eq!(store.summary().started_at, None);
    }

    #[test]
    fn test_cpu_plot_data_newest_first() {
        let mut store = HealthStore::new();
        store.record(1.0, 0.0);
        store.record(2.0, 0.0);
        let data = store.cpu_plot_data(10);
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].1, 2.0);
        assert!(data[0].0 <= 0.0);
    }
}
