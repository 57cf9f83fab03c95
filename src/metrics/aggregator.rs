//! In-process metrics accumulation.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::labels::Labels;
use super::snapshot::{MetricEntry, MetricsSnapshot};
use super::{CACHE_REQUESTS_TOTAL, METRICS_INTERNAL_ERRORS};

/// Default cap on distinct `(name, labels)` series.
pub const DEFAULT_MAX_SERIES: usize = 10_000;

/// Running totals for one series.
#[derive(Debug, Clone, Copy)]
struct Accumulator {
    sum: f64,
    count: u64,
}

#[derive(Debug, Default)]
struct Series {
    by_name: HashMap<String, HashMap<Labels, Accumulator>>,
    len: usize,
}

/// Thread-safe accumulator of named, labelled samples.
///
/// Counters and durations share one representation: a running sum plus the
/// number of samples, so a counter's value is its total and a duration's
/// mean is `value / count`.
///
/// Recording never fails. Samples that can't be stored (non-finite values,
/// empty names, series beyond the cap) are dropped and counted under
/// `metrics_internal_errors`.
#[derive(Debug)]
pub struct MetricsAggregator {
    series: Mutex<Series>,
    max_series: usize,
    internal_errors: AtomicU64,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    /// Create an empty aggregator with the default series cap.
    pub fn new() -> Self {
        Self::with_max_series(DEFAULT_MAX_SERIES)
    }

    /// Create an empty aggregator holding at most `max_series` series.
    pub fn with_max_series(max_series: usize) -> Self {
        Self {
            series: Mutex::new(Series::default()),
            max_series,
            internal_errors: AtomicU64::new(0),
        }
    }

    /// Add `value` to the series `(name, labels)`.
    pub fn record(&self, name: &str, value: f64, labels: &Labels) {
        if name.is_empty() || !value.is_finite() {
            self.internal_error(name, "rejected sample");
            return;
        }

        let mut series = self.series.lock();
        let at_capacity = series.len >= self.max_series;

        if let Some(acc) = series
            .by_name
            .get_mut(name)
            .and_then(|by_labels| by_labels.get_mut(labels))
        {
            acc.sum += value;
            acc.count += 1;
            return;
        }

        if at_capacity {
            drop(series);
            self.internal_error(name, "series limit reached");
            return;
        }

        series
            .by_name
            .entry(name.to_string())
            .or_default()
            .insert(labels.clone(), Accumulator { sum: value, count: 1 });
        series.len += 1;
    }

    /// Add one to a counter.
    pub fn increment(&self, name: &str, labels: &Labels) {
        self.record(name, 1.0, labels);
    }

    /// Record a duration sample in milliseconds.
    pub fn record_duration(&self, name: &str, duration: Duration, labels: &Labels) {
        self.record(name, duration.as_secs_f64() * 1000.0, labels);
    }

    /// Count one lookup against a named cache.
    pub fn record_cache_access(&self, cache: &str, hit: bool) {
        let labels = Labels::new()
            .with("cache", cache)
            .with("result", if hit { "hit" } else { "miss" });
        self.increment(CACHE_REQUESTS_TOTAL, &labels);
    }

    /// A consistent copy of every series.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = {
            let series = self.series.lock();
            series
                .by_name
                .iter()
                .map(|(name, by_labels)| {
                    let entries = by_labels
                        .iter()
                        .map(|(labels, acc)| MetricEntry {
                            value: acc.sum,
                            labels: labels.clone(),
                            count: acc.count,
                        })
                        .collect();
                    (name.clone(), entries)
                })
                .collect::<MetricsSnapshot>()
        };

        let internal_errors = self.internal_errors.load(Ordering::Relaxed);
        if internal_errors > 0 {
            snapshot.insert(
                METRICS_INTERNAL_ERRORS,
                MetricEntry {
                    value: internal_errors as f64,
                    labels: Labels::new(),
                    count: internal_errors,
                },
            );
        }
        snapshot
    }

    /// Clear every series. For tests and operational tooling only.
    pub fn reset(&self) {
        let mut series = self.series.lock();
        *series = Series::default();
        self.internal_errors.store(0, Ordering::Relaxed);
        debug!("Metrics reset");
    }

    /// Number of distinct series held.
    pub fn series_count(&self) -> usize {
        self.series.lock().len
    }

    /// Number of samples dropped so far.
    pub fn internal_errors(&self) -> u64 {
        self.internal_errors.load(Ordering::Relaxed)
    }

    fn internal_error(&self, name: &str, reason: &str) {
        let previous = self.internal_errors.fetch_add(1, Ordering::Relaxed);
        // Only the first drop is worth a warning; the counter tells the rest.
        if previous == 0 {
            warn!(metric = name, reason, "Dropping metric sample");
        } else {
            debug!(metric = name, reason, "Dropping metric sample");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn route_labels(status: &str) -> Labels {
        Labels::from([("method", "GET"), ("route", "/api/posts"), ("status", status)])
    }

    #[test]
    fn test_record_creates_and_accumulates() {
        let metrics = MetricsAggregator::new();

        metrics.record("latency_ms", 10.0, &route_labels("200"));
        metrics.record("latency_ms", 30.0, &route_labels("200"));

        let snapshot = metrics.snapshot();
        let entry = snapshot.get("latency_ms", &route_labels("200")).unwrap();
        assert_eq!(entry.value, 40.0);
        assert_eq!(entry.count, 2);
        assert_eq!(entry.mean(), 20.0);
    }

    #[test]
    fn test_distinct_labels_are_distinct_series() {
        let metrics = MetricsAggregator::new();

        metrics.increment("http_requests_total", &route_labels("200"));
        metrics.increment("http_requests_total", &route_labels("500"));
        metrics.increment("http_requests_total", &route_labels("500"));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.entries("http_requests_total").len(), 2);
        assert_eq!(snapshot.get("http_requests_total", &route_labels("500")).unwrap().value, 2.0);
        assert_eq!(snapshot.total("http_requests_total"), 3.0);
    }

    #[test]
    fn test_label_order_does_not_matter() {
        let metrics = MetricsAggregator::new();

        metrics.increment("hits", &Labels::new().with("a", "1").with("b", "2"));
        metrics.increment("hits", &Labels::new().with("b", "2").with("a", "1"));

        assert_eq!(metrics.series_count(), 1);
        assert_eq!(metrics.snapshot().total("hits"), 2.0);
    }

    #[test]
    fn test_record_duration_in_millis() {
        let metrics = MetricsAggregator::new();
        metrics.record_duration("d", Duration::from_micros(2500), &Labels::new());
        assert_eq!(metrics.snapshot().total("d"), 2.5);
    }

    #[test]
    fn test_invalid_samples_counted_not_stored() {
        let metrics = MetricsAggregator::new();

        metrics.record("latency_ms", f64::NAN, &Labels::new());
        metrics.record("latency_ms", f64::INFINITY, &Labels::new());
        metrics.record("", 1.0, &Labels::new());

        assert_eq!(metrics.internal_errors(), 3);
        let snapshot = metrics.snapshot();
        assert!(snapshot.entries("latency_ms").is_empty());
        assert_eq!(snapshot.total(METRICS_INTERNAL_ERRORS), 3.0);
    }

    #[test]
    fn test_series_cap() {
        let metrics = MetricsAggregator::with_max_series(2);

        metrics.increment("a", &Labels::new());
        metrics.increment("b", &Labels::new());
        metrics.increment("c", &Labels::new());
        // existing series keep accumulating at the cap
        metrics.increment("a", &Labels::new());

        assert_eq!(metrics.series_count(), 2);
        assert_eq!(metrics.internal_errors(), 1);
        assert_eq!(metrics.snapshot().total("a"), 2.0);
    }

    #[test]
    fn test_cache_access() {
        let metrics = MetricsAggregator::new();

        metrics.record_cache_access("analytics", true);
        metrics.record_cache_access("analytics", true);
        metrics.record_cache_access("analytics", true);
        metrics.record_cache_access("analytics", false);

        assert_eq!(metrics.snapshot().cache_hit_rate(), Some(0.75));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let metrics = MetricsAggregator::new();
        metrics.increment("x", &Labels::new());

        let before = metrics.snapshot();
        metrics.increment("x", &Labels::new());

        assert_eq!(before.total("x"), 1.0);
        assert_eq!(metrics.snapshot().total("x"), 2.0);
    }

    #[test]
    fn test_reset() {
        let metrics = MetricsAggregator::new();
        metrics.increment("x", &Labels::new());
        metrics.record("x", f64::NAN, &Labels::new());

        metrics.reset();

        assert!(metrics.snapshot().is_empty());
        assert_eq!(metrics.series_count(), 0);
    }

    #[test]
    fn test_concurrent_writers() {
        let metrics = Arc::new(MetricsAggregator::new());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    let labels = Labels::new().with("thread", (t % 2).to_string());
                    for _ in 0..1000 {
                        metrics.record("work_ms", 1.0, &labels);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total("work_ms"), 8000.0);
        assert_eq!(snapshot.count("work_ms"), 8000);
        assert_eq!(snapshot.entries("work_ms").len(), 2);
    }
}
