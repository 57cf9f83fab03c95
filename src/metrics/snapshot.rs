//! Point-in-time metric snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::labels::Labels;
use super::{CACHE_REQUESTS_TOTAL, HTTP_ERRORS_TOTAL, HTTP_REQUESTS_TOTAL};

/// One series as exported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    /// Sum of all recorded values
    pub value: f64,
    /// The series' labels
    pub labels: Labels,
    /// Number of recorded samples
    pub count: u64,
}

impl MetricEntry {
    /// Average sample value.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.value / self.count as f64
        }
    }
}

/// Read-only copy of every series at one point in time.
///
/// Serializes as `{ "<name>": [ { "value", "labels", "count" }, ... ] }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsSnapshot {
    metrics: BTreeMap<String, Vec<MetricEntry>>,
}

impl MetricsSnapshot {
    pub(super) fn insert(&mut self, name: &str, entry: MetricEntry) {
        self.metrics.entry(name.to_string()).or_default().push(entry);
    }

    /// All series recorded under `name`, sorted by labels.
    pub fn entries(&self, name: &str) -> &[MetricEntry] {
        self.metrics.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The series with exactly these labels.
    pub fn get(&self, name: &str, labels: &Labels) -> Option<&MetricEntry> {
        self.entries(name).iter().find(|entry| &entry.labels == labels)
    }

    /// Sum of values across every series of `name`.
    pub fn total(&self, name: &str) -> f64 {
        self.entries(name).iter().map(|entry| entry.value).sum()
    }

    /// Sample count across every series of `name`.
    pub fn count(&self, name: &str) -> u64 {
        self.entries(name).iter().map(|entry| entry.count).sum()
    }

    /// Sum of values across the series of `name` matching one label.
    pub fn total_where(&self, name: &str, label: &str, value: &str) -> f64 {
        self.entries(name)
            .iter()
            .filter(|entry| entry.labels.get(label) == Some(value))
            .map(|entry| entry.value)
            .sum()
    }

    /// Fraction of HTTP requests that ended in an error status.
    pub fn error_rate(&self) -> Option<f64> {
        ratio(self.total(HTTP_ERRORS_TOTAL), self.total(HTTP_REQUESTS_TOTAL))
    }

    /// Fraction of cache lookups that hit.
    pub fn cache_hit_rate(&self) -> Option<f64> {
        ratio(
            self.total_where(CACHE_REQUESTS_TOTAL, "result", "hit"),
            self.total(CACHE_REQUESTS_TOTAL),
        )
    }

    /// Metric names present, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

impl FromIterator<(String, Vec<MetricEntry>)> for MetricsSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, Vec<MetricEntry>)>>(iter: I) -> Self {
        let metrics = iter
            .into_iter()
            .map(|(name, mut entries)| {
                entries.sort_by(|a, b| a.labels.cmp(&b.labels));
                (name, entries)
            })
            .collect();
        Self { metrics }
    }
}

fn ratio(part: f64, whole: f64) -> Option<f64> {
    (whole > 0.0).then(|| part / whole)
}
