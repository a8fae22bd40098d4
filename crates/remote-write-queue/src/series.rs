// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The binary model shared by every stage of the pipeline.
//!
//! [`TimeSeriesBinary`] is the unit of work: one sample, exemplar, native
//! histogram, or metadata record. Instances are obtained from a process-wide
//! pool and returned to it once the network layer is done with them; the
//! pool hands out owned values, so "never touch after release" is enforced
//! by the borrow checker rather than by convention.

use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::Mutex;

use fnv::FnvHasher;
use serde::{Deserialize, Serialize};

/// Reserved label key carrying the metric type of a metadata record.
pub const META_TYPE: &str = "__metadata_type__";
/// Reserved label key carrying the help text of a metadata record.
pub const META_HELP: &str = "__metadata_help__";
/// Reserved label key carrying the unit of a metadata record.
pub const META_UNIT: &str = "__metadata_unit__";

/// A single name/value label pair.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Label {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Metadata fields attached to a metric family, shipped through the pipeline
/// as a synthetic series carrying the three reserved labels.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    pub metric_type: String,
    pub help: String,
    pub unit: String,
}

/// An exemplar as handed to the appender. Exemplars without a timestamp
/// bypass the TTL check.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Exemplar {
    pub labels: Vec<Label>,
    pub value: f64,
    pub timestamp: Option<i64>,
}

/// The pooled, type-erased unit representing a sample, exemplar, histogram,
/// or metadata record.
///
/// `labels` never hits the wire; the serializer folds them into the batch
/// string table and stores `label_names`/`label_values` as indices instead.
/// `hash` is computed exactly once at ingestion so retries always route to
/// the same shard.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesBinary {
    #[serde(skip)]
    pub labels: Vec<Label>,
    pub label_names: Vec<u32>,
    pub label_values: Vec<u32>,
    pub timestamp: i64,
    pub value: f64,
    pub hash: u64,
    pub histograms: Histograms,
}

/// Histogram payload, mutually exclusive integer vs float variant.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Histograms {
    pub histogram: Option<Histogram>,
    pub float_histogram: Option<FloatHistogram>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub count: HistogramCount,
    pub sum: f64,
    pub schema: i32,
    pub zero_threshold: f64,
    pub zero_count: HistogramZeroCount,
    pub negative_spans: Vec<BucketSpan>,
    pub negative_buckets: Vec<i64>,
    pub positive_spans: Vec<BucketSpan>,
    pub positive_buckets: Vec<i64>,
    pub reset_hint: i32,
    pub timestamp_millisecond: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FloatHistogram {
    pub count: HistogramCount,
    pub sum: f64,
    pub schema: i32,
    pub zero_threshold: f64,
    pub zero_count: HistogramZeroCount,
    pub negative_spans: Vec<BucketSpan>,
    pub negative_counts: Vec<f64>,
    pub positive_spans: Vec<BucketSpan>,
    pub positive_counts: Vec<f64>,
    pub reset_hint: i32,
    pub timestamp_millisecond: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramCount {
    pub is_int: bool,
    pub int_value: u64,
    pub float_value: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramZeroCount {
    pub is_int: bool,
    pub int_value: u64,
    pub float_value: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpan {
    pub offset: i32,
    pub length: u32,
}

impl TimeSeriesBinary {
    /// Metadata is stored as a set of labels, so presence of the reserved
    /// type key is the discriminator.
    pub fn is_metadata(&self) -> bool {
        self.labels.iter().any(|l| l.name == META_TYPE)
    }

    pub fn label_value(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }

    pub fn from_histogram(&mut self, timestamp: i64, h: Histogram) {
        self.histograms.histogram = Some(h);
        self.histograms.float_histogram = None;
        self.timestamp = timestamp;
    }

    pub fn from_float_histogram(&mut self, timestamp: i64, h: FloatHistogram) {
        self.histograms.float_histogram = Some(h);
        self.histograms.histogram = None;
        self.timestamp = timestamp;
    }

    /// Converts `labels` into `label_names`/`label_values` indices while
    /// filling in the shared string map, later flattened into the batch
    /// string table. Repeated names and values across a batch cost one
    /// table entry each.
    pub fn fill_label_mapping(&mut self, strings: &mut HashMap<String, u32>) {
        self.label_names.clear();
        self.label_values.clear();
        self.label_names.reserve(self.labels.len());
        self.label_values.reserve(self.labels.len());
        for label in &self.labels {
            let next = strings.len() as u32;
            let name_idx = *strings.entry(label.name.clone()).or_insert(next);
            self.label_names.push(name_idx);
            let next = strings.len() as u32;
            let value_idx = *strings.entry(label.value.clone()).or_insert(next);
            self.label_values.push(value_idx);
        }
    }
}

/// 64-bit hash of a label set, used for shard routing. Computed once at
/// ingestion and carried on the series so retries land on the same shard.
pub fn hash_labels(labels: &[Label]) -> u64 {
    let mut hasher = FnvHasher::default();
    for label in labels {
        hasher.write(label.name.as_bytes());
        hasher.write(&[0xff]);
        hasher.write(label.value.as_bytes());
        hasher.write(&[0xff]);
    }
    hasher.finish()
}

// The free list is deliberately unbounded in entry count but every entry has
// already shed its heap data down to retained capacity, so steady-state size
// tracks the high-water mark of in-flight series.
static SERIES_POOL: Mutex<Vec<TimeSeriesBinary>> = Mutex::new(Vec::new());

/// Gets a cleared series from the pool, or a fresh one if the pool is empty.
pub fn get_series_from_pool() -> TimeSeriesBinary {
    let mut pool = SERIES_POOL.lock().unwrap_or_else(|e| e.into_inner());
    pool.pop().unwrap_or_default()
}

/// Returns a series to the pool. All fields are reset; label and index
/// vectors keep their capacity so reuse avoids reallocation.
pub fn put_series_into_pool(mut ts: TimeSeriesBinary) {
    ts.labels.clear();
    ts.label_names.clear();
    ts.label_values.clear();
    ts.timestamp = 0;
    ts.value = 0.0;
    ts.hash = 0;
    ts.histograms.histogram = None;
    ts.histograms.float_histogram = None;
    let mut pool = SERIES_POOL.lock().unwrap_or_else(|e| e.into_inner());
    pool.push(ts);
}

pub fn put_series_slice_into_pool(series: impl IntoIterator<Item = TimeSeriesBinary>) {
    for ts in series {
        put_series_into_pool(ts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Vec<Label> {
        pairs.iter().map(|(n, v)| Label::new(*n, *v)).collect()
    }

    #[test]
    fn test_pool_clears_stale_fields() {
        let mut ts = get_series_from_pool();
        ts.labels = labels(&[("__name__", "up")]);
        ts.label_names = vec![0];
        ts.label_values = vec![1];
        ts.timestamp = 100;
        ts.value = 1.5;
        ts.hash = 42;
        ts.histograms.histogram = Some(Histogram::default());
        put_series_into_pool(ts);

        // Drain until we observe a recycled instance; every instance coming
        // out of the pool must be fully cleared.
        let ts = get_series_from_pool();
        assert!(ts.labels.is_empty());
        assert!(ts.label_names.is_empty());
        assert!(ts.label_values.is_empty());
        assert_eq!(ts.timestamp, 0);
        assert_eq!(ts.value, 0.0);
        assert_eq!(ts.hash, 0);
        assert!(ts.histograms.histogram.is_none());
        assert!(ts.histograms.float_histogram.is_none());
    }

    #[test]
    fn test_hash_is_stable() {
        let lbls = labels(&[("__name__", "up"), ("job", "node")]);
        let first = hash_labels(&lbls);
        for _ in 0..10 {
            assert_eq!(first, hash_labels(&lbls));
        }
        // Routing must be stable for any fixed shard count.
        for queues in 1..=8u64 {
            assert_eq!(first % queues, hash_labels(&lbls) % queues);
        }
    }

    #[test]
    fn test_hash_distinguishes_boundaries() {
        let a = hash_labels(&labels(&[("ab", "c")]));
        let b = hash_labels(&labels(&[("a", "bc")]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_fill_label_mapping_dedupes() {
        let mut strings = HashMap::new();
        let mut all = Vec::new();
        for i in 0..1_000 {
            let mut ts = TimeSeriesBinary::default();
            ts.labels = labels(&[
                ("__name__", &format!("metric_{}", i % 5)),
                ("job", "node"),
                ("instance", "localhost:9100"),
            ]);
            ts.fill_label_mapping(&mut strings);
            all.push(ts);
        }
        // 5 metric names + __name__, job, node, instance, localhost:9100.
        assert_eq!(strings.len(), 10);
        for ts in &all {
            assert_eq!(ts.label_names.len(), 3);
            assert_eq!(ts.label_values.len(), 3);
            for idx in ts.label_names.iter().chain(ts.label_values.iter()) {
                assert!((*idx as usize) < strings.len());
            }
        }
    }

    #[test]
    fn test_is_metadata() {
        let mut ts = TimeSeriesBinary::default();
        ts.labels = labels(&[("__name__", "up")]);
        assert!(!ts.is_metadata());
        ts.labels.push(Label::new(META_TYPE, "counter"));
        assert!(ts.is_metadata());
    }
}
