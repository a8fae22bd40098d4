// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Prometheus remote-write 1.0 wire types, written out by hand rather than
//! generated so the build needs no protoc. Field numbers follow
//! prometheus/prompb/types.proto and remote.proto.

use crate::series::{self, TimeSeriesBinary};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteRequest {
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
    #[prost(message, repeated, tag = "3")]
    pub metadata: Vec<MetricMetadata>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TimeSeries {
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Sample>,
    #[prost(message, repeated, tag = "3")]
    pub exemplars: Vec<Exemplar>,
    #[prost(message, repeated, tag = "4")]
    pub histograms: Vec<Histogram>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Label {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Sample {
    #[prost(double, tag = "1")]
    pub value: f64,
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Exemplar {
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(double, tag = "2")]
    pub value: f64,
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Histogram {
    #[prost(oneof = "histogram::Count", tags = "1, 2")]
    pub count: Option<histogram::Count>,
    #[prost(double, tag = "3")]
    pub sum: f64,
    #[prost(sint32, tag = "4")]
    pub schema: i32,
    #[prost(double, tag = "5")]
    pub zero_threshold: f64,
    #[prost(oneof = "histogram::ZeroCount", tags = "6, 7")]
    pub zero_count: Option<histogram::ZeroCount>,
    #[prost(message, repeated, tag = "8")]
    pub negative_spans: Vec<BucketSpan>,
    #[prost(sint64, repeated, tag = "9")]
    pub negative_deltas: Vec<i64>,
    #[prost(double, repeated, tag = "10")]
    pub negative_counts: Vec<f64>,
    #[prost(message, repeated, tag = "11")]
    pub positive_spans: Vec<BucketSpan>,
    #[prost(sint64, repeated, tag = "12")]
    pub positive_deltas: Vec<i64>,
    #[prost(double, repeated, tag = "13")]
    pub positive_counts: Vec<f64>,
    #[prost(enumeration = "histogram::ResetHint", tag = "14")]
    pub reset_hint: i32,
    #[prost(int64, tag = "15")]
    pub timestamp: i64,
}

pub mod histogram {
    #[derive(Clone, Copy, PartialEq, ::prost::Oneof)]
    pub enum Count {
        #[prost(uint64, tag = "1")]
        CountInt(u64),
        #[prost(double, tag = "2")]
        CountFloat(f64),
    }

    #[derive(Clone, Copy, PartialEq, ::prost::Oneof)]
    pub enum ZeroCount {
        #[prost(uint64, tag = "6")]
        ZeroCountInt(u64),
        #[prost(double, tag = "7")]
        ZeroCountFloat(f64),
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum ResetHint {
        Unknown = 0,
        Yes = 1,
        No = 2,
        Gauge = 3,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BucketSpan {
    #[prost(sint32, tag = "1")]
    pub offset: i32,
    #[prost(uint32, tag = "2")]
    pub length: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetricMetadata {
    #[prost(enumeration = "MetricType", tag = "1")]
    pub r#type: i32,
    #[prost(string, tag = "2")]
    pub metric_family_name: String,
    #[prost(string, tag = "4")]
    pub help: String,
    #[prost(string, tag = "5")]
    pub unit: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum MetricType {
    Unknown = 0,
    Counter = 1,
    Gauge = 2,
    Histogram = 3,
    Gaugehistogram = 4,
    Summary = 5,
    Info = 6,
    Stateset = 7,
}

impl MetricType {
    pub fn parse(value: &str) -> MetricType {
        match value.to_ascii_lowercase().as_str() {
            "counter" => MetricType::Counter,
            "gauge" => MetricType::Gauge,
            "histogram" => MetricType::Histogram,
            "gaugehistogram" => MetricType::Gaugehistogram,
            "summary" => MetricType::Summary,
            "info" => MetricType::Info,
            "stateset" => MetricType::Stateset,
            _ => MetricType::Unknown,
        }
    }
}

impl From<&series::Histogram> for Histogram {
    fn from(h: &series::Histogram) -> Histogram {
        Histogram {
            count: Some(histogram::Count::CountInt(h.count.int_value)),
            sum: h.sum,
            schema: h.schema,
            zero_threshold: h.zero_threshold,
            zero_count: Some(histogram::ZeroCount::ZeroCountInt(h.zero_count.int_value)),
            negative_spans: spans(&h.negative_spans),
            negative_deltas: h.negative_buckets.clone(),
            negative_counts: Vec::new(),
            positive_spans: spans(&h.positive_spans),
            positive_deltas: h.positive_buckets.clone(),
            positive_counts: Vec::new(),
            reset_hint: h.reset_hint,
            timestamp: h.timestamp_millisecond,
        }
    }
}

impl From<&series::FloatHistogram> for Histogram {
    fn from(h: &series::FloatHistogram) -> Histogram {
        Histogram {
            count: Some(histogram::Count::CountFloat(h.count.float_value)),
            sum: h.sum,
            schema: h.schema,
            zero_threshold: h.zero_threshold,
            zero_count: Some(histogram::ZeroCount::ZeroCountFloat(
                h.zero_count.float_value,
            )),
            negative_spans: spans(&h.negative_spans),
            negative_deltas: Vec::new(),
            negative_counts: h.negative_counts.clone(),
            positive_spans: spans(&h.positive_spans),
            positive_deltas: Vec::new(),
            positive_counts: h.positive_counts.clone(),
            reset_hint: h.reset_hint,
            timestamp: h.timestamp_millisecond,
        }
    }
}

fn spans(spans: &[series::BucketSpan]) -> Vec<BucketSpan> {
    spans
        .iter()
        .map(|s| BucketSpan {
            offset: s.offset,
            length: s.length,
        })
        .collect()
}

/// Builds one [`TimeSeries`] per binary series, folding external labels in
/// on top (an external label overrides a series label of the same name).
pub fn to_write_request(
    batch: &[TimeSeriesBinary],
    external_labels: &std::collections::HashMap<String, String>,
) -> WriteRequest {
    let timeseries = batch
        .iter()
        .map(|ts| {
            let mut labels: Vec<Label> = ts
                .labels
                .iter()
                .map(|l| Label {
                    name: l.name.clone(),
                    value: l.value.clone(),
                })
                .collect();
            for (name, value) in external_labels {
                match labels.iter_mut().find(|l| &l.name == name) {
                    Some(existing) => existing.value = value.clone(),
                    None => labels.push(Label {
                        name: name.clone(),
                        value: value.clone(),
                    }),
                }
            }

            let mut histograms = Vec::new();
            if let Some(h) = &ts.histograms.histogram {
                histograms.push(Histogram::from(h));
            }
            if let Some(h) = &ts.histograms.float_histogram {
                histograms.push(Histogram::from(h));
            }

            TimeSeries {
                labels,
                samples: vec![Sample {
                    value: ts.value,
                    timestamp: ts.timestamp,
                }],
                exemplars: Vec::new(),
                histograms,
            }
        })
        .collect();
    WriteRequest {
        timeseries,
        metadata: Vec::new(),
    }
}

/// Builds a metadata-only request. Entries missing the reserved label
/// triple are skipped; the metadata pipeline occasionally sees malformed
/// records and they must not poison the batch.
pub fn to_metadata_request(batch: &[TimeSeriesBinary]) -> WriteRequest {
    let metadata = batch
        .iter()
        .filter_map(|ts| {
            let metric_type = ts.label_value(series::META_TYPE)?;
            let help = ts.label_value(series::META_HELP)?;
            let unit = ts.label_value(series::META_UNIT)?;
            Some(MetricMetadata {
                r#type: MetricType::parse(metric_type) as i32,
                metric_family_name: ts.label_value("__name__").unwrap_or_default().to_string(),
                help: help.to_string(),
                unit: unit.to_string(),
            })
        })
        .collect();
    WriteRequest {
        timeseries: Vec::new(),
        metadata,
    }
}
