// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ingestion surface: accepts samples, exemplars, native histograms, and
//! metadata and fans them out to every endpoint's serializer.
//!
//! The TTL is enforced here first, so data that arrives already stale never
//! costs a disk write; it is enforced again at the other end of the staging
//! queue. Stale drops are silent successes, matching scrape-pipeline
//! expectations where a slow target must not poison the whole batch.

use std::time::Duration;

use tracing::debug;

use crate::endpoint::millis_now;
use crate::error::PipelineClosed;
use crate::serializer::SerializerHandle;
use crate::series::{
    get_series_from_pool, hash_labels, Exemplar, FloatHistogram, Histogram, Label, Metadata,
    META_HELP, META_TYPE, META_UNIT,
};

/// One scrape/ingest session. Cheap to create; holds no buffered state, so
/// `commit` and `rollback` are advisory no-ops kept for interface symmetry
/// with transactional appenders.
pub struct QueueAppender {
    ttl: Duration,
    outputs: Vec<SerializerHandle>,
}

impl QueueAppender {
    pub fn new(ttl: Duration, outputs: Vec<SerializerHandle>) -> QueueAppender {
        QueueAppender { ttl, outputs }
    }

    /// Appends one sample. Samples older than the TTL are silently dropped.
    pub async fn append(
        &self,
        labels: Vec<Label>,
        timestamp: i64,
        value: f64,
    ) -> Result<(), PipelineClosed> {
        if self.is_stale(timestamp) {
            return Ok(());
        }
        let mut ts = get_series_from_pool();
        ts.hash = hash_labels(&labels);
        ts.labels = labels;
        ts.timestamp = timestamp;
        ts.value = value;
        self.fan_out(ts, false).await
    }

    /// Appends an exemplar as its own series. An exemplar without a
    /// timestamp cannot be stale, so it bypasses the TTL check.
    pub async fn append_exemplar(
        &self,
        labels: Vec<Label>,
        exemplar: Exemplar,
    ) -> Result<(), PipelineClosed> {
        if let Some(timestamp) = exemplar.timestamp {
            if self.is_stale(timestamp) {
                return Ok(());
            }
        }
        let mut ts = get_series_from_pool();
        ts.hash = hash_labels(&labels);
        ts.labels = labels;
        ts.labels.extend(exemplar.labels);
        ts.timestamp = exemplar.timestamp.unwrap_or(0);
        ts.value = exemplar.value;
        self.fan_out(ts, false).await
    }

    pub async fn append_histogram(
        &self,
        labels: Vec<Label>,
        timestamp: i64,
        histogram: Histogram,
    ) -> Result<(), PipelineClosed> {
        if self.is_stale(timestamp) {
            return Ok(());
        }
        let mut ts = get_series_from_pool();
        ts.hash = hash_labels(&labels);
        ts.labels = labels;
        ts.from_histogram(timestamp, histogram);
        self.fan_out(ts, false).await
    }

    pub async fn append_float_histogram(
        &self,
        labels: Vec<Label>,
        timestamp: i64,
        histogram: FloatHistogram,
    ) -> Result<(), PipelineClosed> {
        if self.is_stale(timestamp) {
            return Ok(());
        }
        let mut ts = get_series_from_pool();
        ts.hash = hash_labels(&labels);
        ts.labels = labels;
        ts.from_float_histogram(timestamp, histogram);
        self.fan_out(ts, false).await
    }

    /// Records metadata for the metric family named by `labels`, shipped as
    /// a synthetic series carrying the reserved metadata labels.
    pub async fn update_metadata(
        &self,
        labels: Vec<Label>,
        metadata: Metadata,
    ) -> Result<(), PipelineClosed> {
        let mut ts = get_series_from_pool();
        ts.hash = hash_labels(&labels);
        ts.labels = labels;
        ts.labels.push(Label::new(META_TYPE, metadata.metric_type));
        ts.labels.push(Label::new(META_HELP, metadata.help));
        ts.labels.push(Label::new(META_UNIT, metadata.unit));
        self.fan_out(ts, true).await
    }

    pub fn commit(&self) {}

    pub fn rollback(&self) {}

    fn is_stale(&self, timestamp: i64) -> bool {
        let stale = timestamp < millis_now().saturating_sub(self.ttl.as_millis() as i64);
        if stale {
            debug!("dropping sample older than ttl, timestamp {timestamp}");
        }
        stale
    }

    async fn fan_out(
        &self,
        ts: crate::series::TimeSeriesBinary,
        meta: bool,
    ) -> Result<(), PipelineClosed> {
        // The last output takes ownership; earlier ones get a clone.
        let Some((last, rest)) = self.outputs.split_last() else {
            return Ok(());
        };
        for output in rest {
            if meta {
                output.send_metadata(ts.clone()).await?;
            } else {
                output.send_series(ts.clone()).await?;
            }
        }
        if meta {
            last.send_metadata(ts).await
        } else {
            last.send_series(ts).await
        }
    }
}
