// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Statistics taxonomy exposed through fire-and-forget callbacks.
//!
//! Nothing here registers metrics; the component owner decides how (and
//! whether) to export these. Callbacks must not block and have no error
//! return.

use std::sync::Arc;
use std::time::Duration;

/// Emitted once per serializer flush.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SerializerStats {
    pub series_stored: usize,
    pub metadata_stored: usize,
    pub errors: usize,
    pub newest_timestamp: i64,
}

/// Per-category send accounting. Categories are plain samples, native
/// histograms, and metadata.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CategoryStats {
    pub series_sent: usize,
    pub failed_samples: usize,
    pub retried_samples: usize,
    pub retried_samples_429: usize,
    pub retried_samples_5xx: usize,
    pub network_samples_failed: usize,
}

/// Emitted once per network send attempt.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NetworkStats {
    pub series: CategoryStats,
    pub histogram: CategoryStats,
    pub metadata: CategoryStats,
    pub send_duration: Duration,
    pub newest_timestamp: i64,
    pub series_bytes: usize,
    pub metadata_bytes: usize,
}

impl NetworkStats {
    pub fn total_sent(&self) -> usize {
        self.series.series_sent + self.histogram.series_sent + self.metadata.series_sent
    }

    pub fn total_failed(&self) -> usize {
        self.series.failed_samples + self.histogram.failed_samples + self.metadata.failed_samples
    }

    pub fn total_retried(&self) -> usize {
        self.series.retried_samples
            + self.histogram.retried_samples
            + self.metadata.retried_samples
    }

    pub fn total_429(&self) -> usize {
        self.series.retried_samples_429
            + self.histogram.retried_samples_429
            + self.metadata.retried_samples_429
    }

    pub fn total_5xx(&self) -> usize {
        self.series.retried_samples_5xx
            + self.histogram.retried_samples_5xx
            + self.metadata.retried_samples_5xx
    }
}

pub type SerializerStatsHook = Arc<dyn Fn(SerializerStats) + Send + Sync>;
pub type NetworkStatsHook = Arc<dyn Fn(NetworkStats) + Send + Sync>;

/// A hook that drops everything, for callers that do not care.
pub fn noop_serializer_stats() -> SerializerStatsHook {
    Arc::new(|_| {})
}

pub fn noop_network_stats() -> NetworkStatsHook {
    Arc::new(|_| {})
}
