// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batches producer writes into one compact encoded blob before they hit
//! the staging queue, amortizing per-flush overhead.
//!
//! The worker is single threaded. Each iteration checks the config inbox
//! without blocking first (so a flood of series can never starve a
//! reconfiguration), then waits on the series/metadata inboxes and a
//! 1-second flush tick.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::PersistenceConfig;
use crate::error::PipelineClosed;
use crate::filequeue::FileQueueHandle;
use crate::serialization::{file_header, SeriesGroup};
use crate::series::{put_series_into_pool, TimeSeriesBinary};
use crate::stats::{SerializerStats, SerializerStatsHook};

// Sized so short bursts from the appender do not block while a flush is
// writing to disk.
const INBOX_CAPACITY: usize = 64;

const FLUSH_TICK: Duration = Duration::from_secs(1);

/// Producer-facing handle to a running [`Serializer`].
#[derive(Clone)]
pub struct SerializerHandle {
    tx: mpsc::Sender<TimeSeriesBinary>,
    meta_tx: mpsc::Sender<TimeSeriesBinary>,
    cfg_tx: mpsc::Sender<PersistenceConfig>,
}

impl SerializerHandle {
    /// Blocks while the serializer inbox is full; this is how backpressure
    /// from a slow disk reaches the appender.
    pub async fn send_series(&self, ts: TimeSeriesBinary) -> Result<(), PipelineClosed> {
        self.tx.send(ts).await.map_err(|_| PipelineClosed)
    }

    pub async fn send_metadata(&self, ts: TimeSeriesBinary) -> Result<(), PipelineClosed> {
        self.meta_tx.send(ts).await.map_err(|_| PipelineClosed)
    }

    pub async fn update_config(&self, cfg: PersistenceConfig) -> Result<(), PipelineClosed> {
        self.cfg_tx.send(cfg).await.map_err(|_| PipelineClosed)
    }
}

pub struct Serializer {
    max_signals_to_batch: usize,
    batch_interval: Duration,
    queue: FileQueueHandle,
    series: Vec<TimeSeriesBinary>,
    meta: Vec<TimeSeriesBinary>,
    last_flush: Instant,
    stats: SerializerStatsHook,
    rx: mpsc::Receiver<TimeSeriesBinary>,
    meta_rx: mpsc::Receiver<TimeSeriesBinary>,
    cfg_rx: mpsc::Receiver<PersistenceConfig>,
}

impl Serializer {
    pub fn new(
        cfg: PersistenceConfig,
        queue: FileQueueHandle,
        stats: SerializerStatsHook,
    ) -> (Serializer, SerializerHandle) {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let (meta_tx, meta_rx) = mpsc::channel(INBOX_CAPACITY);
        let (cfg_tx, cfg_rx) = mpsc::channel(1);
        (
            Serializer {
                max_signals_to_batch: cfg.max_signals_to_batch,
                batch_interval: cfg.batch_interval,
                queue,
                series: Vec::new(),
                meta: Vec::new(),
                last_flush: Instant::now(),
                stats,
                rx,
                meta_rx,
                cfg_rx,
            },
            SerializerHandle {
                tx,
                meta_tx,
                cfg_tx,
            },
        )
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        debug!("serializer started");
        let mut tick = tokio::time::interval(FLUSH_TICK);
        loop {
            // Config has priority; pulling it off a channel here keeps the
            // settings single-owner with no mutex.
            if let Ok(cfg) = self.cfg_rx.try_recv() {
                self.max_signals_to_batch = cfg.max_signals_to_batch;
                self.batch_interval = cfg.batch_interval;
                continue;
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                item = self.rx.recv() => {
                    let Some(item) = item else { break };
                    self.series.push(item);
                    if self.series.len() + self.meta.len() >= self.max_signals_to_batch {
                        self.flush().await;
                    }
                }
                item = self.meta_rx.recv() => {
                    let Some(item) = item else { break };
                    self.meta.push(item);
                    if self.series.len() + self.meta.len() >= self.max_signals_to_batch {
                        self.flush().await;
                    }
                }
                _ = tick.tick() => {
                    if self.last_flush.elapsed() > self.batch_interval {
                        self.flush().await;
                    }
                }
            }
        }
        debug!("serializer stopped");
    }

    /// Encodes the accumulated batch and hands it to the staging queue.
    /// Always returns the series to the pool and resets the accumulation
    /// buffers (capacity retained) whether or not the store succeeded.
    async fn flush(&mut self) {
        self.last_flush = Instant::now();
        if self.series.is_empty() && self.meta.is_empty() {
            return;
        }

        let mut group = SeriesGroup {
            strings: Vec::new(),
            series: std::mem::take(&mut self.series),
            metadata: std::mem::take(&mut self.meta),
        };
        let mut mapping = HashMap::new();
        for ts in group.series.iter_mut().chain(group.metadata.iter_mut()) {
            ts.fill_label_mapping(&mut mapping);
        }
        group.set_strings(mapping);

        let result = self.store(&group).await;
        if let Err(ref err) = result {
            error!("unable to store batch: {err}");
        }
        self.report(&group, result.is_err());

        // Return everything to the pool but keep the accumulation buffers'
        // capacity for the next batch.
        self.series = group.series;
        self.meta = group.metadata;
        for ts in self.series.drain(..).chain(self.meta.drain(..)) {
            put_series_into_pool(ts);
        }
    }

    async fn store(
        &self,
        group: &SeriesGroup,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let encoded = group.encode()?;
        let compressed = snap::raw::Encoder::new().compress_vec(&encoded)?;
        self.queue.store(file_header(group), compressed).await?;
        Ok(())
    }

    fn report(&self, group: &SeriesGroup, errored: bool) {
        let newest_timestamp = group
            .series
            .iter()
            .map(|ts| ts.timestamp)
            .max()
            .unwrap_or(0);
        (self.stats)(SerializerStats {
            series_stored: group.series.len(),
            metadata_stored: group.metadata.len(),
            errors: usize::from(errored),
            newest_timestamp,
        });
    }
}
