// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sharded network sender for one endpoint.
//!
//! The manager owns a set of [`WriteLoop`] shards plus one dedicated
//! metadata loop, and routes each series to `hash % queue_count`. That
//! keeps any given series on a single connection so samples stay in order
//! per series. The manager inbox has capacity 1: if every shard is busy
//! the whole pipeline upstream of it blocks, which is the backpressure
//! story end to end.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::EndpointConfig;
use crate::error::PipelineClosed;
use crate::series::TimeSeriesBinary;
use crate::stats::NetworkStatsHook;
use crate::write_loop::WriteLoop;

/// Producer-facing handle to a running [`NetworkManager`].
#[derive(Clone)]
pub struct NetworkHandle {
    tx: mpsc::Sender<TimeSeriesBinary>,
    meta_tx: mpsc::Sender<TimeSeriesBinary>,
    cfg_tx: mpsc::Sender<EndpointConfig>,
}

impl NetworkHandle {
    /// Blocks while all sending shards are saturated.
    pub async fn send_series(&self, ts: TimeSeriesBinary) -> Result<(), PipelineClosed> {
        self.tx.send(ts).await.map_err(|_| PipelineClosed)
    }

    pub async fn send_metadata(&self, ts: TimeSeriesBinary) -> Result<(), PipelineClosed> {
        self.meta_tx.send(ts).await.map_err(|_| PipelineClosed)
    }

    pub async fn update_config(&self, cfg: EndpointConfig) -> Result<(), PipelineClosed> {
        self.cfg_tx.send(cfg).await.map_err(|_| PipelineClosed)
    }
}

pub struct NetworkManager {
    cfg: EndpointConfig,
    stats: NetworkStatsHook,
    shards: Vec<mpsc::Sender<TimeSeriesBinary>>,
    meta_shard: mpsc::Sender<TimeSeriesBinary>,
    loops: CancellationToken,
    rx: mpsc::Receiver<TimeSeriesBinary>,
    meta_rx: mpsc::Receiver<TimeSeriesBinary>,
    cfg_rx: mpsc::Receiver<EndpointConfig>,
}

impl NetworkManager {
    pub fn new(cfg: EndpointConfig, stats: NetworkStatsHook) -> (NetworkManager, NetworkHandle) {
        // Capacity 1 on purpose: the manager only pulls an item when a
        // shard can take it, so a full pipe stalls the producer.
        let (tx, rx) = mpsc::channel(1);
        let (meta_tx, meta_rx) = mpsc::channel(1);
        let (cfg_tx, cfg_rx) = mpsc::channel(1);

        let loops = CancellationToken::new();
        let (shards, meta_shard) = spawn_loops(&cfg, &stats, &loops);
        (
            NetworkManager {
                cfg,
                stats,
                shards,
                meta_shard,
                loops,
                rx,
                meta_rx,
                cfg_rx,
            },
            NetworkHandle {
                tx,
                meta_tx,
                cfg_tx,
            },
        )
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        debug!("network manager started, shards {}", self.cfg.queue_count);
        loop {
            // A pending config beats everything else in the inboxes.
            if let Ok(cfg) = self.cfg_rx.try_recv() {
                self.apply_config(cfg);
                continue;
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                cfg = self.cfg_rx.recv() => {
                    let Some(cfg) = cfg else { break };
                    self.apply_config(cfg);
                }
                item = self.rx.recv() => {
                    let Some(item) = item else { break };
                    let shard = (item.hash % self.shards.len() as u64) as usize;
                    if self.shards[shard].send(item).await.is_err() {
                        break;
                    }
                }
                item = self.meta_rx.recv() => {
                    let Some(item) = item else { break };
                    if self.meta_shard.send(item).await.is_err() {
                        break;
                    }
                }
            }
        }
        self.loops.cancel();
        debug!("network manager stopped");
    }

    /// Tears down the current loops and starts fresh ones under the new
    /// settings. Series buffered inside the old loops are dropped; the
    /// trade is accepted to keep the loops themselves config-free.
    fn apply_config(&mut self, cfg: EndpointConfig) {
        debug!("network configuration updating");
        self.loops.cancel();
        self.cfg = cfg;
        self.loops = CancellationToken::new();
        let (shards, meta_shard) = spawn_loops(&self.cfg, &self.stats, &self.loops);
        self.shards = shards;
        self.meta_shard = meta_shard;
    }
}

fn spawn_loops(
    cfg: &EndpointConfig,
    stats: &NetworkStatsHook,
    loops: &CancellationToken,
) -> (
    Vec<mpsc::Sender<TimeSeriesBinary>>,
    mpsc::Sender<TimeSeriesBinary>,
) {
    // Room for two full batches so a loop can accumulate the next batch
    // while the previous one is on the wire.
    let capacity = 2 * cfg.batch_count;
    let mut shards = Vec::with_capacity(cfg.queue_count as usize);
    for _ in 0..cfg.queue_count {
        let (tx, rx) = mpsc::channel(capacity);
        let wl = WriteLoop::new(cfg.clone(), false, stats.clone(), rx);
        tokio::spawn(wl.run(loops.clone()));
        shards.push(tx);
    }
    let (meta_tx, meta_rx) = mpsc::channel(capacity);
    let wl = WriteLoop::new(cfg.clone(), true, stats.clone(), meta_rx);
    tokio::spawn(wl.run(loops.clone()));
    (shards, meta_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::noop_network_stats;
    use std::time::Duration;

    fn config() -> EndpointConfig {
        EndpointConfig {
            name: "test".to_string(),
            url: "http://localhost:1/api/v1/write".to_string(),
            queue_count: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_blocks_when_pipe_is_full() {
        // The manager is constructed but its run loop never started, so the
        // capacity-1 inbox is the entire pipe: one item fits, the next send
        // must stay pending rather than complete or drop.
        let (manager, handle) = NetworkManager::new(config(), noop_network_stats());
        handle
            .send_series(TimeSeriesBinary::default())
            .await
            .expect("first send should fill the pipe");

        let second = tokio::time::timeout(
            Duration::from_millis(500),
            handle.send_series(TimeSeriesBinary::default()),
        )
        .await;
        assert!(second.is_err(), "send into a full pipe must block");

        // Once the worker is gone the pending send resolves to an error
        // instead of hanging forever.
        drop(manager);
        assert!(handle.send_series(TimeSeriesBinary::default()).await.is_err());
    }
}
