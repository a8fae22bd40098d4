// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The top level component: wires a serializer, staging queue, endpoint
//! drain and network manager per configured endpoint, and owns their
//! lifecycles.
//!
//! Each endpoint stages under `<data-dir>/<endpoint-name>/wal`, so two
//! endpoints never contend on the same files and a config that removes one
//! endpoint leaves the others' staged data alone.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::appender::QueueAppender;
use crate::config::QueueConfig;
use crate::endpoint::{Endpoint, EndpointHandle};
use crate::error::{ConfigError, StagingError};
use crate::filequeue::FileQueue;
use crate::network::{NetworkHandle, NetworkManager};
use crate::serializer::{Serializer, SerializerHandle};
use crate::stats::{NetworkStatsHook, SerializerStatsHook};

// Handles staged while the drain catches up after a restart.
const ENDPOINT_INBOX_CAPACITY: usize = 64;

struct RunningEndpoint {
    name: String,
    serializer: SerializerHandle,
    network: NetworkHandle,
    endpoint: EndpointHandle,
    // Cancelled in pipeline order on teardown.
    intake: CancellationToken,
    drain: CancellationToken,
}

/// A running delivery pipeline for a set of remote-write endpoints.
pub struct Queue {
    data_dir: PathBuf,
    cfg: QueueConfig,
    serializer_stats: SerializerStatsHook,
    network_stats: NetworkStatsHook,
    endpoints: Vec<RunningEndpoint>,
}

impl Queue {
    /// Validates the config and spawns one pipeline per endpoint. Staged
    /// files from previous runs begin replaying immediately.
    pub fn new(
        data_dir: impl Into<PathBuf>,
        cfg: QueueConfig,
        serializer_stats: SerializerStatsHook,
        network_stats: NetworkStatsHook,
    ) -> Result<Queue, QueueError> {
        cfg.validate()?;
        let mut queue = Queue {
            data_dir: data_dir.into(),
            cfg: cfg.clone(),
            serializer_stats,
            network_stats,
            endpoints: Vec::new(),
        };
        for endpoint in &cfg.endpoints {
            let running = queue.start_endpoint(endpoint)?;
            queue.endpoints.push(running);
        }
        Ok(queue)
    }

    fn start_endpoint(
        &self,
        cfg: &crate::config::EndpointConfig,
    ) -> Result<RunningEndpoint, QueueError> {
        let intake = CancellationToken::new();
        let drain = CancellationToken::new();

        let (network, network_handle) =
            NetworkManager::new(cfg.clone(), self.network_stats.clone());
        tokio::spawn(network.run(drain.clone()));

        let (handles_tx, handles_rx) = tokio::sync::mpsc::channel(ENDPOINT_INBOX_CAPACITY);
        let wal_dir = self.data_dir.join(&cfg.name).join("wal");
        let (filequeue, filequeue_handle) = FileQueue::new(wal_dir, handles_tx)?;
        tokio::spawn(filequeue.run(intake.clone()));

        let (endpoint, endpoint_handle) = Endpoint::new(
            cfg.name.clone(),
            self.cfg.ttl,
            network_handle.clone(),
            handles_rx,
        );
        tokio::spawn(endpoint.run(drain.clone()));

        let (serializer, serializer_handle) = Serializer::new(
            self.cfg.persistence,
            filequeue_handle,
            self.serializer_stats.clone(),
        );
        tokio::spawn(serializer.run(intake.clone()));

        debug!("endpoint {} pipeline started", cfg.name);
        Ok(RunningEndpoint {
            name: cfg.name.clone(),
            serializer: serializer_handle,
            network: network_handle,
            endpoint: endpoint_handle,
            intake,
            drain,
        })
    }

    /// Creates an appender fanned out over every endpoint's serializer.
    pub fn appender(&self) -> QueueAppender {
        QueueAppender::new(
            self.cfg.ttl,
            self.endpoints.iter().map(|e| e.serializer.clone()).collect(),
        )
    }

    /// Applies a new configuration. Endpoints whose name survives are
    /// retuned in place through their config channels; added or removed
    /// endpoints are started or torn down. A removed endpoint keeps its
    /// staged files on disk for a future config that brings it back.
    pub async fn update_config(&mut self, cfg: QueueConfig) -> Result<(), QueueError> {
        cfg.validate()?;
        debug!("queue configuration updating");

        self.endpoints.retain(|running| {
            let keep = cfg.endpoints.iter().any(|e| e.name == running.name);
            if !keep {
                debug!("endpoint {} removed, stopping pipeline", running.name);
                running.intake.cancel();
                running.drain.cancel();
            }
            keep
        });

        self.cfg = cfg.clone();
        for endpoint in &cfg.endpoints {
            match self.endpoints.iter().find(|e| e.name == endpoint.name) {
                Some(running) => {
                    let _ = running.serializer.update_config(cfg.persistence).await;
                    let _ = running.network.update_config(endpoint.clone()).await;
                    running.endpoint.update_ttl(cfg.ttl).await;
                }
                None => {
                    let running = self.start_endpoint(endpoint)?;
                    self.endpoints.push(running);
                }
            }
        }
        Ok(())
    }

    /// Stops every pipeline. Intake stops first so in-progress batches are
    /// not produced into a dead drain; anything already staged stays on
    /// disk for the next run.
    pub fn shutdown(&mut self) {
        for running in self.endpoints.drain(..) {
            running.intake.cancel();
            running.drain.cancel();
        }
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Failures starting or reconfiguring the queue component.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Staging(#[from] StagingError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EndpointConfig, PersistenceConfig};
    use crate::series::Label;
    use crate::stats::{noop_network_stats, noop_serializer_stats};
    use std::time::Duration;

    fn config(url: &str) -> QueueConfig {
        QueueConfig {
            ttl: Duration::from_secs(3600),
            persistence: PersistenceConfig {
                max_signals_to_batch: 1,
                batch_interval: Duration::from_secs(3600),
            },
            endpoints: vec![EndpointConfig {
                name: "primary".to_string(),
                url: url.to_string(),
                ..Default::default()
            }],
        }
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = config("http://localhost:9090/api/v1/write");
        cfg.endpoints[0].queue_count = 0;
        let result = Queue::new(
            dir.path(),
            cfg,
            noop_serializer_stats(),
            noop_network_stats(),
        );
        assert!(matches!(result, Err(QueueError::Config(_))));
    }

    #[tokio::test]
    async fn test_appender_writes_stage_to_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = Queue::new(
            dir.path(),
            config("http://localhost:1/api/v1/write"),
            noop_serializer_stats(),
            noop_network_stats(),
        )
        .expect("queue failed");

        let appender = queue.appender();
        appender
            .append(
                vec![Label::new("__name__", "up")],
                crate::endpoint::millis_now(),
                1.0,
            )
            .await
            .expect("append failed");

        // The wal directory appears as soon as the endpoint pipeline starts.
        let wal = dir.path().join("primary").join("wal");
        tokio::time::timeout(Duration::from_secs(5), async {
            while !wal.exists() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("wal directory never created");
    }

    #[tokio::test]
    async fn test_update_config_adds_and_removes_endpoints() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut queue = Queue::new(
            dir.path(),
            config("http://localhost:1/api/v1/write"),
            noop_serializer_stats(),
            noop_network_stats(),
        )
        .expect("queue failed");
        assert_eq!(queue.endpoints.len(), 1);

        let mut cfg = config("http://localhost:1/api/v1/write");
        cfg.endpoints.push(EndpointConfig {
            name: "secondary".to_string(),
            url: "http://localhost:2/api/v1/write".to_string(),
            ..Default::default()
        });
        queue.update_config(cfg).await.expect("update failed");
        assert_eq!(queue.endpoints.len(), 2);

        let mut cfg = config("http://localhost:1/api/v1/write");
        cfg.endpoints[0].name = "secondary".to_string();
        queue.update_config(cfg).await.expect("update failed");
        assert_eq!(queue.endpoints.len(), 1);
        assert_eq!(queue.endpoints[0].name, "secondary");
    }
}
