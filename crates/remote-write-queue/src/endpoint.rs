// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Drains the staging queue into the network layer for one endpoint.
//!
//! Each staged file is popped, version-checked, decompressed, decoded and
//! its series handed to the network manager one at a time. Series whose
//! sample is older than the TTL by the time they come off disk are dropped
//! here; time spent staged counts against freshness.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use std::collections::HashMap;

use crate::filequeue::DataHandle;
use crate::network::NetworkHandle;
use crate::serialization::{
    SeriesGroup, FORMAT_VERSION, HEADER_META_COUNT, HEADER_SERIES_COUNT, HEADER_VERSION,
};
use crate::series::put_series_into_pool;

pub struct Endpoint {
    name: String,
    ttl: Duration,
    network: NetworkHandle,
    rx: mpsc::Receiver<DataHandle>,
    ttl_rx: mpsc::Receiver<Duration>,
}

/// Handle used by the component owner to retune the endpoint's TTL on a
/// config change without restarting the drain.
#[derive(Clone)]
pub struct EndpointHandle {
    ttl_tx: mpsc::Sender<Duration>,
}

impl EndpointHandle {
    pub async fn update_ttl(&self, ttl: Duration) {
        let _ = self.ttl_tx.send(ttl).await;
    }
}

impl Endpoint {
    pub fn new(
        name: impl Into<String>,
        ttl: Duration,
        network: NetworkHandle,
        rx: mpsc::Receiver<DataHandle>,
    ) -> (Endpoint, EndpointHandle) {
        let (ttl_tx, ttl_rx) = mpsc::channel(1);
        (
            Endpoint {
                name: name.into(),
                ttl,
                network,
                rx,
                ttl_rx,
            },
            EndpointHandle { ttl_tx },
        )
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        debug!("endpoint {} started", self.name);
        loop {
            if let Ok(ttl) = self.ttl_rx.try_recv() {
                self.ttl = ttl;
                continue;
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                handle = self.rx.recv() => {
                    let Some(handle) = handle else { break };
                    let name = handle.name.clone();
                    match self.deserialize_and_send(handle).await {
                        // Closed network means we are shutting down.
                        Ok(false) => break,
                        Ok(true) => {}
                        Err(err) => error!("unable to process staged file {name}: {err}"),
                    }
                }
            }
        }
        debug!("endpoint {} stopped", self.name);
    }

    /// Returns Ok(false) once the network side has gone away.
    async fn deserialize_and_send(
        &mut self,
        handle: DataHandle,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        let (meta, data) = handle.pop().await?;
        match meta.get(HEADER_VERSION).map(String::as_str) {
            Some(FORMAT_VERSION) => {}
            // A future (or foreign) format; skip the file rather than feed
            // the decoder garbage.
            other => {
                error!(
                    "unknown staged file version {:?}, wanted {FORMAT_VERSION}",
                    other
                );
                return Ok(true);
            }
        }
        let decompressed = snap::raw::Decoder::new().decompress_vec(&data)?;
        let group = SeriesGroup::decode(&decompressed)?;
        check_count(&meta, HEADER_SERIES_COUNT, group.series.len());
        check_count(&meta, HEADER_META_COUNT, group.metadata.len());

        let cutoff = millis_now().saturating_sub(self.ttl.as_millis() as i64);
        for ts in group.series {
            // Old data is not worth sending; remote-write receivers reject
            // or mis-order it anyway.
            if ts.timestamp != 0 && ts.timestamp < cutoff {
                put_series_into_pool(ts);
                continue;
            }
            if self.network.send_series(ts).await.is_err() {
                return Ok(false);
            }
        }
        for ts in group.metadata {
            if self.network.send_metadata(ts).await.is_err() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Cross-checks a header count against what actually decoded. A mismatch
/// is logged but not fatal; the decoded data is what gets delivered.
fn check_count(meta: &HashMap<String, String>, key: &str, decoded: usize) {
    let Some(header) = meta.get(key).and_then(|v| v.parse::<usize>().ok()) else {
        return;
    };
    if header != decoded {
        warn!("staged file header {key} says {header}, decoded {decoded}");
    }
}

pub(crate) fn millis_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as i64
}
