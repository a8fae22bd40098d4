// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The on-disk staging queue: a crash-durable, strictly-ordered sequential
//! log with a single writer and a single reader per instance.
//!
//! Each stored record becomes one `<id>.committed` file where ids are
//! assigned from a strictly increasing counter recovered by scanning the
//! directory at construction. On startup every committed file is replayed
//! to the consumer, in id order, before any new store is serviced.
//!
//! Durability here means "survives a process restart before being read".
//! Files are written without an fsync, so a crash between the write call
//! and the data reaching disk can lose a record; that window is accepted
//! in exchange for never blocking the writer on the disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::StagingError;

const FILE_EXTENSION: &str = "committed";

// Enough in-flight stores to ride out a slow disk without stalling the
// serializer on every flush.
const STORE_INBOX_CAPACITY: usize = 64;

#[derive(Serialize, Deserialize)]
struct StagedRecord {
    meta: HashMap<String, String>,
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
}

struct StoreRequest {
    meta: HashMap<String, String>,
    data: Vec<u8>,
}

/// A reference to one staged file, handed to the consumer as soon as the
/// file is committed.
#[derive(Clone, Debug)]
pub struct DataHandle {
    pub name: String,
    path: PathBuf,
}

impl DataHandle {
    /// Reads and deserializes the staged record, deleting the file whether
    /// or not the read succeeds. The queue performs no retry: callers must
    /// copy out anything they need before dropping the result.
    pub async fn pop(self) -> Result<(HashMap<String, String>, Vec<u8>), StagingError> {
        let read = tokio::fs::read(&self.path).await;
        // Read-then-delete, unconditionally: a file that failed to decode
        // will never decode, and durability ends at first read.
        if let Err(err) = tokio::fs::remove_file(&self.path).await {
            debug!("unable to delete staged file {}: {err}", self.name);
        }
        let record: StagedRecord = rmp_serde::from_slice(&read?)?;
        Ok((record.meta, record.data))
    }
}

/// Write side of the staging queue.
#[derive(Clone)]
pub struct FileQueueHandle {
    tx: mpsc::Sender<StoreRequest>,
}

impl FileQueueHandle {
    /// Enqueues a record. Returns once the record is handed to the queue
    /// worker, not once it is on disk.
    pub async fn store(
        &self,
        meta: HashMap<String, String>,
        data: Vec<u8>,
    ) -> Result<(), StagingError> {
        self.tx
            .send(StoreRequest { meta, data })
            .await
            .map_err(|_| StagingError::Closed)
    }
}

/// Worker that owns the directory. Single-threaded: replay first, then a
/// loop over incoming stores.
pub struct FileQueue {
    directory: PathBuf,
    max_index: u64,
    replay: Vec<(u64, PathBuf)>,
    out: mpsc::Sender<DataHandle>,
    rx: mpsc::Receiver<StoreRequest>,
}

impl FileQueue {
    /// Scans `directory` for committed files, recovering the id counter and
    /// the replay list. Files that do not parse as `<number>.committed` are
    /// ignored.
    pub fn new(
        directory: impl Into<PathBuf>,
        out: mpsc::Sender<DataHandle>,
    ) -> Result<(FileQueue, FileQueueHandle), StagingError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;

        let mut replay = Vec::new();
        for entry in std::fs::read_dir(&directory)? {
            let path = entry?.path();
            if let Some(id) = committed_id(&path) {
                replay.push((id, path));
            }
        }
        replay.sort_by_key(|(id, _)| *id);
        let max_index = replay.last().map(|(id, _)| *id).unwrap_or(0);

        let (tx, rx) = mpsc::channel(STORE_INBOX_CAPACITY);
        Ok((
            FileQueue {
                directory,
                max_index,
                replay,
                out,
                rx,
            },
            FileQueueHandle { tx },
        ))
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        debug!("file queue started, dir {:?}", self.directory);

        // Drain the replay list before accepting new stores so restart
        // preserves id order.
        for (_, path) in std::mem::take(&mut self.replay) {
            let handle = handle_for(&path);
            tokio::select! {
                _ = shutdown.cancelled() => return,
                sent = self.out.send(handle) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                request = self.rx.recv() => {
                    let Some(request) = request else { break };
                    match self.persist(request).await {
                        Ok(handle) => {
                            if self.out.send(handle).await.is_err() {
                                break;
                            }
                        }
                        // A failed write drops the record; never block the
                        // writer over one bad file.
                        Err(err) => error!("unable to persist staged record: {err}"),
                    }
                }
            }
        }

        debug!("file queue stopped");
    }

    async fn persist(&mut self, request: StoreRequest) -> Result<DataHandle, StagingError> {
        self.max_index += 1;
        let path = self
            .directory
            .join(format!("{}.{FILE_EXTENSION}", self.max_index));
        let record = StagedRecord {
            meta: request.meta,
            data: request.data,
        };
        let buf = rmp_serde::to_vec(&record)?;
        tokio::fs::write(&path, buf).await?;
        Ok(handle_for(&path))
    }
}

fn handle_for(path: &Path) -> DataHandle {
    DataHandle {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path: path.to_path_buf(),
    }
}

fn committed_id(path: &Path) -> Option<u64> {
    if path.extension()? != FILE_EXTENSION {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn next_handle(rx: &mut mpsc::Receiver<DataHandle>) -> DataHandle {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for handle")
            .expect("queue closed")
    }

    fn start_queue(
        dir: &Path,
    ) -> (
        FileQueueHandle,
        mpsc::Receiver<DataHandle>,
        CancellationToken,
    ) {
        let (out_tx, out_rx) = mpsc::channel(8);
        let (queue, handle) = FileQueue::new(dir, out_tx).expect("queue create failed");
        let shutdown = CancellationToken::new();
        tokio::spawn(queue.run(shutdown.clone()));
        (handle, out_rx, shutdown)
    }

    #[tokio::test]
    async fn test_store_and_pop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (handle, mut rx, shutdown) = start_queue(dir.path());

        handle
            .store(HashMap::new(), b"test".to_vec())
            .await
            .expect("store failed");

        let (meta, data) = next_handle(&mut rx).await.pop().await.expect("pop failed");
        assert!(meta.is_empty());
        assert_eq!(data, b"test");

        // Nothing else should come through.
        let extra = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(extra.is_err());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_meta_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (handle, mut rx, shutdown) = start_queue(dir.path());

        handle
            .store(
                HashMap::from([("name".to_string(), "bob".to_string())]),
                b"test".to_vec(),
            )
            .await
            .expect("store failed");

        let (meta, data) = next_handle(&mut rx).await.pop().await.expect("pop failed");
        assert_eq!(meta.get("name").map(String::as_str), Some("bob"));
        assert_eq!(data, b"test");
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_corrupt_file_errors_then_continues() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (handle, mut rx, shutdown) = start_queue(dir.path());

        handle
            .store(HashMap::new(), b"first".to_vec())
            .await
            .expect("store failed");
        handle
            .store(HashMap::new(), b"second".to_vec())
            .await
            .expect("store failed");

        let first = next_handle(&mut rx).await;
        std::fs::write(dir.path().join("1.committed"), b"bad").expect("overwrite failed");
        assert!(first.pop().await.is_err());

        let (_, data) = next_handle(&mut rx).await.pop().await.expect("pop failed");
        assert_eq!(data, b"second");
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_deleted_file_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (handle, mut rx, shutdown) = start_queue(dir.path());

        handle
            .store(HashMap::new(), b"gone".to_vec())
            .await
            .expect("store failed");
        let h = next_handle(&mut rx).await;
        std::fs::remove_file(dir.path().join("1.committed")).expect("remove failed");
        assert!(h.pop().await.is_err());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_foreign_files_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("otherfile"), b"noise").expect("write failed");
        std::fs::write(dir.path().join("x.committed"), b"noise").expect("write failed");
        let (handle, mut rx, shutdown) = start_queue(dir.path());

        handle
            .store(HashMap::new(), b"first".to_vec())
            .await
            .expect("store failed");
        let (_, data) = next_handle(&mut rx).await.pop().await.expect("pop failed");
        assert_eq!(data, b"first");
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_restart_replays_in_order_before_new_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let (handle, mut rx, shutdown) = start_queue(dir.path());
            handle
                .store(HashMap::new(), b"first".to_vec())
                .await
                .expect("store failed");
            handle
                .store(HashMap::new(), b"second".to_vec())
                .await
                .expect("store failed");
            // Take the handles but never pop them, simulating a consumer
            // that died before reading.
            let _ = next_handle(&mut rx).await;
            let _ = next_handle(&mut rx).await;
            shutdown.cancel();
        }

        let (handle, mut rx, shutdown) = start_queue(dir.path());
        handle
            .store(HashMap::new(), b"third".to_vec())
            .await
            .expect("store failed");

        for want in [&b"first"[..], b"second", b"third"] {
            let (_, data) = next_handle(&mut rx).await.pop().await.expect("pop failed");
            assert_eq!(data, want);
        }
        shutdown.cancel();
    }
}
