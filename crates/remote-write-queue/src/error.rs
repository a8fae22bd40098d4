// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Rejected at configuration-validation time; never reaches a running
/// pipeline.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("batch_count must be greater than 0")]
    ZeroBatchCount,
    #[error("flush_interval must be greater or equal to 1s, the internal timers resolution is 1s")]
    FlushIntervalTooSmall,
    #[error("queue_count must be greater than 0")]
    ZeroQueueCount,
    #[error("endpoint url must not be empty")]
    EmptyUrl,
    #[error("endpoint name must not be empty")]
    EmptyName,
}

/// Staging-queue failures. Write-side errors are logged and the record
/// dropped; read-side errors surface through [`crate::filequeue::DataHandle::pop`].
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("file io: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding staged record: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("decoding staged record: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("staging queue is shut down")]
    Closed,
}

/// Failure to decode a staged payload back into series.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("msgpack: {0}")]
    Msgpack(#[from] rmp_serde::decode::Error),
    #[error("label index {index} out of bounds for string table of {len}")]
    StringIndexOutOfBounds { index: u32, len: usize },
}

/// A send into a component whose worker has already stopped.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("pipeline is shut down")]
pub struct PipelineClosed;
