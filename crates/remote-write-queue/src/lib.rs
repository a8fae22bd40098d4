// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A durable, backpressured delivery pipeline for Prometheus remote-write.
//!
//! Samples enter through a [`QueueAppender`], are batched and interned by a
//! [`serializer::Serializer`], staged on disk by a [`filequeue::FileQueue`],
//! and drained by an [`endpoint::Endpoint`] into a sharded
//! [`network::NetworkManager`] that delivers them over HTTP with retries.
//! The [`Queue`] component owns the whole assembly.
//!
//! The staging queue gives two properties an in-memory pipeline cannot:
//! samples survive a process restart, and a slow or down remote fills the
//! disk rather than the heap. Backpressure is end to end; when every
//! sending shard is busy and the staging queue's consumer stalls, appends
//! block.

pub mod appender;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod filequeue;
pub mod network;
pub mod prompb;
pub mod queue;
pub mod serialization;
pub mod serializer;
pub mod series;
pub mod stats;

mod write_loop;

pub use appender::QueueAppender;
pub use config::{BasicAuth, EndpointConfig, PersistenceConfig, QueueConfig};
pub use queue::{Queue, QueueError};
pub use series::{Exemplar, FloatHistogram, Histogram, Label, Metadata, TimeSeriesBinary};
pub use stats::{NetworkStats, SerializerStats};
