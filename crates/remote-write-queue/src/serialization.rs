// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batch envelope codec: msgpack with a per-batch deduplicated string table.
//!
//! On the wire each series stores its labels as two parallel index arrays
//! into [`SeriesGroup::strings`]; a label name or value repeated across
//! thousands of series costs its bytes once.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::series::{Label, TimeSeriesBinary};

/// Version tag written into every staged file header.
/// product.signal_type.schema.version
pub const FORMAT_VERSION: &str = "metrics.queue.v1";
pub const COMPRESSION_SNAPPY: &str = "snappy";

pub const HEADER_VERSION: &str = "version";
pub const HEADER_COMPRESSION: &str = "compression";
pub const HEADER_SERIES_COUNT: &str = "series_count";
pub const HEADER_META_COUNT: &str = "meta_count";
pub const HEADER_STRINGS_COUNT: &str = "strings_count";

/// A batch of series and metadata sharing one string table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesGroup {
    pub strings: Vec<String>,
    pub series: Vec<TimeSeriesBinary>,
    pub metadata: Vec<TimeSeriesBinary>,
}

impl SeriesGroup {
    /// Flattens the string→index map built by
    /// [`TimeSeriesBinary::fill_label_mapping`] into the positional table.
    pub fn set_strings(&mut self, mapping: HashMap<String, u32>) {
        let mut strings = vec![String::new(); mapping.len()];
        for (value, index) in mapping {
            strings[index as usize] = value;
        }
        self.strings = strings;
    }

    pub fn encode(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Decodes a staged payload and rebuilds every series' label set from
    /// the string table. The index arrays are cleared afterwards; they are
    /// not needed past this point. Any index outside the table is a decode
    /// error for the whole batch.
    pub fn decode(buf: &[u8]) -> Result<SeriesGroup, DecodeError> {
        let mut group: SeriesGroup = rmp_serde::from_slice(buf)?;
        for ts in group.series.iter_mut().chain(group.metadata.iter_mut()) {
            rebuild_labels(ts, &group.strings)?;
        }
        group.strings.clear();
        Ok(group)
    }
}

fn rebuild_labels(ts: &mut TimeSeriesBinary, strings: &[String]) -> Result<(), DecodeError> {
    ts.labels.clear();
    ts.labels.reserve(ts.label_names.len());
    for (&name_idx, &value_idx) in ts.label_names.iter().zip(ts.label_values.iter()) {
        let name = lookup(strings, name_idx)?;
        let value = lookup(strings, value_idx)?;
        ts.labels.push(Label::new(name, value));
    }
    ts.label_names.clear();
    ts.label_values.clear();
    Ok(())
}

fn lookup(strings: &[String], index: u32) -> Result<&str, DecodeError> {
    strings
        .get(index as usize)
        .map(String::as_str)
        .ok_or(DecodeError::StringIndexOutOfBounds {
            index,
            len: strings.len(),
        })
}

/// The header stored alongside each staged file. The version and
/// compression tags gate decoding; the counts are cross-checked against
/// the decoded batch.
pub fn file_header(group: &SeriesGroup) -> HashMap<String, String> {
    HashMap::from([
        (HEADER_VERSION.to_string(), FORMAT_VERSION.to_string()),
        (
            HEADER_COMPRESSION.to_string(),
            COMPRESSION_SNAPPY.to_string(),
        ),
        (
            HEADER_SERIES_COUNT.to_string(),
            group.series.len().to_string(),
        ),
        (
            HEADER_META_COUNT.to_string(),
            group.metadata.len().to_string(),
        ),
        (
            HEADER_STRINGS_COUNT.to_string(),
            group.strings.len().to_string(),
        ),
    ])
}
