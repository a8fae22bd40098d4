// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration surface for the queue component and its endpoints.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_USER_AGENT: &str = concat!("remote-write-queue/", env!("CARGO_PKG_VERSION"));

/// Top level configuration for one queue component.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// How old a data point may be before it is dropped rather than
    /// delivered. Checked at the appender and again at the endpoint, since
    /// dwell time in the staging queue counts against it.
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    pub persistence: PersistenceConfig,
    pub endpoints: Vec<EndpointConfig>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            ttl: Duration::from_secs(2 * 60 * 60),
            persistence: PersistenceConfig::default(),
            endpoints: Vec::new(),
        }
    }
}

/// Settings for the serializer-to-disk stage.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// The batch size to persist to the file queue.
    pub max_signals_to_batch: usize,
    /// How often to flush to the file queue if the batch size isn't met.
    #[serde(with = "duration_secs")]
    pub batch_interval: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            max_signals_to_batch: 10_000,
            batch_interval: Duration::from_secs(5),
        }
    }
}

/// One configured remote-write target.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    pub basic_auth: Option<BasicAuth>,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// How long to wait between retries when the server does not say.
    #[serde(with = "duration_secs")]
    pub retry_backoff: Duration,
    /// Maximum number of retries; 0 retries forever.
    pub max_retry_attempts: u32,
    /// How many series to write at a time.
    pub batch_count: usize,
    /// How long to wait before sending regardless of batch count.
    #[serde(with = "duration_secs")]
    pub flush_interval: Duration,
    /// How many concurrent sending shards to run.
    pub queue_count: u32,
    pub external_labels: HashMap<String, String>,
    pub user_agent: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            name: String::new(),
            url: String::new(),
            basic_auth: None,
            timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(1),
            max_retry_attempts: 0,
            batch_count: 1_000,
            flush_interval: Duration::from_secs(1),
            queue_count: 4,
            external_labels: HashMap::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for endpoint in &self.endpoints {
            endpoint.validate()?;
        }
        Ok(())
    }
}

impl EndpointConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.url.is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        if self.batch_count == 0 {
            return Err(ConfigError::ZeroBatchCount);
        }
        if self.flush_interval < Duration::from_secs(1) {
            return Err(ConfigError::FlushIntervalTooSmall);
        }
        if self.queue_count == 0 {
            return Err(ConfigError::ZeroQueueCount);
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_endpoint() -> EndpointConfig {
        EndpointConfig {
            name: "primary".to_string(),
            url: "http://localhost:9090/api/v1/write".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = QueueConfig::default();
        assert_eq!(cfg.ttl, Duration::from_secs(7200));
        assert_eq!(cfg.persistence.max_signals_to_batch, 10_000);
        assert_eq!(cfg.persistence.batch_interval, Duration::from_secs(5));

        let ep = EndpointConfig::default();
        assert_eq!(ep.timeout, Duration::from_secs(30));
        assert_eq!(ep.retry_backoff, Duration::from_secs(1));
        assert_eq!(ep.max_retry_attempts, 0);
        assert_eq!(ep.batch_count, 1_000);
        assert_eq!(ep.flush_interval, Duration::from_secs(1));
        assert_eq!(ep.queue_count, 4);
    }

    #[test]
    fn test_validation_rejects_bad_settings() {
        let mut cfg = QueueConfig::default();
        cfg.endpoints.push(valid_endpoint());
        assert!(cfg.validate().is_ok());

        cfg.endpoints[0].batch_count = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroBatchCount));

        cfg.endpoints[0] = valid_endpoint();
        cfg.endpoints[0].flush_interval = Duration::from_millis(500);
        assert_eq!(cfg.validate(), Err(ConfigError::FlushIntervalTooSmall));

        cfg.endpoints[0] = valid_endpoint();
        cfg.endpoints[0].queue_count = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroQueueCount));

        cfg.endpoints[0] = valid_endpoint();
        cfg.endpoints[0].url = String::new();
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyUrl));
    }
}
