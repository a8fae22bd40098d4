// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One sending shard: accumulates series, marshals them to the remote-write
//! protocol, and POSTs with retry/backoff.
//!
//! A loop's configuration cannot be updated; it is easier to recreate the
//! loop, which does mean any signals buffered in it are lost on a config
//! change. Signals are also abandoned (not flushed) on shutdown.

use std::time::{Duration, Instant, SystemTime};

use prost::Message;
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::EndpointConfig;
use crate::prompb;
use crate::series::{put_series_slice_into_pool, TimeSeriesBinary};
use crate::stats::{CategoryStats, NetworkStats, NetworkStatsHook};

const FLUSH_TICK: Duration = Duration::from_secs(1);

// Used when the server sends a Retry-After we cannot parse.
const FALLBACK_RETRY_AFTER: Duration = Duration::from_secs(5);

pub(crate) struct WriteLoop {
    is_meta: bool,
    cfg: EndpointConfig,
    client: reqwest::Client,
    series: Vec<TimeSeriesBinary>,
    last_send: Instant,
    send_buffer: Vec<u8>,
    stats: NetworkStatsHook,
    rx: mpsc::Receiver<TimeSeriesBinary>,
}

struct SendResult {
    err: Option<String>,
    successful: bool,
    recoverable: bool,
    network_error: bool,
    status_code: Option<StatusCode>,
    retry_after: Duration,
}

impl WriteLoop {
    pub(crate) fn new(
        cfg: EndpointConfig,
        is_meta: bool,
        stats: NetworkStatsHook,
        rx: mpsc::Receiver<TimeSeriesBinary>,
    ) -> WriteLoop {
        WriteLoop {
            is_meta,
            client: reqwest::Client::new(),
            series: Vec::with_capacity(cfg.batch_count),
            last_send: Instant::now(),
            send_buffer: Vec::new(),
            stats,
            rx,
            cfg,
        }
    }

    pub(crate) async fn run(mut self, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(FLUSH_TICK);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                item = self.rx.recv() => {
                    let Some(item) = item else { break };
                    self.series.push(item);
                    if self.series.len() >= self.cfg.batch_count {
                        self.try_send(&shutdown).await;
                    }
                }
                _ = tick.tick() => {
                    if !self.series.is_empty() && self.last_send.elapsed() > self.cfg.flush_interval {
                        self.try_send(&shutdown).await;
                    }
                }
            }
        }
    }

    /// Sends the accumulated batch, retrying recoverable failures until the
    /// attempt limit (0 = unlimited) is hit or shutdown begins.
    async fn try_send(&mut self, shutdown: &CancellationToken) {
        let mut attempts: u32 = 0;
        loop {
            let start = Instant::now();
            let result = self.send(attempts).await;
            self.record_attempt(&result, start.elapsed());

            if let Some(err) = &result.err {
                error!("error sending telemetry: {err}");
            }
            if result.successful || !result.recoverable {
                self.sending_cleanup();
                return;
            }
            attempts += 1;
            if self.cfg.max_retry_attempts > 0 && attempts > self.cfg.max_retry_attempts {
                debug!("max retry attempts reached, attempts {attempts}");
                self.sending_cleanup();
                return;
            }
            // Short circuit if we are stopping rather than sleep out the
            // backoff.
            if shutdown.is_cancelled() {
                return;
            }
            tokio::time::sleep(result.retry_after).await;
        }
    }

    fn sending_cleanup(&mut self) {
        put_series_slice_into_pool(self.series.drain(..));
        self.send_buffer.clear();
        self.last_send = Instant::now();
    }

    async fn send(&mut self, retry_count: u32) -> SendResult {
        // Retries reuse the marshaled buffer so the same bytes go back out.
        if self.send_buffer.is_empty() {
            let request = if self.is_meta {
                prompb::to_metadata_request(&self.series)
            } else {
                prompb::to_write_request(&self.series, &self.cfg.external_labels)
            };
            let data = request.encode_to_vec();
            match snap::raw::Encoder::new().compress_vec(&data) {
                Ok(compressed) => self.send_buffer = compressed,
                Err(err) => {
                    return SendResult {
                        err: Some(format!("unable to compress payload: {err}")),
                        successful: false,
                        recoverable: false,
                        network_error: false,
                        status_code: None,
                        retry_after: self.cfg.retry_backoff,
                    }
                }
            }
        }

        let mut request = self
            .client
            .post(&self.cfg.url)
            .header("Content-Encoding", "snappy")
            .header("Content-Type", "application/x-protobuf")
            .header("User-Agent", &self.cfg.user_agent)
            .header("X-Prometheus-Remote-Write-Version", "0.1.0")
            .timeout(self.cfg.timeout)
            .body(self.send_buffer.clone());
        if let Some(auth) = &self.cfg.basic_auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }
        if retry_count > 0 {
            request = request.header("Retry-Attempt", retry_count.to_string());
        }

        let response = match request.send().await {
            Ok(response) => response,
            // Network level errors (connect failure, timeout) are
            // recoverable.
            Err(err) => {
                return SendResult {
                    err: Some(err.to_string()),
                    successful: false,
                    recoverable: true,
                    network_error: true,
                    status_code: None,
                    retry_after: self.cfg.retry_backoff,
                }
            }
        };

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after_duration(
                self.cfg.retry_backoff,
                response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok()),
            );
            return SendResult {
                err: Some(format!("server responded with status code {status}")),
                successful: false,
                recoverable: true,
                network_error: false,
                status_code: Some(status),
                retry_after,
            };
        }
        if !status.is_success() {
            let line = response
                .text()
                .await
                .unwrap_or_default()
                .lines()
                .next()
                .unwrap_or_default()
                .chars()
                .take(1_000)
                .collect::<String>();
            return SendResult {
                err: Some(format!("server returned HTTP status {status}: {line}")),
                successful: false,
                recoverable: false,
                network_error: false,
                status_code: Some(status),
                retry_after: self.cfg.retry_backoff,
            };
        }

        SendResult {
            err: None,
            successful: true,
            recoverable: false,
            network_error: false,
            status_code: Some(status),
            retry_after: self.cfg.retry_backoff,
        }
    }

    /// Buckets the batch into the stats taxonomy for this attempt's
    /// outcome: sent, failed, or retried (with the 429/5xx split).
    fn record_attempt(&self, result: &SendResult, send_duration: Duration) {
        let mut samples = 0usize;
        let mut histograms = 0usize;
        let mut newest_timestamp = 0i64;
        for ts in &self.series {
            if ts.histograms.histogram.is_some() || ts.histograms.float_histogram.is_some() {
                histograms += 1;
            } else {
                samples += 1;
            }
            newest_timestamp = newest_timestamp.max(ts.timestamp);
        }

        let mut stats = NetworkStats {
            send_duration,
            ..Default::default()
        };
        let fill = |category: &mut CategoryStats, count: usize| {
            if result.successful {
                category.series_sent = count;
            } else if result.recoverable {
                category.retried_samples = count;
                match result.status_code {
                    Some(StatusCode::TOO_MANY_REQUESTS) => category.retried_samples_429 = count,
                    Some(code) if code.is_server_error() => category.retried_samples_5xx = count,
                    _ => {}
                }
                if result.network_error {
                    category.network_samples_failed = count;
                }
            } else {
                category.failed_samples = count;
            }
        };
        if self.is_meta {
            fill(&mut stats.metadata, self.series.len());
        } else {
            fill(&mut stats.series, samples);
            fill(&mut stats.histogram, histograms);
        }
        if result.successful {
            stats.newest_timestamp = newest_timestamp;
            if self.is_meta {
                stats.metadata_bytes = self.send_buffer.len();
            } else {
                stats.series_bytes = self.send_buffer.len();
            }
        }
        (self.stats)(stats);
    }
}

/// Parses a Retry-After header as either an HTTP-date or a second count.
/// Absent header falls back to the configured backoff; a header we cannot
/// parse falls back to five seconds.
fn retry_after_duration(default: Duration, header: Option<&str>) -> Duration {
    let Some(header) = header else { return default };
    if let Ok(when) = httpdate::parse_http_date(header) {
        return when
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
    }
    match header.trim().parse::<u64>() {
        Ok(seconds) => Duration::from_secs(seconds),
        Err(_) => FALLBACK_RETRY_AFTER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[test]
    fn test_retry_after_seconds() {
        assert_eq!(
            retry_after_duration(Duration::from_secs(1), Some("2")),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_retry_after_http_date() {
        let when = SystemTime::now() + Duration::from_secs(30);
        let header = httpdate::fmt_http_date(when);
        let parsed = retry_after_duration(Duration::from_secs(1), Some(&header));
        assert!(parsed > Duration::from_secs(25) && parsed <= Duration::from_secs(30));
    }

    #[test]
    fn test_retry_after_fallbacks() {
        assert_eq!(
            retry_after_duration(Duration::from_secs(1), None),
            Duration::from_secs(1)
        );
        assert_eq!(
            retry_after_duration(Duration::from_secs(1), Some("not a date")),
            FALLBACK_RETRY_AFTER
        );
    }
}
