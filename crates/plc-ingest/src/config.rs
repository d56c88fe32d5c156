// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::CollectorError;
use std::env;
use std::time::Duration;

const DEFAULT_FLUSH_INTERVAL_MS: u64 = 60_000;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 20_000;
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_BACKOFF_CAP_MS: u64 = 30_000;
const DEFAULT_BACKOFF_JITTER_MS: u64 = 1_000;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 1_000;

/// Configuration for the telemetry collector
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Websocket endpoint of the upstream telemetry feed
    pub feed_url: String,
    /// Bearer token for the feed; also appended as a `token` query parameter
    pub auth_token: Option<String>,
    /// Postgres URL for the durable store; `None` selects the in-memory store
    pub database_url: Option<String>,
    /// Flush engine tick period
    pub flush_interval: Duration,
    /// Ping cadence; also the deadline for the matching pong
    pub heartbeat_interval: Duration,
    /// Hard cutoff for the websocket handshake
    pub handshake_timeout: Duration,
    /// Reconnect backoff base wait
    pub backoff_base: Duration,
    /// Reconnect backoff ceiling
    pub backoff_cap: Duration,
    /// Upper bound (exclusive) of the random jitter added to each backoff
    pub backoff_jitter_max: Duration,
    /// Grace period for the remote end to acknowledge a polite close
    pub shutdown_grace: Duration,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            feed_url: "wss://localhost:9443/feed".to_string(),
            auth_token: None,
            database_url: None,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            handshake_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_cap: Duration::from_millis(DEFAULT_BACKOFF_CAP_MS),
            backoff_jitter_max: Duration::from_millis(DEFAULT_BACKOFF_JITTER_MS),
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
            log_level: "info".to_string(),
        }
    }
}

fn duration_from_env(var: &str, default_ms: u64) -> Duration {
    let ms = env::var(var)
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .unwrap_or(default_ms);
    Duration::from_millis(ms)
}

impl CollectorConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, CollectorError> {
        let feed_url = env::var("PLC_FEED_URL").unwrap_or_default();
        let auth_token = env::var("PLC_FEED_TOKEN").ok().filter(|t| !t.is_empty());
        let database_url = env::var("PLC_DATABASE_URL").ok().filter(|u| !u.is_empty());
        let log_level = env::var("PLC_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| "info".to_string());

        let config = Self {
            feed_url,
            auth_token,
            database_url,
            flush_interval: duration_from_env("PLC_FLUSH_INTERVAL_MS", DEFAULT_FLUSH_INTERVAL_MS),
            heartbeat_interval: duration_from_env(
                "PLC_HEARTBEAT_INTERVAL_MS",
                DEFAULT_HEARTBEAT_INTERVAL_MS,
            ),
            handshake_timeout: duration_from_env(
                "PLC_HANDSHAKE_TIMEOUT_MS",
                DEFAULT_HANDSHAKE_TIMEOUT_MS,
            ),
            backoff_base: duration_from_env("PLC_BACKOFF_BASE_MS", DEFAULT_BACKOFF_BASE_MS),
            backoff_cap: duration_from_env("PLC_BACKOFF_CAP_MS", DEFAULT_BACKOFF_CAP_MS),
            backoff_jitter_max: duration_from_env(
                "PLC_BACKOFF_JITTER_MS",
                DEFAULT_BACKOFF_JITTER_MS,
            ),
            shutdown_grace: duration_from_env("PLC_SHUTDOWN_GRACE_MS", DEFAULT_SHUTDOWN_GRACE_MS),
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), CollectorError> {
        if self.feed_url.trim().is_empty() {
            return Err(CollectorError::InvalidConfig(
                "PLC_FEED_URL cannot be empty".to_string(),
            ));
        }

        if !self.feed_url.starts_with("ws://") && !self.feed_url.starts_with("wss://") {
            return Err(CollectorError::InvalidConfig(format!(
                "PLC_FEED_URL must use a ws:// or wss:// scheme, got '{}'",
                self.feed_url
            )));
        }

        if self.flush_interval.is_zero() {
            return Err(CollectorError::InvalidConfig(
                "Flush interval must be greater than 0".to_string(),
            ));
        }

        if self.heartbeat_interval.is_zero() {
            return Err(CollectorError::InvalidConfig(
                "Heartbeat interval must be greater than 0".to_string(),
            ));
        }

        if self.backoff_base.is_zero() {
            return Err(CollectorError::InvalidConfig(
                "Backoff base must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(CollectorError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}
