// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Websocket lifecycle for the upstream telemetry feed.
//!
//! The manager owns the socket, the heartbeat timer, and the reconnect
//! attempt counter. The feed is continuous, so a dropped sample is always
//! preferable to blocking: malformed payloads are logged and discarded,
//! unroutable field groups are skipped pair-by-pair, and transport failures
//! feed a capped exponential backoff with jitter rather than ever being
//! fatal.

use crate::catalog::SourceCatalog;
use crate::codec::PayloadCodec;
use crate::config::CollectorConfig;
use crate::error::CollectorError;
use crate::flush::FlushEngine;
use crate::sanitize::sanitize_fields;
use crate::snapshot::{Snapshot, SnapshotBuffer};
use crate::store::TelemetryStore;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle. There is no terminal state: the manager runs until
/// the process is told to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    BackoffWait,
}

/// How a session ended, deciding between reconnect and exit.
enum SessionEnd {
    Shutdown,
    Lost,
}

/// Decoded feed message: a timestamp plus one field group per source.
#[derive(Debug, Deserialize)]
struct FeedMessage {
    timestamp: Option<String>,
    #[serde(default)]
    data: HashMap<String, Map<String, Value>>,
}

pub struct ConnectionManager {
    config: Arc<CollectorConfig>,
    catalog: Arc<SourceCatalog>,
    buffer: SnapshotBuffer,
    codec: Arc<dyn PayloadCodec>,
    flush: Arc<FlushEngine>,
    shutdown: CancellationToken,
    flush_started: AtomicBool,
    state: ConnectionState,
}

impl ConnectionManager {
    pub fn new(
        config: Arc<CollectorConfig>,
        catalog: Arc<SourceCatalog>,
        buffer: SnapshotBuffer,
        store: Arc<dyn TelemetryStore>,
        codec: Arc<dyn PayloadCodec>,
        shutdown: CancellationToken,
    ) -> Self {
        let flush = Arc::new(FlushEngine::new(
            buffer.clone(),
            store,
            Arc::clone(&catalog),
            config.flush_interval,
        ));
        ConnectionManager {
            config,
            catalog,
            buffer,
            codec,
            flush,
            shutdown,
            flush_started: AtomicBool::new(false),
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Runs the connect/heartbeat/reconnect loop until shutdown.
    pub async fn run(mut self) {
        let mut attempts: u32 = 0;
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            self.state = ConnectionState::Connecting;
            match self.connect().await {
                Ok(mut stream) => {
                    attempts = 0;
                    self.state = ConnectionState::Open;
                    info!("feed connected");
                    self.ensure_flush_engine();
                    match self.drive_session(&mut stream).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost => {}
                    }
                }
                Err(err) => {
                    warn!("feed connect failed: {err}");
                }
            }
            if self.shutdown.is_cancelled() {
                break;
            }

            attempts = attempts.saturating_add(1);
            self.state = ConnectionState::BackoffWait;
            let wait = backoff_delay(
                attempts,
                self.config.backoff_base,
                self.config.backoff_cap,
                self.config.backoff_jitter_max,
            );
            debug!(attempt = attempts, "reconnecting in {wait:?}");
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        self.state = ConnectionState::Disconnected;
        info!("connection manager stopped");
    }

    /// Starts the flush engine if this is the first transition into Open.
    ///
    /// Returns whether this call started it. A second interval running next
    /// to the first would double every flush write, so the spawn must be
    /// idempotent across reconnects.
    pub fn ensure_flush_engine(&self) -> bool {
        if self.flush_started.swap(true, Ordering::SeqCst) {
            return false;
        }
        let engine = Arc::clone(&self.flush);
        let shutdown = self.shutdown.clone();
        tokio::spawn(engine.run(shutdown));
        true
    }

    async fn connect(&self) -> Result<WsStream, CollectorError> {
        let request = self.feed_request()?;
        match timeout(self.config.handshake_timeout, connect_async(request)).await {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(err)) => Err(CollectorError::Handshake(err.to_string())),
            Err(_) => Err(CollectorError::Handshake(format!(
                "handshake timed out after {:?}",
                self.config.handshake_timeout
            ))),
        }
    }

    /// Builds the handshake request, attaching the auth token as both a
    /// query parameter and a bearer header.
    fn feed_request(
        &self,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, CollectorError> {
        let mut url = self.config.feed_url.clone();
        if let Some(token) = &self.config.auth_token {
            let separator = if url.contains('?') { '&' } else { '?' };
            url.push(separator);
            url.push_str("token=");
            url.push_str(token);
        }

        let mut request = url
            .into_client_request()
            .map_err(|err| CollectorError::Handshake(err.to_string()))?;
        if let Some(token) = &self.config.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|err| CollectorError::Handshake(err.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Ok(request)
    }

    async fn drive_session(&self, stream: &mut WsStream) -> SessionEnd {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        heartbeat.tick().await; // discard first tick, which is instantaneous

        // One missed pong window marks the connection half-open and forces a
        // reconnect; any pong marks it responsive again.
        let mut responsive = true;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.close_politely(stream).await;
                    return SessionEnd::Shutdown;
                }
                _ = heartbeat.tick() => {
                    if !responsive {
                        warn!("no pong within heartbeat interval; terminating half-open connection");
                        return SessionEnd::Lost;
                    }
                    responsive = false;
                    if let Err(err) = stream.send(Message::Ping(Vec::new())).await {
                        warn!("heartbeat ping failed: {err}");
                        return SessionEnd::Lost;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.ingest_blob(text.as_bytes()),
                    Some(Ok(Message::Binary(blob))) => self.ingest_blob(&blob),
                    Some(Ok(Message::Ping(payload))) => {
                        if stream.send(Message::Pong(payload)).await.is_err() {
                            return SessionEnd::Lost;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        responsive = true;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        warn!("feed closed the connection: {frame:?}");
                        return SessionEnd::Lost;
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(err)) => {
                        error!("feed socket error: {err}");
                        return SessionEnd::Lost;
                    }
                    None => {
                        warn!("feed stream ended");
                        return SessionEnd::Lost;
                    }
                }
            }
        }
    }

    /// Closes with a normal closure code, giving the remote end a bounded
    /// grace period to acknowledge.
    async fn close_politely(&self, stream: &mut WsStream) {
        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "shutdown".into(),
        }));
        if stream.send(close).await.is_err() {
            return;
        }
        let _ = timeout(self.config.shutdown_grace, async {
            while let Some(frame) = stream.next().await {
                if matches!(frame, Ok(Message::Close(_)) | Err(_)) {
                    break;
                }
            }
        })
        .await;
    }

    fn ingest_blob(&self, raw: &[u8]) {
        let text = self.codec.decode(raw);
        self.ingest_text(&text, Utc::now());
    }

    /// Parses a decoded feed payload and buffers one snapshot per routable
    /// field group. `received_at` stands in when the message has no usable
    /// timestamp.
    pub fn ingest_text(&self, text: &str, received_at: DateTime<Utc>) {
        let message: FeedMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(err) => {
                warn!("dropping unparseable feed payload: {err}");
                return;
            }
        };

        let observed_at = message
            .timestamp
            .as_deref()
            .and_then(parse_feed_timestamp)
            .unwrap_or(received_at);

        for (source_id, group) in message.data {
            let Some((route, spec)) = self.catalog.route(&source_id) else {
                warn!(source = %source_id, "no storage target configured; skipping field group");
                continue;
            };
            let mapped = spec.mapper.apply(group);
            let fields = sanitize_fields(&mapped, &spec.rules);
            self.buffer.record(Snapshot {
                source_id,
                kind: route.kind,
                collection: route.collection,
                observed_at,
                fields,
            });
        }
    }
}

fn parse_feed_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Computes the wait before reconnect attempt `attempts`:
/// `min(cap, base × 2^attempts)` plus random jitter in `[0, jitter_max)`.
pub(crate) fn backoff_delay(
    attempts: u32,
    base: Duration,
    cap: Duration,
    jitter_max: Duration,
) -> Duration {
    let base_ms = base.as_millis() as u64;
    let cap_ms = cap.as_millis() as u64;
    let exponent = attempts.min(16);
    let wait_ms = base_ms.saturating_mul(1u64 << exponent).min(cap_ms);

    let jitter_ms = jitter_max.as_millis() as u64;
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..jitter_ms)
    };
    Duration::from_millis(wait_ms + jitter)
}
