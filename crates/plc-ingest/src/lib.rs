// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ingestion core for the PLC telemetry collector.
//!
//! A plant pushes controller telemetry over a persistent websocket feed.
//! This crate owns the full path from inbound frame to durable record:
//!
//! ```text
//!   ConnectionManager ──▶ SnapshotBuffer ──▶ FlushEngine ──▶ TelemetryStore
//!        │                                       │
//!        │ decode / route / sanitize             │ carry-forward + monotonic
//!        └── reconnect w/ backoff, heartbeat     └── idempotent minute upsert
//! ```
//!
//! The [`lock`] module is an independent lease-based mutual-exclusion
//! primitive for scheduled jobs that must run on exactly one instance at a
//! time; it shares nothing with the ingestion path except the store.

pub mod catalog;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod flush;
pub mod lock;
pub mod resolve;
pub mod sanitize;
pub mod snapshot;
pub mod store;

pub use catalog::SourceCatalog;
pub use codec::{PayloadCodec, PlainCodec};
pub use config::CollectorConfig;
pub use connection::ConnectionManager;
pub use error::{CollectorError, StoreError};
pub use flush::FlushEngine;
pub use lock::JobLock;
pub use snapshot::SnapshotBuffer;
pub use store::{MemoryStore, PgStore, TelemetryStore};
