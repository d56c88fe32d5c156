// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable store contract.
//!
//! The store is the single source of truth for persisted records and lock
//! leases; nothing in this process caches them beyond the flush engine's
//! last-flushed-key hint. Implementations must provide two primitives with
//! hard guarantees:
//!
//! - **Bucket-keyed upsert**: at most one record per (collection, minute),
//!   regardless of process restarts or concurrent writers.
//! - **Atomic conditional lease upsert**: the compare-and-set that backs the
//!   distributed lock.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// One persisted minute snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRecord {
    /// Timestamp truncated to the start of its minute; the record key.
    pub bucket: DateTime<Utc>,
    pub fields: Map<String, Value>,
}

/// A lock lease row. Held iff `expires_at` is in the future.
#[derive(Debug, Clone, PartialEq)]
pub struct LockLease {
    pub job_id: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// The most recent record in a collection, by bucket descending.
    async fn latest_record(
        &self,
        collection: &str,
    ) -> Result<Option<PersistedRecord>, StoreError>;

    /// Writes a record keyed by its minute bucket, creating or replacing.
    ///
    /// This upsert is the correctness mechanism for one-record-per-minute;
    /// callers may layer dedup hints on top but must not rely on them.
    async fn upsert_record(
        &self,
        collection: &str,
        bucket: DateTime<Utc>,
        fields: &Map<String, Value>,
    ) -> Result<(), StoreError>;

    /// Single atomic conditional upsert of a lease: writes `expires_at` for
    /// `job_id` only if no lease exists or the existing one expired before
    /// `now`, then returns the lease as stored after the attempt. The caller
    /// holds the lock iff the returned expiry equals the one it asked for.
    async fn try_acquire_lease(
        &self,
        job_id: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<LockLease, StoreError>;

    /// Parks the lease at the epoch so the next acquirer succeeds
    /// immediately instead of waiting out the TTL.
    async fn release_lease(&self, job_id: &str) -> Result<(), StoreError>;
}
