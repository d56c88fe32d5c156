// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory store used by tests and storeless runs.

use super::{LockLease, PersistedRecord, TelemetryStore};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Default)]
struct MemoryInner {
    collections: HashMap<String, BTreeMap<DateTime<Utc>, Map<String, Value>>>,
    leases: HashMap<String, DateTime<Utc>>,
}

/// Volatile [`TelemetryStore`] with the same semantics as the durable one.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    /// Number of records in a collection; test helper.
    pub fn record_count(&self, collection: &str) -> usize {
        #[allow(clippy::expect_used)]
        let inner = self.inner.lock().expect("lock poisoned");
        inner
            .collections
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

#[allow(clippy::expect_used)]
#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn latest_record(
        &self,
        collection: &str,
    ) -> Result<Option<PersistedRecord>, StoreError> {
        let inner = self.inner.lock().expect("lock poisoned");
        Ok(inner.collections.get(collection).and_then(|records| {
            records.iter().next_back().map(|(bucket, fields)| {
                PersistedRecord {
                    bucket: *bucket,
                    fields: fields.clone(),
                }
            })
        }))
    }

    async fn upsert_record(
        &self,
        collection: &str,
        bucket: DateTime<Utc>,
        fields: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(bucket, fields.clone());
        Ok(())
    }

    async fn try_acquire_lease(
        &self,
        job_id: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<LockLease, StoreError> {
        // The whole compare-and-set happens under one lock guard, mirroring
        // the single conditional statement the durable store executes.
        let mut inner = self.inner.lock().expect("lock poisoned");
        let current = inner
            .leases
            .entry(job_id.to_string())
            .and_modify(|existing| {
                if *existing < now {
                    *existing = expires_at;
                }
            })
            .or_insert(expires_at);
        Ok(LockLease {
            job_id: job_id.to_string(),
            expires_at: *current,
        })
    }

    async fn release_lease(&self, job_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        if let Some(expiry) = inner.leases.get_mut(job_id) {
            *expiry = DateTime::<Utc>::UNIX_EPOCH;
        }
        Ok(())
    }
}
