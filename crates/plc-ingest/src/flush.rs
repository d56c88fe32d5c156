// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic idempotent flush of buffered snapshots.
//!
//! Once a minute (configurable) the engine walks the snapshot buffer and
//! upserts one record per source keyed by its minute bucket. A per-source
//! last-flushed key skips writes that already happened this minute, but the
//! bucket-keyed upsert is what actually guarantees uniqueness — the hint
//! only saves round trips. One source failing to persist never blocks the
//! others; its key is left unadvanced so the next tick retries.

use crate::catalog::SourceCatalog;
use crate::error::StoreError;
use crate::resolve::resolve_fields;
use crate::snapshot::{minute_bucket, Snapshot, SnapshotBuffer};
use crate::store::TelemetryStore;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub struct FlushEngine {
    buffer: SnapshotBuffer,
    store: Arc<dyn TelemetryStore>,
    catalog: Arc<SourceCatalog>,
    interval: Duration,
    /// Guards against overlapping cycles; a tick that finds one in progress
    /// is skipped, not queued.
    in_flight: AtomicBool,
    /// source id → bucket of the last successful write.
    last_flushed: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl FlushEngine {
    pub fn new(
        buffer: SnapshotBuffer,
        store: Arc<dyn TelemetryStore>,
        catalog: Arc<SourceCatalog>,
        interval: Duration,
    ) -> Self {
        FlushEngine {
            buffer,
            store,
            catalog,
            interval,
            in_flight: AtomicBool::new(false),
            last_flushed: Mutex::new(HashMap::new()),
        }
    }

    /// Runs the flush loop until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await; // discard first tick, which is instantaneous

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick().await;
        }
        debug!("flush engine stopped");
    }

    /// One tick: flush every buffered snapshot unless a cycle is running.
    pub async fn tick(&self) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("flush cycle still in progress; skipping tick");
            return;
        }
        self.flush_cycle().await;
        self.in_flight.store(false, Ordering::SeqCst);
    }

    async fn flush_cycle(&self) {
        let snapshots = self.buffer.snapshot_all();
        if snapshots.is_empty() {
            return;
        }

        for snapshot in snapshots {
            let bucket = minute_bucket(snapshot.observed_at);
            if self.already_flushed(&snapshot.source_id, bucket) {
                continue;
            }
            match self.persist(&snapshot, bucket).await {
                Ok(()) => {
                    debug!(
                        source = %snapshot.source_id,
                        bucket = %bucket,
                        "snapshot flushed"
                    );
                    self.remember_flushed(&snapshot.source_id, bucket);
                }
                Err(err) => {
                    // Key not advanced: the next tick retries this source.
                    error!(
                        source = %snapshot.source_id,
                        "flush failed, will retry next tick: {err}"
                    );
                }
            }
        }
    }

    async fn persist(
        &self,
        snapshot: &Snapshot,
        bucket: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let latest = self.store.latest_record(snapshot.collection).await?;

        let fields = match &latest {
            // Re-flushing the minute that is already current: replace the
            // fields as observed, without re-deriving stale fallbacks.
            Some(prev) if prev.bucket == bucket => snapshot.fields.clone(),
            Some(prev) => match self.catalog.spec(snapshot.kind) {
                Some(spec) => {
                    resolve_fields(&snapshot.fields, &prev.fields, &spec.rules, spec.monotonic)
                }
                None => snapshot.fields.clone(),
            },
            None => snapshot.fields.clone(),
        };

        self.store
            .upsert_record(snapshot.collection, bucket, &fields)
            .await
    }

    #[allow(clippy::expect_used)]
    fn already_flushed(&self, source_id: &str, bucket: DateTime<Utc>) -> bool {
        let last = self.last_flushed.lock().expect("lock poisoned");
        last.get(source_id) == Some(&bucket)
    }

    #[allow(clippy::expect_used)]
    fn remember_flushed(&self, source_id: &str, bucket: DateTime<Utc>) {
        let mut last = self.last_flushed.lock().expect("lock poisoned");
        last.insert(source_id.to_string(), bucket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SourceKind;
    use crate::store::MemoryStore;
    use serde_json::{json, Map, Value};

    fn fields(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    fn engine_with(store: Arc<MemoryStore>) -> FlushEngine {
        FlushEngine::new(
            SnapshotBuffer::default(),
            store,
            Arc::new(SourceCatalog::plant_default()),
            Duration::from_secs(60),
        )
    }

    fn reactor_snapshot(observed_at: &str, v: Value) -> Snapshot {
        Snapshot {
            source_id: "PLC_1".to_string(),
            kind: SourceKind::Reactor,
            collection: "reactor_1_data",
            observed_at: observed_at.parse().unwrap(),
            fields: fields(v),
        }
    }

    #[tokio::test]
    async fn flush_writes_one_record_per_minute() {
        let store = Arc::new(MemoryStore::default());
        let engine = engine_with(Arc::clone(&store));

        engine
            .buffer
            .record(reactor_snapshot("2024-01-01T10:00:10Z", json!({ "Temperature": 20.0 })));
        engine.tick().await;

        engine
            .buffer
            .record(reactor_snapshot("2024-01-01T10:00:40Z", json!({ "Temperature": 22.0 })));
        engine.tick().await;

        // The dedup key already covers 10:00, so the second tick skips.
        assert_eq!(store.record_count("reactor_1_data"), 1);
        let latest = store.latest_record("reactor_1_data").await.unwrap().unwrap();
        assert_eq!(latest.fields.get("Temperature"), Some(&json!(20.0)));
    }

    #[tokio::test]
    async fn next_minute_reuses_quiet_sources_snapshot() {
        let store = Arc::new(MemoryStore::default());
        let engine = engine_with(Arc::clone(&store));

        engine
            .buffer
            .record(reactor_snapshot("2024-01-01T10:00:10Z", json!({ "Temperature": 20.0 })));
        engine.tick().await;
        assert_eq!(store.record_count("reactor_1_data"), 1);

        // No new message arrives; the buffered entry persists but its bucket
        // is unchanged, so nothing new is written.
        engine.tick().await;
        assert_eq!(store.record_count("reactor_1_data"), 1);

        // A fresh reading in the next minute produces a second record.
        engine
            .buffer
            .record(reactor_snapshot("2024-01-01T10:01:05Z", json!({ "Temperature": 21.0 })));
        engine.tick().await;
        assert_eq!(store.record_count("reactor_1_data"), 2);
    }

    #[tokio::test]
    async fn carry_forward_fills_gaps_from_prior_record() {
        let store = Arc::new(MemoryStore::default());
        let engine = engine_with(Arc::clone(&store));

        store
            .upsert_record(
                "reactor_1_data",
                "2024-01-01T09:59:00Z".parse().unwrap(),
                &fields(json!({ "Temperature": 20.5, "LampMixer": 1 })),
            )
            .await
            .unwrap();

        // New reading lost both fields to sanitization upstream.
        engine
            .buffer
            .record(reactor_snapshot("2024-01-01T10:00:30Z", json!({})));
        engine.tick().await;

        let latest = store.latest_record("reactor_1_data").await.unwrap().unwrap();
        assert_eq!(latest.bucket, "2024-01-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(latest.fields.get("Temperature"), Some(&json!(20.5)));
        assert_eq!(latest.fields.get("LampMixer"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn same_minute_reflush_bypasses_carry_forward() {
        let store = Arc::new(MemoryStore::default());
        let engine = engine_with(Arc::clone(&store));

        // A record for 10:00 already exists with a temperature.
        store
            .upsert_record(
                "reactor_1_data",
                "2024-01-01T10:00:00Z".parse().unwrap(),
                &fields(json!({ "Temperature": 20.5 })),
            )
            .await
            .unwrap();

        // Re-flush of the same minute with the field absent: the update
        // must not re-derive the fallback, the field just stays out.
        engine
            .buffer
            .record(reactor_snapshot("2024-01-01T10:00:45Z", json!({ "Pressure": 1.25 })));
        engine.tick().await;

        let latest = store.latest_record("reactor_1_data").await.unwrap().unwrap();
        assert_eq!(store.record_count("reactor_1_data"), 1);
        assert_eq!(latest.fields.get("Pressure"), Some(&json!(1.25)));
        assert!(!latest.fields.contains_key("Temperature"));
    }

    #[tokio::test]
    async fn monotonic_counter_does_not_regress_across_flushes() {
        let store = Arc::new(MemoryStore::default());
        let engine = engine_with(Arc::clone(&store));

        store
            .upsert_record(
                "electric_meter_data",
                "2024-01-01T09:59:00Z".parse().unwrap(),
                &fields(json!({ "Main_Counter": 15.0 })),
            )
            .await
            .unwrap();

        engine.buffer.record(Snapshot {
            source_id: "PLC_Electric".to_string(),
            kind: SourceKind::ElectricMeter,
            collection: "electric_meter_data",
            observed_at: "2024-01-01T10:00:30Z".parse().unwrap(),
            fields: fields(json!({ "Main_Counter": 10.0 })),
        });
        engine.tick().await;

        let latest = store
            .latest_record("electric_meter_data")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.fields.get("Main_Counter"), Some(&json!(15.0)));
    }

    #[tokio::test]
    async fn tick_skips_while_cycle_in_flight() {
        let store = Arc::new(MemoryStore::default());
        let engine = engine_with(store);
        engine.in_flight.store(true, Ordering::SeqCst);

        let observed_at = "2024-01-01T10:00:10Z".parse().unwrap();
        engine
            .buffer
            .record(reactor_snapshot("2024-01-01T10:00:10Z", json!({ "Temperature": 20.0 })));
        engine.tick().await;

        // Nothing ran: the dedup key was not advanced and the flag is as
        // the in-progress cycle left it.
        assert!(engine.in_flight.load(Ordering::SeqCst));
        assert!(!engine.already_flushed("PLC_1", minute_bucket(observed_at)));
    }

    #[tokio::test]
    async fn run_loop_stops_on_cancellation() {
        let engine = Arc::new(engine_with(Arc::new(MemoryStore::default())));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&engine).run(shutdown.clone()));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("flush loop should stop without waiting out its interval")
            .expect("flush task should not panic");
    }

    /// Store double that rejects writes to one collection and delegates the
    /// rest to a [`MemoryStore`].
    struct PartialOutageStore {
        inner: MemoryStore,
        failing_collection: &'static str,
    }

    #[async_trait::async_trait]
    impl TelemetryStore for PartialOutageStore {
        async fn latest_record(
            &self,
            collection: &str,
        ) -> Result<Option<crate::store::PersistedRecord>, StoreError> {
            self.inner.latest_record(collection).await
        }

        async fn upsert_record(
            &self,
            collection: &str,
            bucket: DateTime<Utc>,
            fields: &Map<String, Value>,
        ) -> Result<(), StoreError> {
            if collection == self.failing_collection {
                return Err(StoreError::Backend("collection unavailable".into()));
            }
            self.inner.upsert_record(collection, bucket, fields).await
        }

        async fn try_acquire_lease(
            &self,
            job_id: &str,
            expires_at: DateTime<Utc>,
            now: DateTime<Utc>,
        ) -> Result<crate::store::LockLease, StoreError> {
            self.inner.try_acquire_lease(job_id, expires_at, now).await
        }

        async fn release_lease(&self, job_id: &str) -> Result<(), StoreError> {
            self.inner.release_lease(job_id).await
        }
    }

    #[tokio::test]
    async fn one_failing_source_does_not_block_others() {
        let store = Arc::new(PartialOutageStore {
            inner: MemoryStore::default(),
            failing_collection: "reactor_1_data",
        });
        let engine = FlushEngine::new(
            SnapshotBuffer::default(),
            Arc::clone(&store) as Arc<dyn TelemetryStore>,
            Arc::new(SourceCatalog::plant_default()),
            Duration::from_secs(60),
        );

        engine
            .buffer
            .record(reactor_snapshot("2024-01-01T10:00:10Z", json!({ "Temperature": 20.0 })));
        engine.buffer.record(Snapshot {
            source_id: "PLC_2".to_string(),
            kind: SourceKind::Reactor,
            collection: "reactor_2_data",
            observed_at: "2024-01-01T10:00:20Z".parse().unwrap(),
            fields: fields(json!({ "Temperature": 30.0 })),
        });

        engine.tick().await;

        // The healthy source persisted despite the outage next door.
        assert_eq!(store.inner.record_count("reactor_1_data"), 0);
        assert_eq!(store.inner.record_count("reactor_2_data"), 1);

        // The failed source's dedup key was not advanced, so the next tick
        // retries it; once the outage clears the write lands.
        let bucket = minute_bucket("2024-01-01T10:00:10Z".parse().unwrap());
        assert!(!engine.already_flushed("PLC_1", bucket));
        assert!(engine.already_flushed("PLC_2", minute_bucket("2024-01-01T10:00:20Z".parse().unwrap())));
    }
}
