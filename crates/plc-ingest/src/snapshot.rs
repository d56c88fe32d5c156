// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory snapshot buffering between the feed and the flush engine.
//!
//! The buffer keeps exactly one entry per source: the latest sanitized
//! reading. New readings overwrite older ones (last-write-wins); entries are
//! never removed, so a source that goes quiet keeps contributing its last
//! snapshot to subsequent minutes until fresh data arrives.

use crate::catalog::SourceKind;
use chrono::{DateTime, Timelike, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// The latest observed reading for one source, sanitized and routed but not
/// yet durably persisted.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub source_id: String,
    pub kind: SourceKind,
    /// Store collection the flush engine writes this source into.
    pub collection: &'static str,
    pub observed_at: DateTime<Utc>,
    pub fields: Map<String, Value>,
}

/// Shared map of source id → latest snapshot.
///
/// Written by the connection manager, drained (non-destructively) by the
/// flush engine. Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct SnapshotBuffer {
    inner: Arc<Mutex<HashMap<String, Snapshot>>>,
}

#[allow(clippy::expect_used)]
impl SnapshotBuffer {
    /// Records a snapshot, replacing any prior entry for the same source.
    pub fn record(&self, snapshot: Snapshot) {
        let mut map = self.inner.lock().expect("lock poisoned");
        map.insert(snapshot.source_id.clone(), snapshot);
    }

    /// Returns a copy of every buffered snapshot.
    pub fn snapshot_all(&self) -> Vec<Snapshot> {
        let map = self.inner.lock().expect("lock poisoned");
        map.values().cloned().collect()
    }

    pub fn get(&self, source_id: &str) -> Option<Snapshot> {
        let map = self.inner.lock().expect("lock poisoned");
        map.get(source_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Truncates a timestamp to the start of its minute.
pub fn minute_bucket(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(source_id: &str, temp: f64) -> Snapshot {
        Snapshot {
            source_id: source_id.to_string(),
            kind: SourceKind::Reactor,
            collection: "reactor_1_data",
            observed_at: Utc::now(),
            fields: json!({ "Temperature": temp })
                .as_object()
                .cloned()
                .unwrap_or_default(),
        }
    }

    #[test]
    fn buffer_is_last_write_wins() {
        let buffer = SnapshotBuffer::default();
        buffer.record(snapshot("PLC_1", 20.0));
        buffer.record(snapshot("PLC_1", 21.5));

        assert_eq!(buffer.len(), 1);
        let entry = buffer.get("PLC_1").unwrap();
        assert_eq!(entry.fields.get("Temperature"), Some(&json!(21.5)));
    }

    #[test]
    fn buffer_keeps_one_entry_per_source() {
        let buffer = SnapshotBuffer::default();
        buffer.record(snapshot("PLC_1", 20.0));
        buffer.record(snapshot("PLC_2", 30.0));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn minute_bucket_truncates_seconds() {
        let ts = "2024-01-01T10:00:30.250Z".parse::<DateTime<Utc>>().unwrap();
        let bucket = minute_bucket(ts);
        assert_eq!(bucket.to_rfc3339(), "2024-01-01T10:00:00+00:00");
    }

    #[test]
    fn minute_bucket_is_idempotent() {
        let ts = "2024-01-01T10:05:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(minute_bucket(minute_bucket(ts)), minute_bucket(ts));
    }
}
