// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Postgres-backed store.
//!
//! Each telemetry collection is one table of `(bucket, fields)` where the
//! minute bucket is the primary key and the field bag is jsonb, so records
//! stay as sparse documents. Collection names come from the static catalog;
//! they are interpolated as identifiers (placeholders cannot bind those) and
//! re-validated here anyway.

use super::{LockLease, PersistedRecord, TelemetryStore};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{info, warn};

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: u32 = 10;

/// Durable [`TelemetryStore`] on Postgres.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects with bounded retries; controllers often come up before the
    /// database does after a site power cycle.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let mut attempts_left = CONNECT_ATTEMPTS;
        loop {
            match PgPoolOptions::new()
                .max_connections(MAX_CONNECTIONS)
                .connect(url)
                .await
            {
                Ok(pool) => {
                    info!("store connected");
                    return Ok(PgStore { pool });
                }
                Err(err) => {
                    attempts_left -= 1;
                    if attempts_left == 0 {
                        return Err(StoreError::Backend(format!(
                            "could not connect to store after {CONNECT_ATTEMPTS} attempts: {err}"
                        )));
                    }
                    warn!(
                        "store connection failed ({err}); retrying in {:?}, {attempts_left} attempts left",
                        CONNECT_RETRY_DELAY
                    );
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
            }
        }
    }

    /// Creates the snapshot tables for every catalog collection plus the
    /// lease table. Idempotent.
    pub async fn ensure_schema(&self, collections: &[&str]) -> Result<(), StoreError> {
        for collection in collections {
            let table = ident(collection)?;
            sqlx::query(&format!(
                "create table if not exists {table} (\
                   bucket timestamptz primary key,\
                   fields jsonb not null\
                 )"
            ))
            .execute(&self.pool)
            .await?;
        }
        sqlx::query(
            "create table if not exists lock_leases (\
               job_id text primary key,\
               expires_at timestamptz not null\
             )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Validates a catalog collection name for use as a SQL identifier.
fn ident(name: &str) -> Result<&str, StoreError> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(name)
    } else {
        Err(StoreError::Backend(format!(
            "invalid collection name '{name}'"
        )))
    }
}

fn fields_from_value(value: Value) -> Result<Map<String, Value>, StoreError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Serialization(format!(
            "expected a field object, got {other}"
        ))),
    }
}

#[async_trait]
impl TelemetryStore for PgStore {
    async fn latest_record(
        &self,
        collection: &str,
    ) -> Result<Option<PersistedRecord>, StoreError> {
        let table = ident(collection)?;
        let row = sqlx::query(&format!(
            "select bucket, fields from {table} order by bucket desc limit 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let bucket: DateTime<Utc> = row.try_get("bucket")?;
                let fields: Value = row.try_get("fields")?;
                Ok(Some(PersistedRecord {
                    bucket,
                    fields: fields_from_value(fields)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn upsert_record(
        &self,
        collection: &str,
        bucket: DateTime<Utc>,
        fields: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        let table = ident(collection)?;
        sqlx::query(&format!(
            "insert into {table} (bucket, fields) values ($1, $2) \
             on conflict (bucket) do update set fields = excluded.fields"
        ))
        .bind(bucket)
        .bind(Value::Object(fields.clone()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn try_acquire_lease(
        &self,
        job_id: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<LockLease, StoreError> {
        // The conditional upsert is the atomicity point: of two concurrent
        // callers exactly one can satisfy the WHERE clause. The read-back may
        // run separately because losing a race there only turns a hold into
        // a skip, never a skip into a hold.
        sqlx::query(
            "insert into lock_leases (job_id, expires_at) values ($1, $2) \
             on conflict (job_id) do update set expires_at = excluded.expires_at \
             where lock_leases.expires_at < $3",
        )
        .bind(job_id)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("select expires_at from lock_leases where job_id = $1")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(LockLease {
            job_id: job_id.to_string(),
            expires_at: row.try_get("expires_at")?,
        })
    }

    async fn release_lease(&self, job_id: &str) -> Result<(), StoreError> {
        sqlx::query("update lock_leases set expires_at = to_timestamp(0) where job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
