// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lease-based mutual exclusion for scheduled jobs.
//!
//! Several collector instances may run at once (rolling deploys, HA pairs);
//! scheduled jobs like the nightly backup must execute on exactly one. The
//! primitive is a lease row in the shared store: a single atomic conditional
//! upsert either takes the lease or observes the current holder's. Not
//! getting the lease is a normal outcome, not an error — the caller simply
//! skips the job body.

use crate::error::StoreError;
use crate::store::TelemetryStore;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct JobLock {
    store: Arc<dyn TelemetryStore>,
}

impl JobLock {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        JobLock { store }
    }

    /// Runs `job` iff this instance wins the lease for `job_id`.
    ///
    /// Returns `Ok(Some(output))` when the job ran, `Ok(None)` when another
    /// instance holds an unexpired lease and the job was skipped. After the
    /// job completes the lease is parked at the epoch so the next run does
    /// not wait out the TTL; if that release fails the lease simply expires
    /// on its own.
    pub async fn run_exclusive<F, Fut, T>(
        &self,
        job_id: &str,
        ttl: Duration,
        job: F,
    ) -> Result<Option<T>, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| StoreError::Backend(format!("lease ttl out of range for '{job_id}'")))?;
        let wanted_expiry = now + ttl;

        let lease = self
            .store
            .try_acquire_lease(job_id, wanted_expiry, now)
            .await?;

        // Hold test: the store returns the lease as stored after the
        // conditional upsert. Ours iff it carries the expiry we wrote.
        if lease.expires_at != wanted_expiry {
            info!(job = job_id, "lease held by another instance; skipping");
            return Ok(None);
        }

        debug!(job = job_id, "lease acquired");
        let output = job().await;

        if let Err(err) = self.store.release_lease(job_id).await {
            warn!(job = job_id, "failed to release lease, it will expire on its own: {err}");
        }
        Ok(Some(output))
    }
}
