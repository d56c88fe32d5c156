// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use plc_ingest::{
    CollectorConfig, ConnectionManager, MemoryStore, PgStore, PlainCodec, SnapshotBuffer,
    SourceCatalog, TelemetryStore,
};

#[tokio::main]
pub async fn main() {
    let config = match CollectorConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(err) => {
            eprintln!("Error creating config on collector startup: {err}");
            std::process::exit(1);
        }
    };

    let env_filter = format!("tungstenite=off,sqlx=warn,{}", config.log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let catalog = Arc::new(SourceCatalog::plant_default());

    let store: Arc<dyn TelemetryStore> = match &config.database_url {
        Some(url) => {
            let store = match PgStore::connect(url).await {
                Ok(store) => store,
                Err(err) => {
                    error!("Could not connect to the store: {err}");
                    std::process::exit(1);
                }
            };
            if let Err(err) = store.ensure_schema(&catalog.collections()).await {
                error!("Could not prepare the store schema: {err}");
                std::process::exit(1);
            }
            Arc::new(store)
        }
        None => {
            warn!("PLC_DATABASE_URL not set; snapshots will not survive a restart");
            Arc::new(MemoryStore::default())
        }
    };

    let shutdown = CancellationToken::new();
    let manager = ConnectionManager::new(
        Arc::clone(&config),
        catalog,
        SnapshotBuffer::default(),
        store,
        Arc::new(PlainCodec),
        shutdown.clone(),
    );

    info!("Starting telemetry collector against {}", config.feed_url);
    let manager_handle = tokio::spawn(manager.run());

    wait_for_shutdown_signal().await;
    info!("Shutdown requested");

    // Stop tickers and let the manager close the socket politely; don't
    // wait on an in-flight flush beyond the grace period.
    shutdown.cancel();
    let grace = config.shutdown_grace + Duration::from_secs(1);
    if tokio::time::timeout(grace, manager_handle).await.is_err() {
        warn!("Connection manager did not stop within the grace period");
    }
    info!("Collector stopped");
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            error!("Could not install SIGTERM handler: {err}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
