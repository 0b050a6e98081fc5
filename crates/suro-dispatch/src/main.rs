// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SURO Dispatch server
//!
//! Runs the dispatch core against a DOcplexcloud-style backend with a SQLite
//! run store and serves the HTTP submission API.

use std::sync::Arc;
use tracing::{info, warn};

use suro_dispatch::backend::docloud::DoCloudBackend;
use suro_dispatch::catalog::FileCatalog;
use suro_dispatch::config::Config;
use suro_dispatch::runtime::DispatchRuntime;
use suro_store::SqliteRunRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "suro_dispatch=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        api_url = %config.api_url,
        max_concurrent = config.max_concurrent,
        database = %config.database_path.display(),
        catalog = %config.catalog_dir.display(),
        "Starting SURO dispatch"
    );

    let repository = SqliteRunRepository::from_path(&config.database_path).await?;
    info!("Run store ready");

    let backend = DoCloudBackend::new(&config.api_url, &config.api_token);

    let runtime = DispatchRuntime::builder()
        .repository(Arc::new(repository))
        .backend(Arc::new(backend))
        .catalog(Arc::new(FileCatalog::new(&config.catalog_dir)))
        .config(&config)
        .build()?
        .start()
        .await?;

    if let Some(addr) = runtime.http_addr() {
        info!(addr = %addr, "SURO dispatch ready");
    }

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("SURO dispatch shut down");

    Ok(())
}
