// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable dispatch runtime.
//!
//! [`DispatchRuntime`] wires a repository, a backend and a model catalog
//! into a [`Core`], starts the worker pool and, optionally, the HTTP API.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use suro_dispatch::backend::docloud::DoCloudBackend;
//! use suro_dispatch::catalog::FileCatalog;
//! use suro_dispatch::runtime::DispatchRuntime;
//! use suro_store::SqliteRunRepository;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let repository = SqliteRunRepository::from_path(".data/suro.db").await?;
//!
//!     let runtime = DispatchRuntime::builder()
//!         .repository(Arc::new(repository))
//!         .backend(Arc::new(DoCloudBackend::new("https://...", "token")))
//!         .catalog(Arc::new(FileCatalog::new(".data/catalog")))
//!         .http_addr("0.0.0.0:8080".parse()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use suro_store::RunRepository;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::api;
use crate::backend::Backend;
use crate::catalog::ModelCatalog;
use crate::config::{Config, DEFAULT_MAX_CONCURRENT};
use crate::core::{Core, CoreConfig};
use crate::executor::ExecutorConfig;
use crate::notify::NotificationBus;

/// Builder for a [`DispatchRuntime`].
pub struct DispatchRuntimeBuilder {
    repository: Option<Arc<dyn RunRepository>>,
    backend: Option<Arc<dyn Backend>>,
    catalog: Option<Arc<dyn ModelCatalog>>,
    bus: Option<NotificationBus>,
    http_addr: Option<SocketAddr>,
    max_concurrent: usize,
    executor: ExecutorConfig,
    resume_poll_interval: Duration,
}

impl Default for DispatchRuntimeBuilder {
    fn default() -> Self {
        Self {
            repository: None,
            backend: None,
            catalog: None,
            bus: None,
            http_addr: None,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            executor: ExecutorConfig::default(),
            resume_poll_interval: Duration::from_secs(2),
        }
    }
}

impl DispatchRuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the run repository (required).
    pub fn repository(mut self, repository: Arc<dyn RunRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Set the optimisation backend (required).
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the model catalog (required).
    pub fn catalog(mut self, catalog: Arc<dyn ModelCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Share an existing notification bus.
    ///
    /// Default: a new bus
    pub fn bus(mut self, bus: NotificationBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Serve the HTTP API on this address.
    ///
    /// Default: no HTTP server
    pub fn http_addr(mut self, addr: SocketAddr) -> Self {
        self.http_addr = Some(addr);
        self
    }

    /// Default: 3
    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    /// Default: 5 seconds
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.executor.check_interval = interval;
        self
    }

    /// Default: 10 seconds
    pub fn ramp_up(mut self, delay: Duration) -> Self {
        self.executor.ramp_up = delay;
        self
    }

    /// Default: 2 seconds
    pub fn monitor_poll_interval(mut self, interval: Duration) -> Self {
        self.executor.monitor_poll_interval = interval;
        self
    }

    /// Default: 2 seconds
    pub fn resume_poll_interval(mut self, interval: Duration) -> Self {
        self.resume_poll_interval = interval;
        self
    }

    /// Take pool size, timings and HTTP address from a [`Config`].
    pub fn config(mut self, config: &Config) -> Self {
        let core = CoreConfig::from(config);
        self.max_concurrent = core.max_concurrent;
        self.executor = core.executor;
        self.resume_poll_interval = core.resume_poll_interval;
        self.http_addr = Some(config.http_addr);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<DispatchRuntimeConfig> {
        let repository = self
            .repository
            .ok_or_else(|| anyhow::anyhow!("repository is required"))?;
        let backend = self
            .backend
            .ok_or_else(|| anyhow::anyhow!("backend is required"))?;
        let catalog = self
            .catalog
            .ok_or_else(|| anyhow::anyhow!("catalog is required"))?;
        if self.max_concurrent == 0 {
            anyhow::bail!("max_concurrent must be at least 1");
        }

        Ok(DispatchRuntimeConfig {
            repository,
            backend,
            catalog,
            bus: self.bus.unwrap_or_default(),
            http_addr: self.http_addr,
            core: CoreConfig {
                max_concurrent: self.max_concurrent,
                executor: self.executor,
                resume_poll_interval: self.resume_poll_interval,
            },
        })
    }
}

/// Configuration for a [`DispatchRuntime`].
pub struct DispatchRuntimeConfig {
    repository: Arc<dyn RunRepository>,
    backend: Arc<dyn Backend>,
    catalog: Arc<dyn ModelCatalog>,
    bus: NotificationBus,
    http_addr: Option<SocketAddr>,
    core: CoreConfig,
}

impl DispatchRuntimeConfig {
    /// Start the core and, if configured, the HTTP server.
    pub async fn start(self) -> Result<DispatchRuntime> {
        let backend_type = self.backend.backend_type();
        let core = Core::new(
            self.repository,
            self.backend,
            self.catalog,
            self.bus,
            self.core,
        );

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server = match self.http_addr {
            Some(addr) => {
                let listener = tokio::net::TcpListener::bind(addr).await?;
                let local_addr = listener.local_addr()?;
                let router = api::build_router(Arc::clone(&core));
                let handle = tokio::spawn(async move {
                    axum::serve(listener, router)
                        .with_graceful_shutdown(async move {
                            let _ = shutdown_rx.changed().await;
                        })
                        .await
                        .map_err(anyhow::Error::from)
                });
                info!(addr = %local_addr, "HTTP API listening");
                Some((handle, local_addr))
            }
            None => None,
        };

        core.start().await;

        info!(
            backend = backend_type,
            executors = core.job_controller().pool_size(),
            "DispatchRuntime started"
        );

        Ok(DispatchRuntime {
            core,
            server,
            shutdown_tx,
        })
    }
}

/// A running dispatch instance.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct DispatchRuntime {
    core: Arc<Core>,
    server: Option<(JoinHandle<Result<()>>, SocketAddr)>,
    shutdown_tx: watch::Sender<bool>,
}

impl DispatchRuntime {
    pub fn builder() -> DispatchRuntimeBuilder {
        DispatchRuntimeBuilder::new()
    }

    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    /// Address the HTTP API is bound to, if it is served.
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(|(_, addr)| *addr)
    }

    /// Stop the HTTP server and the worker pool.
    pub async fn shutdown(self) -> Result<()> {
        info!("DispatchRuntime shutting down...");

        let _ = self.shutdown_tx.send(true);
        self.core.shutdown().await;

        let Some((handle, _)) = self.server else {
            info!("DispatchRuntime shutdown complete");
            return Ok(());
        };
        match handle.await {
            Ok(Ok(())) => {
                info!("DispatchRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("HTTP server error during shutdown: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("HTTP server task panicked: {}", e);
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        let server_running = self
            .server
            .as_ref()
            .is_none_or(|(handle, _)| !handle.is_finished());
        self.core.is_ready() && server_running
    }
}
