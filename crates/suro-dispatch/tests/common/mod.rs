// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for suro-dispatch integration tests.
//!
//! Provides TestContext wiring a Core to an in-memory repository, the mock
//! backend and an in-memory catalog with fast timings.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use suro_dispatch::backend::MockBackend;
use suro_dispatch::catalog::{MemoryCatalog, ModelCatalog};
use suro_dispatch::core::{Core, CoreConfig};
use suro_dispatch::executor::ExecutorConfig;
use suro_dispatch::notify::NotificationBus;
use suro_store::{MemoryRunRepository, Run, RunRepository, RunStatus};

pub const MODEL_ID: &str = "rostering";
pub const DATA_SET_ID: &str = "week-1";
pub const TEMPLATE_ID: &str = "tpl-1";

/// How long wait helpers poll before giving up.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestContext {
    pub core: Arc<Core>,
    pub repo: Arc<MemoryRunRepository>,
    pub backend: Arc<MockBackend>,
    pub catalog: Arc<MemoryCatalog>,
    pub bus: NotificationBus,
}

impl TestContext {
    /// Context with `executors` workers. Nothing is started.
    pub fn new(executors: usize) -> Self {
        Self::with_parts(
            executors,
            Arc::new(MemoryRunRepository::new()),
            Arc::new(MockBackend::new()),
        )
    }

    pub fn with_parts(
        executors: usize,
        repo: Arc<MemoryRunRepository>,
        backend: Arc<MockBackend>,
    ) -> Self {
        let catalog = Arc::new(
            MemoryCatalog::new()
                .with_model(MODEL_ID, "int n = ...; dvar int x[1..n];")
                .with_data_set(DATA_SET_ID, "n = 7;"),
        );
        let bus = NotificationBus::default();
        let core = fast_core(executors, repo.clone(), backend.clone(), catalog.clone(), bus.clone());

        Self {
            core,
            repo,
            backend,
            catalog,
            bus,
        }
    }

    /// Context with workers running.
    pub async fn started(executors: usize) -> Self {
        let ctx = Self::new(executors);
        ctx.core.start().await;
        ctx
    }

    /// Ready for business without any executor polling.
    pub async fn ready_without_workers(executors: usize) -> Self {
        let ctx = Self::new(executors);
        ctx.core.set_ready(true).await;
        ctx
    }

    pub async fn submit(&self) -> Run {
        self.core
            .submit_run(new_run())
            .await
            .expect("submit failed")
            .expect("core not ready")
    }

    pub async fn run(&self, run_id: &str) -> Run {
        self.core
            .get_run(run_id)
            .await
            .expect("get_run failed")
            .expect("run missing")
    }

    pub async fn wait_for_status(&self, run_id: &str, status: RunStatus) -> Run {
        let core = self.core.clone();
        let id = run_id.to_string();
        let reached = wait_until(|| {
            let core = core.clone();
            let id = id.clone();
            async move {
                matches!(core.get_run(&id).await, Ok(Some(run)) if run.status == status)
            }
        })
        .await;
        let run = self.run(run_id).await;
        assert!(
            reached,
            "run {run_id} did not reach {status}, still {}",
            run.status
        );
        run
    }

    /// Wait until the run has a remote job and return its id.
    pub async fn wait_for_job(&self, run_id: &str) -> String {
        let core = self.core.clone();
        let id = run_id.to_string();
        let bound = wait_until(|| {
            let core = core.clone();
            let id = id.clone();
            async move {
                matches!(core.get_run(&id).await, Ok(Some(run)) if run.job_id.is_some())
            }
        })
        .await;
        assert!(bound, "run {run_id} was never submitted");
        self.run(run_id).await.job_id.expect("job id")
    }

    /// Wait until no executor holds a run.
    pub async fn wait_for_idle_pool(&self) {
        let core = self.core.clone();
        let idle = wait_until(|| {
            let core = core.clone();
            async move {
                core.job_controller()
                    .executors()
                    .await
                    .iter()
                    .all(|slot| !slot.busy)
            }
        })
        .await;
        assert!(idle, "executors still busy");
    }
}

/// Core with test timings over the given parts.
pub fn fast_core(
    executors: usize,
    repo: Arc<dyn RunRepository>,
    backend: Arc<MockBackend>,
    catalog: Arc<dyn ModelCatalog>,
    bus: NotificationBus,
) -> Arc<Core> {
    Core::new(
        repo,
        backend,
        catalog,
        bus,
        CoreConfig {
            max_concurrent: executors,
            executor: ExecutorConfig {
                check_interval: Duration::from_millis(10),
                ramp_up: Duration::ZERO,
                monitor_poll_interval: Duration::from_millis(10),
            },
            resume_poll_interval: Duration::from_millis(10),
        },
    )
}

pub fn new_run() -> Run {
    Run::new(MODEL_ID, TEMPLATE_ID, DATA_SET_ID)
        .with_parameter("horizon", 14)
        .with_label("integration")
}

/// Poll `check` every few milliseconds until it holds or [`WAIT_TIMEOUT`] passes.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check().await
}
