// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker pool.
//!
//! The [`JobController`] owns a fixed set of [`JobExecutor`]s, reconciles
//! the backend with local runs on start, and routes abort/complete requests
//! to the executor holding a run.

use std::sync::{Arc, Mutex, Weak};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::catalog::ModelCatalog;
use crate::core::Core;
use crate::error::Result;
use crate::executor::{AbortOutcome, ExecutorConfig, JobExecutor, SlotSnapshot};
use crate::notify::NotificationBus;
use crate::run_controller::RunController;

/// Manages the executor pool.
pub struct JobController {
    run_controller: Arc<RunController>,
    backend: Arc<dyn Backend>,
    executors: Vec<Arc<JobExecutor>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobController {
    pub fn new(
        core: Weak<Core>,
        run_controller: Arc<RunController>,
        backend: Arc<dyn Backend>,
        catalog: Arc<dyn ModelCatalog>,
        bus: NotificationBus,
        max_concurrent: usize,
        config: ExecutorConfig,
    ) -> Self {
        let executors = (0..max_concurrent.max(1))
            .map(|index| {
                JobExecutor::new(
                    index,
                    core.clone(),
                    Arc::clone(&backend),
                    Arc::clone(&catalog),
                    bus.clone(),
                    config.clone(),
                )
            })
            .collect();

        Self {
            run_controller,
            backend,
            executors,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Remove orphaned remote jobs, then start every executor on its own task.
    pub async fn start(&self) {
        info!(
            backend = self.backend.backend_type(),
            executors = self.executors.len(),
            "Starting job controller"
        );

        match self.cleanup_jobs().await {
            Ok(0) => debug!("No orphaned jobs"),
            Ok(n) => info!(deleted = n, "Removed orphaned jobs"),
            Err(e) => warn!(error = %e, "Orphaned job cleanup failed"),
        }

        let mut handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        for executor in &self.executors {
            handles.push(tokio::spawn(Arc::clone(executor).run()));
        }
    }

    async fn bound_to(&self, run_id: &str) -> Option<&Arc<JobExecutor>> {
        for executor in &self.executors {
            if executor.holds(run_id).await {
                return Some(executor);
            }
        }
        None
    }

    /// Release the executor holding `run_id`, if any.
    pub async fn complete_job(&self, run_id: &str) {
        if let Some(executor) = self.bound_to(run_id).await {
            debug!(run_id = %run_id, executor = executor.index(), "Releasing executor");
            executor.finish().await;
        }
    }

    /// Abort the run held by an executor.
    pub async fn abort_job(&self, run_id: &str) -> AbortOutcome {
        match self.bound_to(run_id).await {
            Some(executor) => executor.abort().await,
            None => {
                debug!(run_id = %run_id, "No executor holds run");
                AbortOutcome::NotBound
            }
        }
    }

    /// Abort and delete every remote job that no local run or executor
    /// refers to. Returns the number of deleted jobs.
    pub async fn cleanup_jobs(&self) -> Result<usize> {
        let jobs = self.backend.list_jobs().await?;
        let mut deleted = 0;

        'jobs: for job in jobs {
            if self.run_controller.get_run_by_job_id(&job.id).await?.is_some() {
                continue;
            }
            for executor in &self.executors {
                if executor.follows_job(&job.id).await {
                    continue 'jobs;
                }
            }

            info!(job_id = %job.id, status = %job.execution_status, "Removing orphaned job");
            if !job.execution_status.is_terminal()
                && let Err(e) = self.backend.abort_job(&job.id).await
                && !e.is_not_found()
            {
                warn!(job_id = %job.id, error = %e, "Failed to abort orphaned job");
            }
            if self.delete_job(&job.id).await {
                deleted += 1;
            }
        }

        Ok(deleted)
    }

    /// Best-effort remote delete. Returns whether the job was deleted.
    pub async fn delete_job(&self, job_id: &str) -> bool {
        match self.backend.delete_job(job_id).await {
            Ok(()) => true,
            Err(e) if e.is_not_found() => {
                debug!(job_id = %job_id, "Job to delete does not exist");
                false
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to delete job");
                false
            }
        }
    }

    pub async fn executors(&self) -> Vec<SlotSnapshot> {
        let mut snapshots = Vec::with_capacity(self.executors.len());
        for executor in &self.executors {
            snapshots.push(executor.snapshot().await);
        }
        snapshots
    }

    pub fn pool_size(&self) -> usize {
        self.executors.len()
    }

    /// Stop every executor and wait for their tasks.
    pub async fn shutdown(&self) {
        for executor in &self.executors {
            executor.quit().await;
        }

        let handles: Vec<_> = {
            let mut handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
            handles.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await
                && e.is_panic()
            {
                error!("Executor task panicked: {:?}", e);
            }
        }
        info!("Job controller stopped");
    }
}
