// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dispatch orchestrator.
//!
//! [`Core`] is the entry point for every run lifecycle operation. Nothing is
//! accepted until the core is marked ready. Completions reported before that
//! are buffered and replayed in arrival order by [`Core::set_ready`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use suro_store::{Run, RunRepository, RunStatus};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::catalog::ModelCatalog;
use crate::config::{Config, DEFAULT_MAX_CONCURRENT};
use crate::error::Result;
use crate::executor::{AbortOutcome, ExecutorConfig};
use crate::job_controller::JobController;
use crate::notify::NotificationBus;
use crate::run_controller::RunController;

/// Core configuration.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Number of executors
    pub max_concurrent: usize,
    /// Executor timing
    pub executor: ExecutorConfig,
    /// Sleep between readiness checks while waiting to resume runs
    pub resume_poll_interval: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            executor: ExecutorConfig::default(),
            resume_poll_interval: Duration::from_secs(2),
        }
    }
}

impl From<&Config> for CoreConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_concurrent: config.max_concurrent,
            executor: ExecutorConfig {
                check_interval: config.check_interval,
                ramp_up: config.ramp_up,
                monitor_poll_interval: config.monitor_poll_interval,
            },
            resume_poll_interval: config.resume_poll_interval,
        }
    }
}

/// Dispatch orchestrator.
pub struct Core {
    ready: AtomicBool,
    pending: Mutex<VecDeque<String>>,
    run_controller: Arc<RunController>,
    job_controller: JobController,
    bus: NotificationBus,
    resume_task: Mutex<Option<JoinHandle<()>>>,
}

impl Core {
    pub fn new(
        repo: Arc<dyn RunRepository>,
        backend: Arc<dyn Backend>,
        catalog: Arc<dyn ModelCatalog>,
        bus: NotificationBus,
        config: CoreConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|core: &Weak<Core>| {
            let run_controller = Arc::new(RunController::new(
                repo,
                bus.clone(),
                config.resume_poll_interval,
            ));
            let job_controller = JobController::new(
                core.clone(),
                Arc::clone(&run_controller),
                backend,
                catalog,
                bus.clone(),
                config.max_concurrent,
                config.executor,
            );
            Self {
                ready: AtomicBool::new(false),
                pending: Mutex::new(VecDeque::new()),
                run_controller,
                job_controller,
                bus,
                resume_task: Mutex::new(None),
            }
        })
    }

    pub fn run_controller(&self) -> &Arc<RunController> {
        &self.run_controller
    }

    pub fn job_controller(&self) -> &JobController {
        &self.job_controller
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Start the worker pool, schedule run recovery and open for business.
    pub async fn start(self: &Arc<Self>) {
        self.job_controller.start().await;

        match self.run_controller.resume_runs(Arc::downgrade(self)).await {
            Ok(Some(handle)) => *self.resume_task.lock().await = Some(handle),
            Ok(None) => {}
            Err(e) => error!(error = %e, "Failed to schedule run recovery"),
        }

        self.set_ready(true).await;
        info!("Dispatch core ready");
    }

    /// Close for business and stop the worker pool.
    pub async fn shutdown(&self) {
        self.set_ready(false).await;
        self.job_controller.shutdown().await;
        if let Some(handle) = self.resume_task.lock().await.take() {
            handle.abort();
        }
        info!("Dispatch core stopped");
    }

    /// Flip readiness. Becoming ready replays buffered completions in
    /// arrival order.
    pub async fn set_ready(&self, ready: bool) {
        let mut pending = self.pending.lock().await;
        self.ready.store(ready, Ordering::SeqCst);
        if !ready {
            return;
        }

        if !pending.is_empty() {
            info!(count = pending.len(), "Replaying buffered completions");
        }
        while let Some(run_id) = pending.pop_front() {
            if let Err(e) = self.complete_now(&run_id).await {
                error!(run_id = %run_id, error = %e, "Failed to replay completion");
            }
        }
    }

    /// Persist and enqueue a new run.
    ///
    /// Returns the stored run, or `None` when the core is not ready.
    pub async fn submit_run(&self, mut run: Run) -> Result<Option<Run>> {
        if !self.is_ready() {
            debug!("Rejecting run submission, core not ready");
            return Ok(None);
        }

        run.status = RunStatus::Queued;
        run.job_id = None;
        run.job_status = None;
        run.final_gap = None;
        run.solve_status = None;

        let mut guard = self.run_controller.lock().await;
        let mut run = guard.create_run(run).await?;
        if self.run_controller.add_run(run.clone()) {
            guard.set_run_status(&mut run, RunStatus::Queued).await?;
            info!(run_id = %run.id, model_id = %run.model_id, "Run queued");
        } else {
            error!(run_id = %run.id, "Run is already queued");
        }
        Ok(Some(run))
    }

    /// Report that the job of a run ended. Buffered while not ready.
    pub async fn complete_run(&self, run_id: &str) -> Result<()> {
        let mut pending = self.pending.lock().await;
        if !self.is_ready() {
            debug!(run_id = %run_id, "Buffering completion, core not ready");
            pending.push_back(run_id.to_string());
            return Ok(());
        }
        self.complete_now(run_id).await
    }

    async fn complete_now(&self, run_id: &str) -> Result<()> {
        self.job_controller.complete_job(run_id).await;
        self.run_controller.complete_run(run_id).await
    }

    /// Abort a run.
    ///
    /// A queued run is aborted locally. A claimed run is aborted on the
    /// backend; when the backend cannot be reached the run is still
    /// finalized `ABORTED` locally. Returns `false` when the core is not
    /// ready or the run is unknown.
    pub async fn abort_run(&self, run_id: &str) -> Result<bool> {
        if !self.is_ready() {
            debug!(run_id = %run_id, "Rejecting abort, core not ready");
            return Ok(false);
        }

        {
            let mut guard = self.run_controller.lock().await;
            let Some(mut run) = guard.get_run(run_id).await? else {
                debug!(run_id = %run_id, "Cannot abort unknown run");
                return Ok(false);
            };
            if run.is_finished() || run.status == RunStatus::Invalid {
                return Ok(true);
            }

            guard.set_run_status(&mut run, RunStatus::Aborting).await?;
            if guard.abort_run(run_id).await? {
                info!(run_id = %run_id, "Aborted queued run");
                return Ok(true);
            }
        }

        match self.job_controller.abort_job(run_id).await {
            AbortOutcome::Remote => {
                info!(run_id = %run_id, "Abort sent to backend");
            }
            AbortOutcome::Local | AbortOutcome::NotBound => {
                self.finalize_aborted(run_id).await?;
                info!(run_id = %run_id, "Aborted run before submission");
            }
            AbortOutcome::Failed => {
                warn!(run_id = %run_id, "Backend abort failed, aborting locally");
                if let Err(e) = self.job_controller.cleanup_jobs().await {
                    warn!(error = %e, "Cleanup after failed abort did not complete");
                }
                self.job_controller.complete_job(run_id).await;
                self.finalize_aborted(run_id).await?;
            }
        }
        Ok(true)
    }

    async fn finalize_aborted(&self, run_id: &str) -> Result<()> {
        let mut guard = self.run_controller.lock().await;
        if let Some(mut run) = guard.get_run(run_id).await?
            && run.status == RunStatus::Aborting
        {
            guard.finalize_aborted(&mut run).await?;
        }
        Ok(())
    }

    /// Pop the next queued run, reloaded from the repository.
    pub async fn get_next_run(&self) -> Result<Option<Run>> {
        if !self.is_ready() {
            return Ok(None);
        }
        self.run_controller.lock().await.pop_next().await
    }

    /// Abort a run, then delete it with its remote job.
    ///
    /// Nothing is deleted if the abort fails.
    pub async fn delete_run(&self, run_id: &str) -> Result<bool> {
        if !self.abort_run(run_id).await? {
            warn!(run_id = %run_id, "Run not deleted, abort failed");
            return Ok(false);
        }

        self.job_controller.complete_job(run_id).await;
        let job_id = self
            .run_controller
            .get_run(run_id)
            .await?
            .and_then(|run| run.job_id);
        if let Some(job_id) = job_id {
            self.job_controller.delete_job(&job_id).await;
        }

        let deleted = self.run_controller.delete_run(run_id).await?;
        if deleted {
            info!(run_id = %run_id, "Run deleted");
        }
        Ok(deleted)
    }

    /// Stop the current job of a run, if any, and queue the run again.
    pub async fn restart_run(&self, run_id: &str) -> Result<bool> {
        if !self.is_ready() {
            debug!(run_id = %run_id, "Rejecting restart, core not ready");
            return Ok(false);
        }
        if self.run_controller.is_queued(run_id) {
            return Ok(true);
        }
        let Some(run) = self.run_controller.get_run(run_id).await? else {
            return Ok(false);
        };
        if !run.status.can_transition_to(RunStatus::Queued) {
            warn!(run_id = %run_id, status = %run.status, "Run cannot be restarted");
            return Ok(false);
        }

        if self.job_controller.abort_job(run_id).await == AbortOutcome::Failed {
            warn!(run_id = %run_id, "Run not restarted, abort failed");
            return Ok(false);
        }
        self.job_controller.complete_job(run_id).await;
        if let Some(job_id) = &run.job_id {
            self.job_controller.delete_job(job_id).await;
        }

        let Some(run) = self.run_controller.reset_run(run_id).await? else {
            // An abort raced the restart; its worker and job are gone, so end it here.
            self.finalize_aborted(run_id).await?;
            return Ok(false);
        };
        self.run_controller.add_run(run);
        info!(run_id = %run_id, "Run restarted");
        Ok(true)
    }

    pub fn queue_snapshot(&self) -> Vec<Run> {
        self.run_controller.get_queue()
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        self.run_controller.get_run(run_id).await
    }
}
