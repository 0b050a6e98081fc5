// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Polling worker that carries one run at a time to the backend.
//!
//! Each [`JobExecutor`] runs on its own task. When idle it claims the next
//! run from the [`Core`], then either attaches to a job that survived a
//! restart or submits a new job, and follows the job with a monitor until it
//! ends.
//!
//! The executor's slot lock is never held across a backend call or a
//! callback into the core. It is held while a run is claimed, so the run
//! leaves the queue and becomes visibly bound to this executor in one step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use suro_store::{Attachment, JobStatus, Run, RunStatus};
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, BackendError, JobInfo};
use crate::catalog::ModelCatalog;
use crate::core::Core;
use crate::error::{Error, Result};
use crate::log_entry;
use crate::monitor::{JobListener, JobMonitor, MonitorEvent, MonitorHandle, MonitorKind};
use crate::notify::{NotificationBus, log_topic};
use crate::request;

/// Run attachment holding the downloaded solution.
pub const SOLUTION_ATTACHMENT: &str = "solution.json";
/// Run attachment holding the solver log.
pub const LOG_ATTACHMENT: &str = "execution.log";
/// Backend attachment the solution is read from.
const BACKEND_SOLUTION: &str = "solution";
/// Backend detail key carrying the current relative gap.
const PROGRESS_GAP: &str = "PROGRESS_GAP";

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Sleep between poll iterations
    pub check_interval: Duration,
    /// One-time delay before the first poll
    pub ramp_up: Duration,
    /// Sleep between remote job status polls
    pub monitor_poll_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            ramp_up: Duration::from_secs(10),
            monitor_poll_interval: Duration::from_secs(2),
        }
    }
}

/// Result of asking an executor to abort its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    /// No executor holds the run.
    NotBound,
    /// The run had no remote job yet; it was released without submitting.
    Local,
    /// The backend accepted the abort (or no longer knows the job).
    Remote,
    /// The backend could not be reached.
    Failed,
}

impl AbortOutcome {
    /// Everything except a communication failure counts as success.
    pub fn succeeded(&self) -> bool {
        !matches!(self, AbortOutcome::Failed)
    }
}

#[derive(Debug)]
struct Slot {
    busy: bool,
    run_id: Option<String>,
    job_id: Option<String>,
    monitor: Option<MonitorHandle>,
    prevent_execution: bool,
}

impl Slot {
    fn clear(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.cancel();
        }
        self.busy = false;
        self.run_id = None;
        self.job_id = None;
    }

    fn holds(&self, run_id: &str) -> bool {
        self.run_id.as_deref() == Some(run_id)
    }
}

/// Point-in-time view of an executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotSnapshot {
    pub index: usize,
    pub busy: bool,
    pub run_id: Option<String>,
    pub job_id: Option<String>,
}

/// Outputs downloaded from a finished job.
#[derive(Debug, Default)]
struct CollectedResults {
    log: Option<Vec<u8>>,
    solution: Option<Vec<u8>>,
    final_gap: Option<f64>,
    solve_status: String,
}

/// One worker of the pool.
pub struct JobExecutor {
    index: usize,
    core: Weak<Core>,
    backend: Arc<dyn Backend>,
    catalog: Arc<dyn ModelCatalog>,
    bus: NotificationBus,
    config: ExecutorConfig,
    slot: Mutex<Slot>,
    active: AtomicBool,
    wake: Notify,
    this: Weak<JobExecutor>,
}

impl JobExecutor {
    pub fn new(
        index: usize,
        core: Weak<Core>,
        backend: Arc<dyn Backend>,
        catalog: Arc<dyn ModelCatalog>,
        bus: NotificationBus,
        config: ExecutorConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            index,
            core,
            backend,
            catalog,
            bus,
            config,
            slot: Mutex::new(Slot {
                busy: false,
                run_id: None,
                job_id: None,
                monitor: None,
                prevent_execution: false,
            }),
            active: AtomicBool::new(true),
            wake: Notify::new(),
            this: this.clone(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> SlotSnapshot {
        let slot = self.slot.lock().await;
        SlotSnapshot {
            index: self.index,
            busy: slot.busy,
            run_id: slot.run_id.clone(),
            job_id: slot.job_id.clone(),
        }
    }

    /// Whether this executor currently holds `run_id`.
    pub async fn holds(&self, run_id: &str) -> bool {
        self.slot.lock().await.holds(run_id)
    }

    /// Whether this executor is following `job_id`.
    pub async fn follows_job(&self, job_id: &str) -> bool {
        self.slot.lock().await.job_id.as_deref() == Some(job_id)
    }

    /// Poll loop. Returns after [`quit`](Self::quit).
    pub async fn run(self: Arc<Self>) {
        info!(executor = self.index, "Executor started");

        tokio::select! {
            _ = self.wake.notified() => {}
            _ = tokio::time::sleep(self.config.ramp_up) => {}
        }

        while self.is_active() {
            if let Err(e) = self.poll_once().await {
                error!(executor = self.index, error = %e, "Executor iteration failed");
            }

            if !self.is_active() {
                break;
            }
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.check_interval) => {}
            }
        }

        info!(executor = self.index, "Executor stopped");
    }

    /// One iteration: claim a run if idle and start it.
    pub async fn poll_once(&self) -> Result<()> {
        let Some(core) = self.core.upgrade() else {
            self.active.store(false, Ordering::SeqCst);
            return Ok(());
        };

        let run = {
            let mut slot = self.slot.lock().await;
            if slot.busy {
                return Ok(());
            }
            let Some(run) = core.get_next_run().await? else {
                return Ok(());
            };
            slot.busy = true;
            slot.run_id = Some(run.id.clone());
            slot.job_id = run.job_id.clone();
            slot.prevent_execution = false;
            run
        };

        debug!(executor = self.index, run_id = %run.id, status = %run.status, "Claimed run");
        let run_id = run.id.clone();
        if let Err(e) = self.start(&core, run).await {
            error!(executor = self.index, run_id = %run_id, error = %e, "Run could not be started");
            self.abandon(&core, &run_id).await;
        }
        Ok(())
    }

    /// Fail a claimed run whose start errored and release the slot.
    async fn abandon(&self, core: &Arc<Core>, run_id: &str) {
        let unfollowed_job = {
            let slot = self.slot.lock().await;
            if !slot.holds(run_id) {
                return;
            }
            if slot.monitor.is_none() {
                slot.job_id.clone()
            } else {
                None
            }
        };
        if let Some(job_id) = unfollowed_job {
            self.discard_job(&job_id).await;
        }

        if let Err(e) = self.run_failed(core, run_id).await {
            error!(run_id = %run_id, error = %e, "Failed to fail run");
        }
        if let Err(e) = self.settle_abort(core, run_id).await {
            error!(run_id = %run_id, error = %e, "Failed to settle aborted run");
        }
        self.finish().await;
    }

    async fn start(&self, core: &Arc<Core>, run: Run) -> Result<()> {
        if run.status == RunStatus::Aborting
            || run.status == RunStatus::Invalid
            || run.status.is_terminal()
        {
            debug!(run_id = %run.id, status = %run.status, "Claimed run needs no execution");
            self.finish().await;
            return Ok(());
        }

        if run.status == RunStatus::Resume
            && let Some(job_id) = run.job_id.clone()
        {
            match self.backend.job_exists(&job_id).await {
                Ok(true) => {
                    info!(run_id = %run.id, job_id = %job_id, "Resuming existing job");
                    self.follow(&run.id, job_id, MonitorKind::Resumed).await;
                    return Ok(());
                }
                Ok(false) => {
                    info!(run_id = %run.id, job_id = %job_id, "Previous job is gone, resubmitting");
                }
                Err(e) => {
                    warn!(run_id = %run.id, job_id = %job_id, error = %e, "Could not check previous job, resubmitting");
                }
            }
        }

        {
            // The previous job is gone; until the new one exists an abort must stay local.
            let mut slot = self.slot.lock().await;
            if !slot.holds(&run.id) {
                return Ok(());
            }
            slot.job_id = None;
        }
        self.submit(core, run).await
    }

    /// Bind a monitor for `job_id` unless the run was released meanwhile.
    async fn follow(&self, run_id: &str, job_id: String, kind: MonitorKind) {
        let Some(listener) = self.this.upgrade() else {
            return;
        };
        let mut slot = self.slot.lock().await;
        if !slot.holds(run_id) {
            debug!(run_id = %run_id, "Run released before monitoring started");
            return;
        }
        let monitor = JobMonitor::new(
            kind,
            job_id.clone(),
            Arc::clone(&self.backend),
            self.config.monitor_poll_interval,
        );
        slot.job_id = Some(job_id);
        slot.monitor = Some(monitor.spawn(listener));
    }

    async fn submit(&self, core: &Arc<Core>, run: Run) -> Result<()> {
        let rc = core.run_controller();

        let inputs = async {
            let model = self.catalog.model_script(&run.model_id).await?;
            let data_set = self.catalog.data_set(&run.data_set_id).await?;
            Ok::<_, Error>((model, data_set))
        }
        .await;
        let (model, data_set) = match inputs {
            Ok(found) => found,
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "Model or data set unreadable");
                (None, None)
            }
        };
        let (Some(model), Some(data_set)) = (model, data_set) else {
            warn!(
                run_id = %run.id,
                model_id = %run.model_id,
                data_set_id = %run.data_set_id,
                "Model or data set unavailable, run is invalid"
            );
            {
                let mut guard = rc.lock().await;
                if let Some(mut current) = guard.get_run(&run.id).await? {
                    guard.set_run_status(&mut current, RunStatus::Invalid).await?;
                }
            }
            self.finish().await;
            return Ok(());
        };

        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let job_request = request::build_request(&run, &model, &data_set, Some(log_tx));

        {
            let slot = self.slot.lock().await;
            if slot.prevent_execution || !slot.holds(&run.id) {
                debug!(run_id = %run.id, "Run aborted before submission");
                return Ok(());
            }
        }
        let aborting = rc
            .get_run(&run.id)
            .await?
            .is_none_or(|current| current.status == RunStatus::Aborting);
        if aborting {
            debug!(run_id = %run.id, "Run aborted while preparing submission");
            self.settle_abort(core, &run.id).await?;
            self.finish().await;
            return Ok(());
        }

        self.forward_live_log(run.id.clone(), log_rx);

        match self.backend.submit(job_request).await {
            Ok(job_id) => self.submitted(core, &run.id, job_id).await,
            Err(BackendError::JobLimit(msg)) => {
                warn!(run_id = %run.id, reason = %msg, "Backend job limit reached, aborting run");
                core.abort_run(&run.id).await?;
                Ok(())
            }
            Err(e) => {
                error!(run_id = %run.id, error = %e, "Job submission failed");
                {
                    let mut guard = rc.lock().await;
                    if let Some(mut current) = guard.get_run(&run.id).await? {
                        guard.set_run_status(&mut current, RunStatus::Failed).await?;
                        guard.set_job_status(&mut current, JobStatus::Failed).await?;
                    }
                }
                self.finish().await;
                Ok(())
            }
        }
    }

    async fn submitted(&self, core: &Arc<Core>, run_id: &str, job_id: String) -> Result<()> {
        let Some(listener) = self.this.upgrade() else {
            return Ok(());
        };

        let mut slot = self.slot.lock().await;
        if slot.prevent_execution || !slot.holds(run_id) {
            drop(slot);
            warn!(run_id = %run_id, job_id = %job_id, "Run aborted during submission, discarding job");
            self.discard_job(&job_id).await;
            return Ok(());
        }

        slot.job_id = Some(job_id.clone());
        {
            let mut guard = core.run_controller().lock().await;
            if let Some(mut current) = guard.get_run(run_id).await? {
                current.job_id = Some(job_id.clone());
                guard.update_run(&current).await?;
                guard
                    .set_run_status(&mut current, RunStatus::Processing)
                    .await?;
            }
        }

        info!(run_id = %run_id, job_id = %job_id, "Job submitted");
        let monitor = JobMonitor::new(
            MonitorKind::Submitted,
            job_id,
            Arc::clone(&self.backend),
            self.config.monitor_poll_interval,
        );
        slot.monitor = Some(monitor.spawn(listener));
        Ok(())
    }

    /// Abort and delete a remote job nobody will follow.
    async fn discard_job(&self, job_id: &str) {
        if let Err(e) = self.backend.abort_job(job_id).await
            && !e.is_not_found()
        {
            warn!(job_id = %job_id, error = %e, "Failed to abort discarded job");
        }
        self.delete_remote(job_id).await;
    }

    async fn delete_remote(&self, job_id: &str) {
        match self.backend.delete_job(job_id).await {
            Ok(()) => debug!(job_id = %job_id, "Deleted remote job"),
            Err(e) if e.is_not_found() => debug!(job_id = %job_id, "Remote job already gone"),
            Err(e) => warn!(job_id = %job_id, error = %e, "Failed to delete remote job"),
        }
    }

    /// Publish parsed solver log lines on `optim:log:<run_id>` until the
    /// backend drops the sender.
    fn forward_live_log(&self, run_id: String, mut lines: mpsc::UnboundedReceiver<String>) {
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let topic = log_topic(&run_id);
            while let Some(line) = lines.recv().await {
                if let Some(entry) = log_entry::parse_line(&line) {
                    bus.publish_json(topic.as_str(), &entry);
                }
            }
        });
    }

    /// Ask this executor to abort its run.
    ///
    /// Without a remote job the run is released before it can be submitted.
    /// With one, the backend is asked to stop it and the monitor reports the
    /// outcome.
    pub async fn abort(&self) -> AbortOutcome {
        let job_id = {
            let mut slot = self.slot.lock().await;
            match slot.job_id.clone() {
                Some(job_id) => job_id,
                None => {
                    slot.prevent_execution = true;
                    slot.clear();
                    return AbortOutcome::Local;
                }
            }
        };

        match self.backend.abort_job(&job_id).await {
            Ok(()) => AbortOutcome::Remote,
            Err(e) if e.is_not_found() => {
                debug!(job_id = %job_id, "Aborted job no longer exists");
                AbortOutcome::Remote
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to abort job");
                AbortOutcome::Failed
            }
        }
    }

    /// Release the current run and stop its monitor.
    pub async fn finish(&self) {
        self.slot.lock().await.clear();
    }

    /// Stop the poll loop after the current iteration. Does not wait.
    pub async fn quit(&self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(monitor) = self.slot.lock().await.monitor.take() {
            monitor.cancel();
        }
        self.wake.notify_one();
    }

    /// Finish a run whose job ended: store results, settle its status,
    /// delete the job and hand the run back to the core.
    async fn job_ended(&self, core: &Arc<Core>, run_id: &str, job_id: &str, event: MonitorEvent) {
        let outcome = match event {
            MonitorEvent::Completed(info) => self.job_completed(core, run_id, job_id, info).await,
            MonitorEvent::Failed(_) => self.run_failed(core, run_id).await,
            MonitorEvent::Interrupted => match self.run_aborted(core, run_id).await {
                Ok(()) => self.run_failed(core, run_id).await,
                Err(e) => Err(e),
            },
            MonitorEvent::Running => Ok(()),
        };
        if let Err(e) = outcome {
            error!(run_id = %run_id, job_id = %job_id, error = %e, "Failed to record job outcome");
        }

        // A completion or failure racing an abort still ends the abort.
        if let Err(e) = self.settle_abort(core, run_id).await {
            error!(run_id = %run_id, error = %e, "Failed to settle aborted run");
        }

        self.delete_remote(job_id).await;

        if let Err(e) = core.complete_run(run_id).await {
            error!(run_id = %run_id, error = %e, "Failed to complete run");
        }
    }

    async fn job_running(&self, core: &Arc<Core>, run_id: &str) -> Result<()> {
        let mut guard = core.run_controller().lock().await;
        let Some(mut run) = guard.get_run(run_id).await? else {
            return Ok(());
        };
        if run.status == RunStatus::Aborting {
            return Ok(());
        }
        guard.set_job_status(&mut run, JobStatus::Running).await?;
        guard.set_run_status(&mut run, RunStatus::Processing).await?;
        Ok(())
    }

    async fn job_completed(
        &self,
        core: &Arc<Core>,
        run_id: &str,
        job_id: &str,
        info: JobInfo,
    ) -> Result<()> {
        let rc = core.run_controller();
        {
            let mut guard = rc.lock().await;
            let Some(mut run) = guard.get_run(run_id).await? else {
                return Ok(());
            };
            if run.status == RunStatus::Aborting {
                return Ok(());
            }
            if !guard
                .set_run_status(&mut run, RunStatus::CollectingResults)
                .await?
            {
                return Ok(());
            }
        }

        let results = self.collect_results(job_id, &info).await;

        let mut guard = rc.lock().await;
        let Some(mut run) = guard.get_run(run_id).await? else {
            return Ok(());
        };
        if let Some(log) = results.log {
            guard
                .attach(run_id, Attachment::new(LOG_ATTACHMENT, "text/plain", log))
                .await?;
        }
        if let Some(solution) = results.solution {
            guard
                .attach(
                    run_id,
                    Attachment::new(SOLUTION_ATTACHMENT, "application/json", solution),
                )
                .await?;
        }
        run.final_gap = results.final_gap;
        run.solve_status = Some(results.solve_status);
        guard.update_run(&run).await?;

        // run_completed
        if run.status == RunStatus::CollectingResults {
            guard.set_run_status(&mut run, RunStatus::Completed).await?;
            guard.set_job_status(&mut run, JobStatus::Completed).await?;
        }
        Ok(())
    }

    /// Download the log and the solution of a finished job.
    async fn collect_results(&self, job_id: &str, info: &JobInfo) -> CollectedResults {
        let mut results = CollectedResults {
            solve_status: "UNKNOWN".to_string(),
            ..Default::default()
        };

        match self.backend.download_log(job_id).await {
            Ok(log) => results.log = Some(log),
            Err(e) => warn!(job_id = %job_id, error = %e, "Failed to download job log"),
        }

        let solution = match self.backend.download_attachment(job_id, BACKEND_SOLUTION).await {
            Ok(solution) => solution,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "No solution available");
                return results;
            }
        };

        let parsed: Option<serde_json::Value> = match serde_json::from_slice(&solution) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Solution is not valid JSON");
                None
            }
        };

        results.final_gap = info
            .details
            .get(PROGRESS_GAP)
            .and_then(|gap| gap.trim().parse::<f64>().ok())
            .or_else(|| parsed.as_ref().and_then(final_gap_of));
        if let Some(status) = &info.solve_status {
            results.solve_status = status.clone();
        }
        results.solution = Some(solution);
        results
    }

    /// `ABORTING` → `ABORTED` with job status `INTERRUPT`.
    async fn run_aborted(&self, core: &Arc<Core>, run_id: &str) -> Result<()> {
        let mut guard = core.run_controller().lock().await;
        let Some(mut run) = guard.get_run(run_id).await? else {
            return Ok(());
        };
        if run.status == RunStatus::Aborting {
            guard.set_run_status(&mut run, RunStatus::Aborted).await?;
            guard.set_job_status(&mut run, JobStatus::Interrupt).await?;
        }
        Ok(())
    }

    /// `FAILED` with job status `FAILED`, unless the run already ended.
    async fn run_failed(&self, core: &Arc<Core>, run_id: &str) -> Result<()> {
        let mut guard = core.run_controller().lock().await;
        let Some(mut run) = guard.get_run(run_id).await? else {
            return Ok(());
        };
        if matches!(run.status, RunStatus::Aborted | RunStatus::Completed) {
            return Ok(());
        }
        if guard.set_run_status(&mut run, RunStatus::Failed).await? {
            guard.set_job_status(&mut run, JobStatus::Failed).await?;
        }
        Ok(())
    }

    async fn settle_abort(&self, core: &Arc<Core>, run_id: &str) -> Result<()> {
        let mut guard = core.run_controller().lock().await;
        if let Some(mut run) = guard.get_run(run_id).await?
            && run.status == RunStatus::Aborting
        {
            guard.finalize_aborted(&mut run).await?;
        }
        Ok(())
    }
}

/// `finalGap.value` of a solution document, as a number or numeric string.
fn final_gap_of(solution: &serde_json::Value) -> Option<f64> {
    let value = solution.get("finalGap")?.get("value")?;
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

#[async_trait]
impl JobListener for JobExecutor {
    async fn on_job_event(&self, job_id: &str, event: MonitorEvent) {
        let Some(core) = self.core.upgrade() else {
            return;
        };

        let run_id = {
            let slot = self.slot.lock().await;
            if slot.job_id.as_deref() != Some(job_id) {
                debug!(executor = self.index, job_id = %job_id, "Ignoring event from a released job");
                return;
            }
            slot.run_id.clone()
        };
        let Some(run_id) = run_id else {
            return;
        };

        let run = match core.run_controller().get_run(&run_id).await {
            Ok(run) => run,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Failed to load run for job event");
                return;
            }
        };
        let current = run.as_ref().and_then(|r| r.job_id.as_deref()) == Some(job_id);
        let terminal = !matches!(event, MonitorEvent::Running);

        if !current {
            debug!(run_id = %run_id, job_id = %job_id, "Ignoring event for a job the run no longer owns");
            if terminal {
                self.finish().await;
            }
            return;
        }

        if terminal {
            self.job_ended(&core, &run_id, job_id, event).await;
        } else if let Err(e) = self.job_running(&core, &run_id).await {
            error!(run_id = %run_id, error = %e, "Failed to record running job");
        }
    }
}
