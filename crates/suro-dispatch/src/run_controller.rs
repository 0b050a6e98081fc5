// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run queue and run state machine.
//!
//! [`RunController`] owns the dispatch queue and every status write. All
//! repository mutations go through a [`RunGuard`], which holds the
//! repository critical section for as long as it lives.
//!
//! Lock order: repository section, then queue. The queue lock is a plain
//! mutex and is never held across an `.await`.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use suro_store::{Attachment, JobStatus, Run, RunRepository, RunStatus};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::Core;
use crate::error::Result;
use crate::notify::{NotificationBus, job_topic};

/// Queue and state machine for runs.
pub struct RunController {
    repo: Arc<dyn RunRepository>,
    bus: NotificationBus,
    section: tokio::sync::Mutex<()>,
    queue: Mutex<VecDeque<Run>>,
    resume_poll_interval: Duration,
    resume_started: AtomicBool,
    /// Runs stored before the core opened, still awaiting reconciliation.
    resume_pending: Mutex<Option<HashSet<String>>>,
}

impl RunController {
    pub fn new(
        repo: Arc<dyn RunRepository>,
        bus: NotificationBus,
        resume_poll_interval: Duration,
    ) -> Self {
        Self {
            repo,
            bus,
            section: tokio::sync::Mutex::new(()),
            queue: Mutex::new(VecDeque::new()),
            resume_poll_interval,
            resume_started: AtomicBool::new(false),
            resume_pending: Mutex::new(None),
        }
    }

    /// Enter the repository critical section.
    pub async fn lock(&self) -> RunGuard<'_> {
        RunGuard {
            controller: self,
            _section: self.section.lock().await,
        }
    }

    fn resume_pending(&self) -> MutexGuard<'_, Option<HashSet<String>>> {
        self.resume_pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether `run_id` still needs reconciling. Consumes the entry.
    fn take_resume_candidate(&self, run_id: &str) -> bool {
        match self.resume_pending().as_mut() {
            Some(pending) => pending.remove(run_id),
            None => true,
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Run>> {
        // The queue holds plain data; a panic while holding it cannot leave it inconsistent.
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Persist a new run with a start time. See [`RunGuard::create_run`].
    pub async fn create_run(&self, run: Run) -> Result<Run> {
        self.lock().await.create_run(run).await
    }

    /// Enqueue a run unless one with the same id is already queued.
    ///
    /// A run enqueued this way is no longer reconciled by [`resume_now`](Self::resume_now).
    pub fn add_run(&self, run: Run) -> bool {
        if let Some(pending) = self.resume_pending().as_mut() {
            pending.remove(&run.id);
        }
        self.enqueue(run)
    }

    fn enqueue(&self, run: Run) -> bool {
        let mut queue = self.queue();
        if queue.iter().any(|r| r.id == run.id) {
            return false;
        }
        queue.push_back(run);
        true
    }

    /// Pop the head of the queue.
    pub fn get_next(&self) -> Option<Run> {
        self.queue().pop_front()
    }

    /// Whether a run is queued.
    pub fn is_queued(&self, run_id: &str) -> bool {
        self.queue().iter().any(|r| r.id == run_id)
    }

    fn remove_from_queue(&self, run_id: &str) -> bool {
        let mut queue = self.queue();
        let before = queue.len();
        queue.retain(|r| r.id != run_id);
        queue.len() != before
    }

    /// Snapshot of the queue in dispatch order.
    pub fn get_queue(&self) -> Vec<Run> {
        self.queue().iter().cloned().collect()
    }

    /// Read a run.
    pub async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        Ok(self.repo.get(run_id).await?)
    }

    /// Find the run bound to a remote job.
    pub async fn get_run_by_job_id(&self, job_id: &str) -> Result<Option<Run>> {
        Ok(self.repo.find_by_job_id(job_id).await?)
    }

    /// Read an attachment of a run.
    pub async fn get_attachment(&self, run_id: &str, name: &str) -> Result<Option<Attachment>> {
        Ok(self.repo.attachment(run_id, name).await?)
    }

    /// Abort a run that has not been claimed yet. See [`RunGuard::abort_run`].
    pub async fn abort_run(&self, run_id: &str) -> Result<bool> {
        self.lock().await.abort_run(run_id).await
    }

    /// Clear the job binding of a run and queue it again.
    ///
    /// Returns the re-queued run, or `None` if the run is missing or its
    /// current status cannot go back to `QUEUED`. The run is not enqueued here.
    pub async fn reset_run(&self, run_id: &str) -> Result<Option<Run>> {
        let mut guard = self.lock().await;
        let Some(mut run) = guard.get_run(run_id).await? else {
            return Ok(None);
        };
        if !run.status.can_transition_to(RunStatus::Queued) {
            warn!(run_id = %run_id, status = %run.status, "Run cannot be reset");
            return Ok(None);
        }

        run.job_id = None;
        run.job_status = None;
        run.final_gap = None;
        run.solve_status = None;
        guard.update_run(&run).await?;
        guard.set_run_status(&mut run, RunStatus::Queued).await?;
        Ok(Some(run))
    }

    /// Mark a run `COMPLETED` unless it already ended or is being aborted.
    pub async fn complete_run(&self, run_id: &str) -> Result<()> {
        let mut guard = self.lock().await;
        let Some(mut run) = guard.get_run(run_id).await? else {
            warn!(run_id = %run_id, "Cannot complete unknown run");
            return Ok(());
        };

        match run.status {
            RunStatus::Completed
            | RunStatus::Failed
            | RunStatus::Aborted
            | RunStatus::Aborting => {
                debug!(run_id = %run_id, status = %run.status, "Run keeps its final status");
            }
            _ => {
                guard.set_run_status(&mut run, RunStatus::Completed).await?;
            }
        }
        Ok(())
    }

    /// Remove a run from the queue and the repository.
    pub async fn delete_run(&self, run_id: &str) -> Result<bool> {
        let mut guard = self.lock().await;
        self.remove_from_queue(run_id);
        guard.remove_run(run_id).await
    }

    /// Remember the runs stored right now as the only ones
    /// [`resume_now`](Self::resume_now) reconciles. Must be called before
    /// the core opens, so runs submitted or claimed later are left alone.
    pub async fn prepare_resume(&self) -> Result<usize> {
        let _guard = self.lock().await;
        let stored: HashSet<String> = self.repo.all().await?.into_iter().map(|r| r.id).collect();
        let count = stored.len();
        *self.resume_pending() = Some(stored);
        Ok(count)
    }

    /// Re-queue interrupted runs once the core reports ready.
    ///
    /// Records the stored runs immediately, then spawns a task that polls
    /// readiness and performs the reconciliation once. Later calls are
    /// no-ops and return `None`.
    pub async fn resume_runs(self: &Arc<Self>, core: Weak<Core>) -> Result<Option<JoinHandle<()>>> {
        if self.resume_started.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        if let Err(e) = self.prepare_resume().await {
            self.resume_started.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let controller = Arc::clone(self);
        Ok(Some(tokio::spawn(async move {
            loop {
                let Some(core) = core.upgrade() else {
                    debug!("Core dropped before runs were resumed");
                    return;
                };
                if core.is_ready() {
                    break;
                }
                drop(core);
                tokio::time::sleep(controller.resume_poll_interval).await;
            }

            match controller.resume_now().await {
                Ok(count) => info!(resumed = count, "Resumed interrupted runs"),
                Err(e) => error!(error = %e, "Failed to resume runs"),
            }
        })))
    }

    /// Reconcile stored runs after a restart.
    ///
    /// `ABORTING` runs become `ABORTED` (job status `INTERRUPT` if they had
    /// one). Every other run that is neither terminal nor `INVALID` is
    /// re-queued as `RESUME`. After [`prepare_resume`](Self::prepare_resume)
    /// only the runs recorded there and not enqueued since are considered.
    /// Returns the number of re-queued runs.
    pub async fn resume_now(&self) -> Result<usize> {
        let mut guard = self.lock().await;
        let mut resumed = 0;

        for mut run in self.repo.all().await? {
            if !self.take_resume_candidate(&run.id) {
                continue;
            }
            match run.status {
                RunStatus::Aborting => {
                    guard.finalize_aborted(&mut run).await?;
                }
                status if status.is_terminal() || status == RunStatus::Invalid => {}
                _ => {
                    if self.enqueue(run.clone()) {
                        guard.set_run_status(&mut run, RunStatus::Resume).await?;
                        resumed += 1;
                    } else {
                        debug!(run_id = %run.id, "Run already queued, not resumed");
                    }
                }
            }
        }

        *self.resume_pending() = None;
        Ok(resumed)
    }
}

/// Holder of the repository critical section.
///
/// Every repository mutation is a method on this guard, so it cannot be
/// performed without holding the section.
pub struct RunGuard<'a> {
    controller: &'a RunController,
    _section: tokio::sync::MutexGuard<'a, ()>,
}

impl RunGuard<'_> {
    pub async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        Ok(self.controller.repo.get(run_id).await?)
    }

    /// Stamp the start time and persist a new run.
    pub async fn create_run(&mut self, mut run: Run) -> Result<Run> {
        run.start_time = Some(Utc::now());
        Ok(self.controller.repo.add(run).await?)
    }

    pub async fn update_run(&mut self, run: &Run) -> Result<()> {
        Ok(self.controller.repo.update(run).await?)
    }

    /// Write a new status, persist it and broadcast the run on `job:<id>`.
    ///
    /// Returns `false` (and writes nothing) when the transition is not allowed.
    pub async fn set_run_status(&mut self, run: &mut Run, status: RunStatus) -> Result<bool> {
        if !run.status.can_transition_to(status) {
            warn!(
                run_id = %run.id,
                from = %run.status,
                to = %status,
                "Rejected run status transition"
            );
            return Ok(false);
        }

        run.status = status;
        self.controller.repo.update(run).await?;
        self.controller.bus.publish_json(job_topic(&run.id), run);
        debug!(run_id = %run.id, status = %status, "Run status changed");
        Ok(true)
    }

    /// Write and persist the job status. Not broadcast.
    pub async fn set_job_status(&mut self, run: &mut Run, status: JobStatus) -> Result<()> {
        run.job_status = Some(status);
        self.controller.repo.update(run).await?;
        Ok(())
    }

    /// `ABORTED`, plus job status `INTERRUPT` when the run had a job status.
    pub async fn finalize_aborted(&mut self, run: &mut Run) -> Result<bool> {
        if !self.set_run_status(run, RunStatus::Aborted).await? {
            return Ok(false);
        }
        if run.job_status.is_some() {
            self.set_job_status(run, JobStatus::Interrupt).await?;
        }
        Ok(true)
    }

    /// Abort a run that is still waiting in the queue.
    ///
    /// Terminal runs report `true` with no change. A queued run is removed and
    /// finalized `ABORTED`. A run that is not queued reports `false`: a worker
    /// holds it and the caller must abort its remote job.
    pub async fn abort_run(&mut self, run_id: &str) -> Result<bool> {
        let Some(mut run) = self.get_run(run_id).await? else {
            return Ok(false);
        };
        if run.is_finished() {
            return Ok(true);
        }
        if !self.controller.remove_from_queue(run_id) {
            return Ok(false);
        }
        self.finalize_aborted(&mut run).await?;
        Ok(true)
    }

    pub async fn attach(&mut self, run_id: &str, attachment: Attachment) -> Result<()> {
        Ok(self.controller.repo.attach(run_id, attachment).await?)
    }

    pub async fn remove_run(&mut self, run_id: &str) -> Result<bool> {
        Ok(self.controller.repo.remove(run_id).await?)
    }

    /// Pop the head of the queue and reload it from the repository.
    ///
    /// Runs deleted while queued are skipped.
    pub async fn pop_next(&self) -> Result<Option<Run>> {
        while let Some(queued) = self.controller.get_next() {
            if let Some(run) = self.get_run(&queued.id).await? {
                return Ok(Some(run));
            }
            debug!(run_id = %queued.id, "Queued run no longer exists");
        }
        Ok(None)
    }
}
