// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remote job monitor.
//!
//! A monitor polls one remote job and reports each phase change to a
//! [`JobListener`] exactly once:
//!
//! ```text
//!   Created ──► Running ──► Completed
//!      │           │
//!      └───────────┴──────► Failed | Interrupted
//! ```
//!
//! Monitors come in two kinds sharing the same state machine: `Submitted`
//! for a job this process just created, and `Resumed` for a job that
//! survived a restart. A resumed monitor polls immediately.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{Backend, ExecutionStatus, JobInfo};

/// How the monitored job came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorKind {
    Submitted,
    Resumed,
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorKind::Submitted => f.write_str("submitted"),
            MonitorKind::Resumed => f.write_str("resumed"),
        }
    }
}

/// Protocol state of a monitored job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    Created,
    Running,
    Completed,
    Failed,
    Interrupted,
}

impl MonitorPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MonitorPhase::Completed | MonitorPhase::Failed | MonitorPhase::Interrupted
        )
    }

    /// Phase reached when the backend reports `status`, or `None` if the
    /// report does not move the job forward.
    pub fn advance(self, status: ExecutionStatus) -> Option<MonitorPhase> {
        use MonitorPhase::*;

        let next = match status {
            ExecutionStatus::Created | ExecutionStatus::NotStarted => Created,
            ExecutionStatus::Running | ExecutionStatus::Interrupting => Running,
            ExecutionStatus::Processed => Completed,
            ExecutionStatus::Failed => Failed,
            ExecutionStatus::Interrupted => Interrupted,
        };

        match (self, next) {
            (Completed | Failed | Interrupted, _) => None,
            (Created, Created) | (Running, Created | Running) => None,
            (_, next) => Some(next),
        }
    }
}

/// A phase change.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Running,
    Completed(JobInfo),
    /// `None` when the job disappeared from the backend.
    Failed(Option<JobInfo>),
    Interrupted,
}

/// Receives monitor events.
#[async_trait]
pub trait JobListener: Send + Sync {
    async fn on_job_event(&self, job_id: &str, event: MonitorEvent);
}

/// Handle to a running monitor task.
#[derive(Debug)]
pub struct MonitorHandle {
    kind: MonitorKind,
    job_id: String,
    cancel: CancellationToken,
}

impl MonitorHandle {
    pub fn kind(&self) -> MonitorKind {
        self.kind
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Stop polling. Takes effect before the next poll; an event being
    /// delivered right now still completes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Polls one remote job.
pub struct JobMonitor {
    kind: MonitorKind,
    job_id: String,
    backend: Arc<dyn Backend>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl JobMonitor {
    pub fn new(
        kind: MonitorKind,
        job_id: impl Into<String>,
        backend: Arc<dyn Backend>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            kind,
            job_id: job_id.into(),
            backend,
            poll_interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Start polling on a new task, reporting to `listener`.
    pub fn spawn(self, listener: Arc<dyn JobListener>) -> MonitorHandle {
        let handle = MonitorHandle {
            kind: self.kind,
            job_id: self.job_id.clone(),
            cancel: self.cancel.clone(),
        };
        tokio::spawn(self.run(listener));
        handle
    }

    async fn run(self, listener: Arc<dyn JobListener>) {
        info!(job_id = %self.job_id, kind = %self.kind, "Monitoring job");

        let mut phase = MonitorPhase::Created;
        let mut first = true;

        loop {
            if !(first && self.kind == MonitorKind::Resumed) {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
            first = false;

            if self.cancel.is_cancelled() {
                break;
            }

            let (next, event) = match self.backend.get_job(&self.job_id).await {
                Ok(Some(job)) => {
                    let Some(next) = phase.advance(job.execution_status) else {
                        continue;
                    };
                    let event = match next {
                        MonitorPhase::Running => MonitorEvent::Running,
                        MonitorPhase::Completed => MonitorEvent::Completed(job),
                        MonitorPhase::Failed => MonitorEvent::Failed(Some(job)),
                        MonitorPhase::Interrupted => MonitorEvent::Interrupted,
                        MonitorPhase::Created => continue,
                    };
                    (next, event)
                }
                Ok(None) => {
                    warn!(job_id = %self.job_id, "Monitored job no longer exists");
                    (MonitorPhase::Failed, MonitorEvent::Failed(None))
                }
                Err(e) => {
                    warn!(job_id = %self.job_id, error = %e, "Failed to poll job status");
                    continue;
                }
            };

            debug!(job_id = %self.job_id, from = ?phase, to = ?next, "Job phase changed");
            phase = next;
            listener.on_job_event(&self.job_id, event).await;

            if phase.is_terminal() {
                break;
            }
        }

        debug!(job_id = %self.job_id, ?phase, "Monitor stopped");
    }
}
