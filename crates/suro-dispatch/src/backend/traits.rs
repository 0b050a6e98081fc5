// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backend trait definitions.
//!
//! Defines the abstract interface to a remote optimisation service.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from backend operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// Job does not exist on the backend.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Job exists but has no attachment with that name.
    #[error("Attachment {name} not found on job {job_id}")]
    AttachmentNotFound {
        /// Job that was queried.
        job_id: String,
        /// Requested attachment.
        name: String,
    },

    /// Backend refused a new job because the account's job limit is reached.
    #[error("Job limit reached: {0}")]
    JobLimit(String),

    /// Backend could not be reached or answered garbage.
    #[error("Communication error: {0}")]
    Communication(String),

    /// Backend answered with an unexpected HTTP status.
    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// HTTP transport failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

impl BackendError {
    /// The job (or one of its attachments) does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BackendError::NotFound(_) | BackendError::AttachmentNotFound { .. }
        )
    }
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Execution state reported by the backend for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Created; inputs may still be uploading.
    Created,
    /// Queued on the backend.
    NotStarted,
    /// Solving.
    Running,
    /// Abort requested, not yet effective.
    Interrupting,
    /// Aborted.
    Interrupted,
    /// Failed.
    Failed,
    /// Finished; results available.
    Processed,
}

impl ExecutionStatus {
    /// `INTERRUPTED`, `FAILED` and `PROCESSED` end a job.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Interrupted | ExecutionStatus::Failed | ExecutionStatus::Processed
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Created => "CREATED",
            ExecutionStatus::NotStarted => "NOT_STARTED",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Interrupting => "INTERRUPTING",
            ExecutionStatus::Interrupted => "INTERRUPTED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Processed => "PROCESSED",
        };
        f.write_str(s)
    }
}

/// Snapshot of a remote job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobInfo {
    /// Backend-assigned job id.
    pub id: String,
    /// Current execution state.
    pub execution_status: ExecutionStatus,
    /// Solver verdict, once known (e.g. `OPTIMAL_SOLUTION`).
    pub solve_status: Option<String>,
    /// Progress details published by the solver (e.g. `PROGRESS_GAP`).
    pub details: HashMap<String, String>,
}

impl JobInfo {
    /// A job in the given state with no details.
    pub fn new(id: impl Into<String>, execution_status: ExecutionStatus) -> Self {
        Self {
            id: id.into(),
            execution_status,
            solve_status: None,
            details: HashMap::new(),
        }
    }
}

/// One named input file of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInput {
    /// Attachment name on the backend (e.g. `model.mod`).
    pub name: String,
    /// File contents.
    pub data: Vec<u8>,
}

impl JobInput {
    /// Create an input from anything byte-like.
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Everything needed to start a remote job.
#[derive(Debug, Default)]
pub struct JobRequest {
    /// Job parameters, in submission order.
    pub parameters: Vec<(String, String)>,
    /// Input attachments, in upload order.
    pub inputs: Vec<JobInput>,
    /// Receives solver log lines while the job runs.
    pub live_log: Option<mpsc::UnboundedSender<String>>,
}

impl JobRequest {
    /// Look up an input by name.
    pub fn input(&self, name: &str) -> Option<&JobInput> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// Look up a parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A remote optimisation service.
///
/// Implementations must be safe to call from many executors at once.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Get the backend type name.
    fn backend_type(&self) -> &'static str;

    /// Create a job, upload its inputs and start it. Returns the job id.
    ///
    /// Fails with [`BackendError::JobLimit`] when the service refuses more jobs.
    async fn submit(&self, request: JobRequest) -> Result<String>;

    /// Fetch a job. `Ok(None)` when the job does not exist.
    async fn get_job(&self, job_id: &str) -> Result<Option<JobInfo>>;

    /// Request that a job stop. Fails with [`BackendError::NotFound`] for unknown jobs.
    async fn abort_job(&self, job_id: &str) -> Result<()>;

    /// Delete a job and its artifacts. Fails with [`BackendError::NotFound`] for unknown jobs.
    async fn delete_job(&self, job_id: &str) -> Result<()>;

    /// All jobs owned by this account.
    async fn list_jobs(&self) -> Result<Vec<JobInfo>>;

    /// Download a named output attachment.
    async fn download_attachment(&self, job_id: &str, name: &str) -> Result<Vec<u8>>;

    /// Download the full solver log.
    async fn download_log(&self, job_id: &str) -> Result<Vec<u8>>;

    /// Whether the job still exists.
    async fn job_exists(&self, job_id: &str) -> Result<bool> {
        Ok(self.get_job(job_id).await?.is_some())
    }
}
