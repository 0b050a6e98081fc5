// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run records and the run status machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Default target relative optimality gap.
pub const DEFAULT_MIN_GAP: f64 = 0.0001;

/// Default solver time limit in minutes.
pub const DEFAULT_MAX_RUN_TIME: u32 = 60;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Waiting in the dispatch queue.
    Queued,
    /// Re-queued after a restart, possibly with a live remote job.
    Resume,
    /// Submitted; the remote job is executing.
    Processing,
    /// Remote job finished; downloading its artifacts.
    CollectingResults,
    /// Abort requested, remote side not yet confirmed.
    Aborting,
    /// Aborted.
    Aborted,
    /// Finished with results.
    Completed,
    /// Failed locally or remotely.
    Failed,
    /// Cannot be executed (missing model or data set).
    Invalid,
}

impl RunStatus {
    /// Every status, in declaration order.
    pub const ALL: [RunStatus; 9] = [
        RunStatus::Queued,
        RunStatus::Resume,
        RunStatus::Processing,
        RunStatus::CollectingResults,
        RunStatus::Aborting,
        RunStatus::Aborted,
        RunStatus::Completed,
        RunStatus::Failed,
        RunStatus::Invalid,
    ];

    /// Wire/storage name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "QUEUED",
            RunStatus::Resume => "RESUME",
            RunStatus::Processing => "PROCESSING",
            RunStatus::CollectingResults => "COLLECTING_RESULTS",
            RunStatus::Aborting => "ABORTING",
            RunStatus::Aborted => "ABORTED",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Invalid => "INVALID",
        }
    }

    /// `COMPLETED`, `ABORTED` and `FAILED` end a run's execution.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Aborted | RunStatus::Failed
        )
    }

    /// Whether a status write from `self` to `next` is allowed.
    ///
    /// Writing the current status again is always allowed. An `ABORTING`
    /// run can only become `ABORTED`; terminal runs can only be re-queued;
    /// `INVALID` never changes.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;

        if self == next {
            return true;
        }

        match self {
            Queued => matches!(
                next,
                Resume | Processing | Aborting | Aborted | Failed | Invalid
            ),
            Resume => matches!(
                next,
                Queued
                    | Processing
                    | CollectingResults
                    | Aborting
                    | Aborted
                    | Completed
                    | Failed
                    | Invalid
            ),
            Processing => matches!(
                next,
                Queued | Resume | CollectingResults | Aborting | Completed | Failed
            ),
            CollectingResults => {
                matches!(next, Queued | Resume | Aborting | Completed | Failed)
            }
            Aborting => next == Aborted,
            Aborted | Completed | Failed => next == Queued,
            Invalid => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RunStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StoreError::InvalidStatus(s.to_string()))
    }
}

/// Status of the remote job bound to a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Executing on the backend.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped by an abort.
    Interrupt,
}

impl JobStatus {
    /// Wire/storage name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Interrupt => "INTERRUPT",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "INTERRUPT" => Ok(JobStatus::Interrupt),
            other => Err(StoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// A named run parameter.
///
/// Values are JSON scalars; strings, numbers and booleans are rendered into
/// the data file handed to the solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Name used in the data file.
    pub name: String,
    /// JSON scalar; `null` means unset.
    pub value: serde_json::Value,
}

impl Parameter {
    /// Create a parameter.
    pub fn new(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One request to execute an optimisation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    /// Assigned by the repository on creation.
    #[serde(default)]
    pub id: String,
    /// Lifecycle status.
    #[serde(default = "default_status")]
    pub status: RunStatus,
    /// Status of the remote job, once there is one.
    #[serde(default)]
    pub job_status: Option<JobStatus>,
    /// Model script to solve.
    pub model_id: String,
    /// Template the run was created from.
    pub template_id: String,
    /// Data set fed to the model.
    pub data_set_id: String,
    /// Extra data file parameters.
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    /// Set when the run is created.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// Remote job id; set once the run has been submitted.
    #[serde(default)]
    pub job_id: Option<String>,
    /// Relative gap of the best solution found.
    #[serde(default)]
    pub final_gap: Option<f64>,
    /// Solver outcome, `UNKNOWN` when no solution was obtained.
    #[serde(default)]
    pub solve_status: Option<String>,
    /// Short display name.
    #[serde(default)]
    pub label: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Target relative optimality gap.
    #[serde(default = "default_min_gap")]
    pub min_gap: f64,
    /// Solver time limit in minutes.
    #[serde(default = "default_max_run_time")]
    pub max_run_time: u32,
}

fn default_status() -> RunStatus {
    RunStatus::Queued
}

fn default_min_gap() -> f64 {
    DEFAULT_MIN_GAP
}

fn default_max_run_time() -> u32 {
    DEFAULT_MAX_RUN_TIME
}

impl Run {
    /// Create an unsaved run for a model, template and data set.
    pub fn new(
        model_id: impl Into<String>,
        template_id: impl Into<String>,
        data_set_id: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            status: RunStatus::Queued,
            job_status: None,
            model_id: model_id.into(),
            template_id: template_id.into(),
            data_set_id: data_set_id.into(),
            parameters: Vec::new(),
            start_time: None,
            job_id: None,
            final_gap: None,
            solve_status: None,
            label: None,
            description: None,
            min_gap: DEFAULT_MIN_GAP,
            max_run_time: DEFAULT_MAX_RUN_TIME,
        }
    }

    /// Add a parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.push(Parameter::new(name, value));
        self
    }

    /// Set the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the target gap and the time limit in minutes.
    pub fn with_limits(mut self, min_gap: f64, max_run_time: u32) -> Self {
        self.min_gap = min_gap;
        self.max_run_time = max_run_time;
        self
    }

    /// Look up a parameter value by name.
    pub fn parameter(&self, name: &str) -> Option<&serde_json::Value> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }

    /// True once the run reached a terminal status.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A binary artifact stored against a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Unique per run.
    pub name: String,
    /// MIME type.
    pub content_type: String,
    /// Raw content.
    pub data: Vec<u8>,
}

impl Attachment {
    /// Create an attachment.
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data,
        }
    }
}
