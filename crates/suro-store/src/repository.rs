// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run repository trait and the in-memory implementation.
//!
//! Repositories do no concurrency control of their own beyond keeping each
//! call atomic. Read-modify-write sequences are serialized by the caller.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Result, StoreError};
use crate::model::{Attachment, Run};

/// Durable storage for runs and their attachments.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Fetch a run by id.
    async fn get(&self, run_id: &str) -> Result<Option<Run>>;

    /// Persist a new run.
    ///
    /// Assigns a fresh id when `run.id` is empty and returns the stored run.
    async fn add(&self, run: Run) -> Result<Run>;

    /// Overwrite an existing run. Fails with [`StoreError::NotFound`] if missing.
    async fn update(&self, run: &Run) -> Result<()>;

    /// Delete a run and its attachments. Returns whether it existed.
    async fn remove(&self, run_id: &str) -> Result<bool>;

    /// All runs in creation order.
    async fn all(&self) -> Result<Vec<Run>>;

    /// Find the run bound to a remote job id.
    async fn find_by_job_id(&self, job_id: &str) -> Result<Option<Run>>;

    /// Store (or replace) a named attachment on a run.
    async fn attach(&self, run_id: &str, attachment: Attachment) -> Result<()>;

    /// Fetch a named attachment.
    async fn attachment(&self, run_id: &str, name: &str) -> Result<Option<Attachment>>;
}

/// Assign an id to a run that does not have one yet.
pub(crate) fn ensure_id(run: &mut Run) {
    if run.id.is_empty() {
        run.id = uuid::Uuid::new_v4().to_string();
    }
}

#[derive(Default)]
struct MemoryState {
    runs: Vec<Run>,
    attachments: HashMap<(String, String), Attachment>,
}

/// In-memory run repository for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryRunRepository {
    state: Mutex<MemoryState>,
}

impl MemoryRunRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunRepository for MemoryRunRepository {
    async fn get(&self, run_id: &str) -> Result<Option<Run>> {
        let state = self.state.lock().await;
        Ok(state.runs.iter().find(|r| r.id == run_id).cloned())
    }

    async fn add(&self, mut run: Run) -> Result<Run> {
        ensure_id(&mut run);
        let mut state = self.state.lock().await;
        if state.runs.iter().any(|r| r.id == run.id) {
            return Err(StoreError::Duplicate(run.id));
        }
        state.runs.push(run.clone());
        Ok(run)
    }

    async fn update(&self, run: &Run) -> Result<()> {
        let mut state = self.state.lock().await;
        let slot = state
            .runs
            .iter_mut()
            .find(|r| r.id == run.id)
            .ok_or_else(|| StoreError::NotFound(run.id.clone()))?;
        *slot = run.clone();
        Ok(())
    }

    async fn remove(&self, run_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let before = state.runs.len();
        state.runs.retain(|r| r.id != run_id);
        state.attachments.retain(|(owner, _), _| owner != run_id);
        Ok(state.runs.len() != before)
    }

    async fn all(&self) -> Result<Vec<Run>> {
        Ok(self.state.lock().await.runs.clone())
    }

    async fn find_by_job_id(&self, job_id: &str) -> Result<Option<Run>> {
        let state = self.state.lock().await;
        Ok(state
            .runs
            .iter()
            .find(|r| r.job_id.as_deref() == Some(job_id))
            .cloned())
    }

    async fn attach(&self, run_id: &str, attachment: Attachment) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.runs.iter().any(|r| r.id == run_id) {
            return Err(StoreError::NotFound(run_id.to_string()));
        }
        state
            .attachments
            .insert((run_id.to_string(), attachment.name.clone()), attachment);
        Ok(())
    }

    async fn attachment(&self, run_id: &str, name: &str) -> Result<Option<Attachment>> {
        let state = self.state.lock().await;
        Ok(state
            .attachments
            .get(&(run_id.to_string(), name.to_string()))
            .cloned())
    }
}
