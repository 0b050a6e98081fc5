// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock backend for testing.
//!
//! Keeps jobs in memory. Tests drive job state by hand through
//! [`MockBackend::complete_job`], [`MockBackend::fail_job`] and friends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};

use super::traits::*;

/// Mock job state.
#[derive(Debug)]
struct MockJob {
    info: JobInfo,
    inputs: Vec<JobInput>,
    parameters: Vec<(String, String)>,
    attachments: HashMap<String, Vec<u8>>,
    log: Vec<u8>,
    live_log: Option<mpsc::UnboundedSender<String>>,
}

impl MockJob {
    fn new(info: JobInfo) -> Self {
        Self {
            info,
            inputs: Vec::new(),
            parameters: Vec::new(),
            attachments: HashMap::new(),
            log: Vec::new(),
            live_log: None,
        }
    }
}

/// Mock backend for testing.
pub struct MockBackend {
    jobs: Mutex<HashMap<String, MockJob>>,
    next_id: AtomicU64,
    /// Reject submissions with [`BackendError::JobLimit`].
    job_limit: AtomicBool,
    /// Fail every call with [`BackendError::Communication`].
    unreachable: AtomicBool,
    /// Fail only `abort_job` with [`BackendError::Communication`].
    abort_unreachable: AtomicBool,
    /// Fail only `submit` with [`BackendError::Communication`].
    submit_unreachable: AtomicBool,
    /// Delay before a submission takes effect (in milliseconds).
    submit_delay_ms: AtomicU64,
    submit_attempts: AtomicUsize,
    submissions: AtomicUsize,
    aborts: AtomicUsize,
    deletes: AtomicUsize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create a new mock backend. Submitted jobs start out `RUNNING`.
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            job_limit: AtomicBool::new(false),
            unreachable: AtomicBool::new(false),
            abort_unreachable: AtomicBool::new(false),
            submit_unreachable: AtomicBool::new(false),
            submit_delay_ms: AtomicU64::new(0),
            submit_attempts: AtomicUsize::new(0),
            submissions: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    /// Create a mock backend that refuses every submission with a job-limit error.
    pub fn at_job_limit() -> Self {
        let backend = Self::new();
        backend.set_job_limit(true);
        backend
    }

    pub fn set_job_limit(&self, on: bool) {
        self.job_limit.store(on, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, on: bool) {
        self.unreachable.store(on, Ordering::SeqCst);
    }

    pub fn set_abort_unreachable(&self, on: bool) {
        self.abort_unreachable.store(on, Ordering::SeqCst);
    }

    pub fn set_submit_unreachable(&self, on: bool) {
        self.submit_unreachable.store(on, Ordering::SeqCst);
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        self.submit_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of `submit` calls that started, including failed ones.
    pub fn submit_attempts(&self) -> usize {
        self.submit_attempts.load(Ordering::SeqCst)
    }

    /// Number of jobs created through `submit`.
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Number of `abort_job` calls that reached a job.
    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    /// Number of jobs deleted.
    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Ids of every job currently known.
    pub async fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.jobs.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Current execution state of a job.
    pub async fn status(&self, job_id: &str) -> Option<ExecutionStatus> {
        self.jobs
            .lock()
            .await
            .get(job_id)
            .map(|j| j.info.execution_status)
    }

    /// Input attachment uploaded with a job.
    pub async fn input(&self, job_id: &str, name: &str) -> Option<Vec<u8>> {
        self.jobs.lock().await.get(job_id).and_then(|j| {
            j.inputs
                .iter()
                .find(|i| i.name == name)
                .map(|i| i.data.clone())
        })
    }

    /// Parameter submitted with a job.
    pub async fn parameter(&self, job_id: &str, name: &str) -> Option<String> {
        self.jobs.lock().await.get(job_id).and_then(|j| {
            j.parameters
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        })
    }

    /// Register a job that was not submitted through this backend, as if it
    /// survived from an earlier process.
    pub async fn insert_job(&self, job_id: &str, status: ExecutionStatus) {
        self.jobs
            .lock()
            .await
            .insert(job_id.to_string(), MockJob::new(JobInfo::new(job_id, status)));
    }

    /// Move a job to an arbitrary state.
    pub async fn set_status(&self, job_id: &str, status: ExecutionStatus) {
        if let Some(job) = self.jobs.lock().await.get_mut(job_id) {
            job.info.execution_status = status;
        }
    }

    /// Set a progress detail on a job.
    pub async fn set_detail(&self, job_id: &str, key: &str, value: &str) {
        if let Some(job) = self.jobs.lock().await.get_mut(job_id) {
            job.info.details.insert(key.to_string(), value.to_string());
        }
    }

    /// Push a solver log line: appended to the log and forwarded to the live sink.
    pub async fn emit_log(&self, job_id: &str, line: &str) {
        if let Some(job) = self.jobs.lock().await.get_mut(job_id) {
            job.log.extend_from_slice(line.as_bytes());
            job.log.push(b'\n');
            if let Some(sink) = &job.live_log {
                let _ = sink.send(line.to_string());
            }
        }
    }

    /// Finish a job successfully, optionally with a `solution` attachment.
    pub async fn complete_job(&self, job_id: &str, solution: Option<Value>) {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get_mut(job_id) {
            if let Some(solution) = solution {
                job.attachments
                    .insert("solution".to_string(), solution.to_string().into_bytes());
            }
            job.info.solve_status = Some("OPTIMAL_SOLUTION".to_string());
            job.info.execution_status = ExecutionStatus::Processed;
            job.live_log = None;
        }
    }

    /// Fail a job.
    pub async fn fail_job(&self, job_id: &str) {
        if let Some(job) = self.jobs.lock().await.get_mut(job_id) {
            job.info.execution_status = ExecutionStatus::Failed;
            job.live_log = None;
        }
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BackendError::Communication("mock backend unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn backend_type(&self) -> &'static str {
        "mock"
    }

    async fn submit(&self, request: JobRequest) -> Result<String> {
        self.submit_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = self.submit_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.check_reachable()?;
        if self.submit_unreachable.load(Ordering::SeqCst) {
            return Err(BackendError::Communication("submission rejected".into()));
        }
        if self.job_limit.load(Ordering::SeqCst) {
            return Err(BackendError::JobLimit("mock job limit reached".into()));
        }

        let job_id = format!("job-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut job = MockJob::new(JobInfo::new(&job_id, ExecutionStatus::Running));
        job.inputs = request.inputs;
        job.parameters = request.parameters;
        job.live_log = request.live_log;

        self.jobs.lock().await.insert(job_id.clone(), job);
        self.submissions.fetch_add(1, Ordering::SeqCst);
        Ok(job_id)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobInfo>> {
        self.check_reachable()?;
        Ok(self.jobs.lock().await.get(job_id).map(|j| j.info.clone()))
    }

    async fn abort_job(&self, job_id: &str) -> Result<()> {
        self.check_reachable()?;
        if self.abort_unreachable.load(Ordering::SeqCst) {
            return Err(BackendError::Communication("abort rejected".into()));
        }

        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| BackendError::NotFound(job_id.to_string()))?;
        if !job.info.execution_status.is_terminal() {
            job.info.execution_status = ExecutionStatus::Interrupted;
            job.live_log = None;
        }
        self.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        self.check_reachable()?;
        self.jobs
            .lock()
            .await
            .remove(job_id)
            .ok_or_else(|| BackendError::NotFound(job_id.to_string()))?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_jobs(&self) -> Result<Vec<JobInfo>> {
        self.check_reachable()?;
        let mut jobs: Vec<_> = self
            .jobs
            .lock()
            .await
            .values()
            .map(|j| j.info.clone())
            .collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(jobs)
    }

    async fn download_attachment(&self, job_id: &str, name: &str) -> Result<Vec<u8>> {
        self.check_reachable()?;
        let jobs = self.jobs.lock().await;
        let job = jobs
            .get(job_id)
            .ok_or_else(|| BackendError::NotFound(job_id.to_string()))?;
        job.attachments
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::AttachmentNotFound {
                job_id: job_id.to_string(),
                name: name.to_string(),
            })
    }

    async fn download_log(&self, job_id: &str) -> Result<Vec<u8>> {
        self.check_reachable()?;
        self.jobs
            .lock()
            .await
            .get(job_id)
            .map(|j| j.log.clone())
            .ok_or_else(|| BackendError::NotFound(job_id.to_string()))
    }
}
