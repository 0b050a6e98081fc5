// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! REST client for a DOcplexcloud-style job service.
//!
//! | Operation           | Request                                         |
//! |---------------------|-------------------------------------------------|
//! | create job          | `POST /jobs` (job URL in `Location`)            |
//! | upload input        | `PUT /jobs/{id}/attachments/{name}/blob`        |
//! | start               | `POST /jobs/{id}/execute`                       |
//! | fetch               | `GET /jobs/{id}`                                |
//! | abort               | `DELETE /jobs/{id}/execute`                     |
//! | delete              | `DELETE /jobs/{id}`                             |
//! | list                | `GET /jobs`                                     |
//! | download output     | `GET /jobs/{id}/attachments/{name}/blob`        |
//! | download log        | `GET /jobs/{id}/log/blob`                       |
//! | follow log          | `GET /jobs/{id}/log/items?start={n}`            |
//!
//! Every request carries the API token in the `X-IBM-Client-Id` header.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::traits::*;

const AUTH_HEADER: &str = "X-IBM-Client-Id";

/// Default interval between live-log fetches.
const DEFAULT_LOG_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Consecutive failed status checks after which the live log is abandoned.
const MAX_LOG_STATUS_FAILURES: u32 = 5;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobDto {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "_links")]
    links: Vec<LinkDto>,
    execution_status: ExecutionStatus,
    #[serde(default)]
    solve_status: Option<String>,
    #[serde(default)]
    details: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct LinkDto {
    rel: String,
    href: String,
}

impl JobDto {
    fn into_info(self, fallback_id: Option<&str>) -> Option<JobInfo> {
        let id = self
            .id
            .or_else(|| {
                self.links
                    .iter()
                    .find(|l| l.rel == "self")
                    .and_then(|l| last_segment(&l.href))
            })
            .or_else(|| fallback_id.map(str::to_string))?;

        Some(JobInfo {
            id,
            execution_status: self.execution_status,
            solve_status: self.solve_status,
            details: self.details,
        })
    }
}

#[derive(Debug, Deserialize)]
struct LogItemDto {
    seqid: u64,
    #[serde(default)]
    records: Vec<LogRecordDto>,
}

#[derive(Debug, Deserialize)]
struct LogRecordDto {
    message: String,
}

fn last_segment(url: &str) -> Option<String> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// HTTP client for the job service.
#[derive(Clone)]
pub struct DoCloudBackend {
    client: reqwest::Client,
    base_url: String,
    token: String,
    log_poll_interval: Duration,
}

impl DoCloudBackend {
    /// Create a client for `base_url` (e.g. `https://host/job_manager/rest/v1`).
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, token)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            log_poll_interval: DEFAULT_LOG_POLL_INTERVAL,
        }
    }

    /// Set the live-log polling interval.
    ///
    /// Default: 2 seconds
    pub fn with_log_poll_interval(mut self, interval: Duration) -> Self {
        self.log_poll_interval = interval;
        self
    }

    fn job_url(&self, job_id: &str) -> String {
        format!("{}/jobs/{}", self.base_url, job_id)
    }

    async fn check(response: Response, job_id: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound(job_id.to_string()));
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::UnexpectedStatus {
            status: status.as_u16(),
            body,
        })
    }

    async fn create_job(&self, request: &JobRequest) -> Result<String> {
        let attachments: Vec<_> = request
            .inputs
            .iter()
            .map(|i| json!({ "name": i.name }))
            .collect();
        let parameters: serde_json::Map<_, _> = request
            .parameters
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();

        let response = self
            .client
            .post(format!("{}/jobs", self.base_url))
            .header(AUTH_HEADER, &self.token)
            .json(&json!({ "attachments": attachments, "parameters": parameters }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::JobLimit(body));
        }
        let response = Self::check(response, "").await?;

        response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(last_segment)
            .ok_or_else(|| BackendError::Communication("job creation returned no location".into()))
    }

    async fn upload(&self, job_id: &str, input: &JobInput) -> Result<()> {
        let response = self
            .client
            .put(format!("{}/attachments/{}/blob", self.job_url(job_id), input.name))
            .header(AUTH_HEADER, &self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(input.data.clone())
            .send()
            .await?;
        Self::check(response, job_id).await?;
        Ok(())
    }

    async fn execute(&self, job_id: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/execute", self.job_url(job_id)))
            .header(AUTH_HEADER, &self.token)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::JobLimit(body));
        }
        Self::check(response, job_id).await?;
        Ok(())
    }

    async fn log_items(&self, job_id: &str, start: u64) -> Result<Vec<LogItemDto>> {
        let response = self
            .client
            .get(format!("{}/log/items", self.job_url(job_id)))
            .query(&[("start", start)])
            .header(AUTH_HEADER, &self.token)
            .send()
            .await?;
        let response = Self::check(response, job_id).await?;
        Ok(response.json().await?)
    }

    /// Forward log lines into `sink` until the job ends, the receiver is
    /// dropped or the job status cannot be read several times in a row.
    async fn follow_log(self, job_id: String, sink: mpsc::UnboundedSender<String>) {
        let mut next = 0u64;
        let mut failures = 0u32;
        loop {
            let finished = match self.get_job(&job_id).await {
                Ok(Some(job)) => {
                    failures = 0;
                    job.execution_status.is_terminal()
                }
                Ok(None) => true,
                Err(e) => {
                    failures += 1;
                    debug!(job_id = %job_id, error = %e, failures, "Live log status check failed");
                    if failures >= MAX_LOG_STATUS_FAILURES {
                        warn!(job_id = %job_id, "Job status unavailable, no longer following live log");
                        true
                    } else {
                        false
                    }
                }
            };

            match self.log_items(&job_id, next).await {
                Ok(items) => {
                    for item in items {
                        next = next.max(item.seqid + 1);
                        for record in item.records {
                            if sink.send(record.message).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(e) => debug!(job_id = %job_id, error = %e, "Live log fetch failed"),
            }

            if finished || sink.is_closed() {
                return;
            }
            tokio::time::sleep(self.log_poll_interval).await;
        }
    }
}

#[async_trait]
impl Backend for DoCloudBackend {
    fn backend_type(&self) -> &'static str {
        "docloud"
    }

    async fn submit(&self, mut request: JobRequest) -> Result<String> {
        let job_id = self.create_job(&request).await?;

        let started = async {
            for input in &request.inputs {
                self.upload(&job_id, input).await?;
            }
            self.execute(&job_id).await
        }
        .await;

        if let Err(e) = started {
            warn!(job_id = %job_id, error = %e, "Job start failed, deleting created job");
            if let Err(del) = self.delete_job(&job_id).await {
                debug!(job_id = %job_id, error = %del, "Cleanup of unstarted job failed");
            }
            return Err(e);
        }

        if let Some(sink) = request.live_log.take() {
            tokio::spawn(self.clone().follow_log(job_id.clone(), sink));
        }

        debug!(job_id = %job_id, "Job submitted");
        Ok(job_id)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobInfo>> {
        let response = self
            .client
            .get(self.job_url(job_id))
            .header(AUTH_HEADER, &self.token)
            .send()
            .await?;

        match Self::check(response, job_id).await {
            Ok(response) => {
                let dto: JobDto = response.json().await?;
                Ok(dto.into_info(Some(job_id)))
            }
            Err(BackendError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn abort_job(&self, job_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/execute", self.job_url(job_id)))
            .header(AUTH_HEADER, &self.token)
            .send()
            .await?;
        Self::check(response, job_id).await?;
        Ok(())
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.job_url(job_id))
            .header(AUTH_HEADER, &self.token)
            .send()
            .await?;
        Self::check(response, job_id).await?;
        Ok(())
    }

    async fn list_jobs(&self) -> Result<Vec<JobInfo>> {
        let response = self
            .client
            .get(format!("{}/jobs", self.base_url))
            .header(AUTH_HEADER, &self.token)
            .send()
            .await?;
        let response = Self::check(response, "").await?;
        let jobs: Vec<JobDto> = response.json().await?;
        Ok(jobs.into_iter().filter_map(|j| j.into_info(None)).collect())
    }

    async fn download_attachment(&self, job_id: &str, name: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(format!("{}/attachments/{}/blob", self.job_url(job_id), name))
            .header(AUTH_HEADER, &self.token)
            .send()
            .await?;

        match Self::check(response, job_id).await {
            Ok(response) => Ok(response.bytes().await?.to_vec()),
            Err(BackendError::NotFound(_)) => Err(BackendError::AttachmentNotFound {
                job_id: job_id.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn download_log(&self, job_id: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(format!("{}/log/blob", self.job_url(job_id)))
            .header(AUTH_HEADER, &self.token)
            .send()
            .await?;
        let response = Self::check(response, job_id).await?;
        Ok(response.bytes().await?.to_vec())
    }
}
