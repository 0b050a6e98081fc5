// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP submission API.
//!
//! | Method   | Path                              | Action                      |
//! |----------|-----------------------------------|-----------------------------|
//! | `POST`   | `/runs`                           | submit a run                |
//! | `GET`    | `/runs/{id}`                      | read a run                  |
//! | `GET`    | `/runs/{id}/attachments/{name}`   | download a run attachment   |
//! | `POST`   | `/runs/{id}/abort`                | abort a run                 |
//! | `POST`   | `/runs/{id}/restart`              | restart a run               |
//! | `DELETE` | `/runs/{id}`                      | abort and delete a run      |
//! | `GET`    | `/queue`                          | queued runs in order        |
//! | `GET`    | `/health`                         | readiness and executors     |

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use suro_store::{Parameter, Run};

use crate::core::Core;
use crate::error::Error;
use crate::executor::SlotSnapshot;

/// Body of `POST /runs`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRunRequest {
    pub model_id: String,
    pub template_id: String,
    pub data_set_id: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub min_gap: Option<f64>,
    /// Minutes.
    pub max_run_time: Option<u32>,
}

impl From<SubmitRunRequest> for Run {
    fn from(request: SubmitRunRequest) -> Self {
        let mut run = Run::new(request.model_id, request.template_id, request.data_set_id);
        run.parameters = request.parameters;
        run.label = request.label;
        run.description = request.description;
        if let Some(min_gap) = request.min_gap {
            run.min_gap = min_gap;
        }
        if let Some(max_run_time) = request.max_run_time {
            run.max_run_time = max_run_time;
        }
        run
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    ready: bool,
    version: &'static str,
    queued: usize,
    executors: Vec<SlotSnapshot>,
}

/// Handler error, rendered as `{"error": .., "code": ..}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Dispatch is not ready")]
    NotReady,

    #[error("Run {0} not found")]
    RunNotFound(String),

    #[error("Attachment {name} of run {run_id} not found")]
    AttachmentNotFound { run_id: String, name: String },

    #[error(transparent)]
    Dispatch(#[from] Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotReady => (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY"),
            ApiError::RunNotFound(_) | ApiError::AttachmentNotFound { .. } => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            ApiError::Dispatch(Error::Store(suro_store::StoreError::Duplicate(_))) => {
                (StatusCode::CONFLICT, "CONFLICT")
            }
            ApiError::Dispatch(e) => {
                tracing::error!(error = %e, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let body = json!({
            "error": self.to_string(),
            "code": code,
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Build the API router over a dispatch core.
pub fn build_router(core: Arc<Core>) -> Router {
    Router::new()
        .route("/runs", post(submit_run))
        .route("/runs/{id}", get(get_run).delete(delete_run))
        .route("/runs/{id}/attachments/{name}", get(get_attachment))
        .route("/runs/{id}/abort", post(abort_run))
        .route("/runs/{id}/restart", post(restart_run))
        .route("/queue", get(queue))
        .route("/health", get(health))
        .with_state(core)
}

async fn submit_run(
    State(core): State<Arc<Core>>,
    Json(request): Json<SubmitRunRequest>,
) -> ApiResult<(StatusCode, Json<Run>)> {
    let run = core
        .submit_run(request.into())
        .await?
        .ok_or(ApiError::NotReady)?;
    Ok((StatusCode::CREATED, Json(run)))
}

async fn get_run(State(core): State<Arc<Core>>, Path(id): Path<String>) -> ApiResult<Json<Run>> {
    let run = core.get_run(&id).await?.ok_or(ApiError::RunNotFound(id))?;
    Ok(Json(run))
}

async fn get_attachment(
    State(core): State<Arc<Core>>,
    Path((id, name)): Path<(String, String)>,
) -> ApiResult<Response> {
    let attachment = core
        .run_controller()
        .get_attachment(&id, &name)
        .await?
        .ok_or(ApiError::AttachmentNotFound { run_id: id, name })?;
    Ok((
        [(header::CONTENT_TYPE, attachment.content_type)],
        attachment.data,
    )
        .into_response())
}

/// Map a `false` from the core to 503 or 404.
async fn rejected(core: &Core, id: String) -> ApiError {
    if !core.is_ready() {
        return ApiError::NotReady;
    }
    match core.get_run(&id).await {
        Ok(Some(_)) => ApiError::Dispatch(Error::Other(format!("operation on run {id} failed"))),
        Ok(None) => ApiError::RunNotFound(id),
        Err(e) => ApiError::Dispatch(e),
    }
}

async fn abort_run(
    State(core): State<Arc<Core>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if !core.abort_run(&id).await? {
        return Err(rejected(&core, id).await);
    }
    Ok(Json(json!({ "aborted": true })))
}

async fn restart_run(
    State(core): State<Arc<Core>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let restarted = core.restart_run(&id).await?;
    if !restarted && (!core.is_ready() || core.get_run(&id).await?.is_none()) {
        return Err(rejected(&core, id).await);
    }
    Ok(Json(json!({ "restarted": restarted })))
}

async fn delete_run(
    State(core): State<Arc<Core>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if !core.delete_run(&id).await? {
        return Err(rejected(&core, id).await);
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn queue(State(core): State<Arc<Core>>) -> Json<Vec<Run>> {
    Json(core.queue_snapshot())
}

async fn health(State(core): State<Arc<Core>>) -> Json<HealthResponse> {
    let ready = core.is_ready();
    Json(HealthResponse {
        status: if ready { "ok" } else { "starting" },
        ready,
        version: env!("CARGO_PKG_VERSION"),
        queued: core.queue_snapshot().len(),
        executors: core.job_controller().executors().await,
    })
}
