// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SURO Dispatch - Optimisation Run Dispatch
//!
//! This crate accepts optimisation runs, queues them and dispatches each to
//! a pool of workers that submit the run to a remote optimisation backend,
//! follow the remote job and bring the local run to a final status. Runs
//! that were in flight when the process stopped are picked up again on the
//! next start without being submitted twice.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     HTTP API (axum) / embedding app                  │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  Core  (ready gate, pending completions, submit/abort/delete/restart)│
//! │  ┌──────────────────────────┐      ┌──────────────────────────────┐ │
//! │  │      RunController       │      │        JobController         │ │
//! │  │  queue + status machine  │◄─────│  ┌────────┐ ┌────────┐       │ │
//! │  │  (RunGuard section)      │      │  │Executor│ │Executor│  ...  │ │
//! │  └──────────────────────────┘      │  └───┬────┘ └───┬────┘       │ │
//! │               │                    └──────┼──────────┼────────────┘ │
//! └───────────────┼───────────────────────────┼──────────┼──────────────┘
//!                 ▼                           ▼          ▼
//!        ┌─────────────────┐          ┌──────────────────────────┐
//!        │  RunRepository  │          │  Backend (DOcplexcloud,  │
//!        │ (SQLite/memory) │          │  mock) + job monitors    │
//!        └─────────────────┘          └──────────────────────────┘
//! ```
//!
//! Status changes are broadcast on `job:<run_id>`; parsed solver log lines
//! on `optim:log:<run_id>`.
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `SURO_OAAS_API_URL` | Yes | - | Backend API base URL |
//! | `SURO_OAAS_API_TOKEN` | Yes | - | Backend API token |
//! | `SURO_OAAS_MAX_CONCURRENT` | No | `3` | Number of executors |
//! | `SURO_EXECUTOR_CHECK_INTERVAL_MS` | No | `5000` | Executor poll interval |
//! | `SURO_EXECUTOR_RAMP_UP_MS` | No | `10000` | Delay before the first poll |
//! | `SURO_MONITOR_POLL_INTERVAL_MS` | No | `2000` | Remote job poll interval |
//! | `SURO_RESUME_POLL_INTERVAL_MS` | No | `2000` | Readiness poll before resuming runs |
//! | `SURO_DATABASE_PATH` | No | `.data/suro.db` | SQLite database file |
//! | `SURO_CATALOG_DIR` | No | `.data/catalog` | Model and data set files |
//! | `SURO_HTTP_PORT` | No | `8080` | HTTP API port |
//!
//! # Modules
//!
//! - [`core`](crate::core): orchestrator
//! - [`run_controller`]: run queue and status machine
//! - [`job_controller`]: executor pool
//! - [`executor`]: polling worker
//! - [`monitor`]: remote job monitor
//! - [`backend`]: backend capability, REST client and mock
//! - [`runtime`]: embeddable runtime

/// HTTP submission API.
pub mod api;

/// Optimisation backend capability and implementations.
pub mod backend;

/// Model script and data set lookup.
pub mod catalog;

/// Configuration loaded from environment variables.
pub mod config;

/// Dispatch orchestrator.
pub mod core;

/// Error types for dispatch operations.
pub mod error;

/// Polling worker bridging one run at a time to the backend.
pub mod executor;

/// Executor pool.
pub mod job_controller;

/// Solver log line parsing.
pub mod log_entry;

/// Remote job monitor.
pub mod monitor;

/// Topic-based notification broadcast.
pub mod notify;

/// Job request generation.
pub mod request;

/// Run queue and status machine.
pub mod run_controller;

/// Embeddable dispatch runtime.
pub mod runtime;

pub use config::Config;
pub use crate::core::Core;
pub use error::Error;
pub use runtime::DispatchRuntime;
