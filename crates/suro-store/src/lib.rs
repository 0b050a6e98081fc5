// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run records and run repositories for suro dispatch.
//!
//! A [`Run`] is one request to execute an optimisation job on a remote
//! backend. Its [`RunStatus`] moves through an explicit transition table:
//!
//! ```text
//!   QUEUED ──► PROCESSING ──► COLLECTING_RESULTS ──► COMPLETED
//!     │  ▲         │                  │
//!     │  │         ├──────────────────┴──────────► FAILED
//!     │  │         ▼
//!     │  └──── RESUME (after restart)
//!     │
//!     └──► ABORTING ──► ABORTED
//!
//!   COMPLETED / ABORTED / FAILED ──► QUEUED   (explicit restart)
//!   INVALID                                    (dead end)
//! ```
//!
//! See [`RunStatus::can_transition_to`] for the full table.
//!
//! Storage goes through the [`RunRepository`] trait. Two implementations
//! ship with the crate:
//!
//! | Repository              | Use                                   |
//! |-------------------------|---------------------------------------|
//! | [`MemoryRunRepository`] | tests, ephemeral deployments          |
//! | [`SqliteRunRepository`] | single-node durable storage (sqlx)    |

#![deny(missing_docs)]

/// Repository error types.
pub mod error;
/// Run, status and attachment types.
pub mod model;
/// The repository trait and the in-memory implementation.
pub mod repository;
/// SQLite repository.
pub mod sqlite;

pub use error::{Result, StoreError};
pub use model::{Attachment, JobStatus, Parameter, Run, RunStatus};
pub use repository::{MemoryRunRepository, RunRepository};
pub use sqlite::SqliteRunRepository;
