// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for suro-store.

use thiserror::Error;

/// Repository errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Run was not found.
    #[error("Run not found: {0}")]
    NotFound(String),

    /// A run with this id already exists.
    #[error("Run already exists: {0}")]
    Duplicate(String),

    /// Stored status string is not a known status.
    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type using [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;
