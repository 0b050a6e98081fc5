// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for suro-dispatch.

use thiserror::Error;

/// Dispatch errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Run repository operation failed.
    #[error("Store error: {0}")]
    Store(#[from] suro_store::StoreError),

    /// Remote backend call failed.
    #[error("Backend error: {0}")]
    Backend(#[from] crate::backend::BackendError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run was not found.
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using dispatch [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
