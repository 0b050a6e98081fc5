// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Source of model scripts and data sets.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Looks up the inputs a run refers to.
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    /// Model script for a model id. `Ok(None)` when unknown.
    async fn model_script(&self, model_id: &str) -> Result<Option<String>>;

    /// Data file for a data set id. `Ok(None)` when unknown.
    async fn data_set(&self, data_set_id: &str) -> Result<Option<String>>;
}

/// In-memory catalog.
#[derive(Default)]
pub struct MemoryCatalog {
    models: RwLock<HashMap<String, String>>,
    data_sets: RwLock<HashMap<String, String>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(self, id: impl Into<String>, script: impl Into<String>) -> Self {
        self.add_model(id, script);
        self
    }

    pub fn with_data_set(self, id: impl Into<String>, dat: impl Into<String>) -> Self {
        self.add_data_set(id, dat);
        self
    }

    pub fn add_model(&self, id: impl Into<String>, script: impl Into<String>) {
        if let Ok(mut models) = self.models.write() {
            models.insert(id.into(), script.into());
        }
    }

    pub fn add_data_set(&self, id: impl Into<String>, dat: impl Into<String>) {
        if let Ok(mut data_sets) = self.data_sets.write() {
            data_sets.insert(id.into(), dat.into());
        }
    }
}

#[async_trait]
impl ModelCatalog for MemoryCatalog {
    async fn model_script(&self, model_id: &str) -> Result<Option<String>> {
        let models = self
            .models
            .read()
            .map_err(|_| Error::Other("model catalog lock poisoned".into()))?;
        Ok(models.get(model_id).cloned())
    }

    async fn data_set(&self, data_set_id: &str) -> Result<Option<String>> {
        let data_sets = self
            .data_sets
            .read()
            .map_err(|_| Error::Other("data set catalog lock poisoned".into()))?;
        Ok(data_sets.get(data_set_id).cloned())
    }
}

/// Catalog backed by a directory:
/// `<root>/models/<id>.mod` and `<root>/data/<id>.dat`.
pub struct FileCatalog {
    root: PathBuf,
}

impl FileCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, dir: &str, id: &str, ext: &str) -> Option<PathBuf> {
        // Ids become file names; refuse anything that could leave the directory.
        if id.is_empty() || id.contains(|c: char| c == '/' || c == '\\') || id.starts_with('.') {
            return None;
        }
        Some(self.root.join(dir).join(format!("{id}.{ext}")))
    }

    async fn read(path: Option<PathBuf>) -> Result<Option<String>> {
        let Some(path) = path else {
            return Ok(None);
        };
        read_optional(&path).await
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Other(format!("failed to read {}: {e}", path.display()))),
    }
}

#[async_trait]
impl ModelCatalog for FileCatalog {
    async fn model_script(&self, model_id: &str) -> Result<Option<String>> {
        Self::read(self.path("models", model_id, "mod")).await
    }

    async fn data_set(&self, data_set_id: &str) -> Result<Option<String>> {
        Self::read(self.path("data", data_set_id, "dat")).await
    }
}
