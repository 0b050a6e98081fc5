// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed run repository.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::model::{Attachment, JobStatus, Run};
use crate::repository::{RunRepository, ensure_id};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const RUN_COLUMNS: &str = "id, status, job_status, model_id, template_id, data_set_id, \
     parameters, start_time, job_id, final_gap, solve_status, label, description, \
     min_gap, max_run_time";

/// Row shape of the `runs` table.
#[derive(Debug, sqlx::FromRow)]
struct RunRecord {
    id: String,
    status: String,
    job_status: Option<String>,
    model_id: String,
    template_id: String,
    data_set_id: String,
    parameters: String,
    start_time: Option<DateTime<Utc>>,
    job_id: Option<String>,
    final_gap: Option<f64>,
    solve_status: Option<String>,
    label: Option<String>,
    description: Option<String>,
    min_gap: f64,
    max_run_time: i64,
}

impl TryFrom<RunRecord> for Run {
    type Error = StoreError;

    fn try_from(record: RunRecord) -> Result<Self> {
        Ok(Run {
            id: record.id,
            status: record.status.parse()?,
            job_status: record
                .job_status
                .as_deref()
                .map(str::parse::<JobStatus>)
                .transpose()?,
            model_id: record.model_id,
            template_id: record.template_id,
            data_set_id: record.data_set_id,
            parameters: serde_json::from_str(&record.parameters)?,
            start_time: record.start_time,
            job_id: record.job_id,
            final_gap: record.final_gap,
            solve_status: record.solve_status,
            label: record.label,
            description: record.description,
            min_gap: record.min_gap,
            max_run_time: u32::try_from(record.max_run_time).unwrap_or(u32::MAX),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AttachmentRecord {
    name: String,
    content_type: String,
    data: Vec<u8>,
}

/// SQLite-backed run repository.
#[derive(Clone)]
pub struct SqliteRunRepository {
    pool: SqlitePool,
}

impl SqliteRunRepository {
    /// Wrap an existing pool. The schema must already be in place; see [`migrate`](Self::migrate).
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a database file and apply the schema.
    ///
    /// Parent directories are created when missing.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let repo = Self { pool };
        repo.migrate().await?;
        debug!(path = %path.display(), "Opened SQLite run repository");
        Ok(repo)
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RunRepository for SqliteRunRepository {
    async fn get(&self, run_id: &str) -> Result<Option<Run>> {
        let record = sqlx::query_as::<_, RunRecord>(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE id = ?"
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        record.map(Run::try_from).transpose()
    }

    async fn add(&self, mut run: Run) -> Result<Run> {
        ensure_id(&mut run);

        let result = sqlx::query(
            r#"
            INSERT INTO runs (id, status, job_status, model_id, template_id, data_set_id,
                              parameters, start_time, job_id, final_gap, solve_status,
                              label, description, min_gap, max_run_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(run.status.as_str())
        .bind(run.job_status.map(|s| s.as_str()))
        .bind(&run.model_id)
        .bind(&run.template_id)
        .bind(&run.data_set_id)
        .bind(serde_json::to_string(&run.parameters)?)
        .bind(run.start_time)
        .bind(&run.job_id)
        .bind(run.final_gap)
        .bind(&run.solve_status)
        .bind(&run.label)
        .bind(&run.description)
        .bind(run.min_gap)
        .bind(i64::from(run.max_run_time))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(run),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Duplicate(run.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, run: &Run) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = ?, job_status = ?, model_id = ?, template_id = ?, data_set_id = ?,
                parameters = ?, start_time = ?, job_id = ?, final_gap = ?, solve_status = ?,
                label = ?, description = ?, min_gap = ?, max_run_time = ?
            WHERE id = ?
            "#,
        )
        .bind(run.status.as_str())
        .bind(run.job_status.map(|s| s.as_str()))
        .bind(&run.model_id)
        .bind(&run.template_id)
        .bind(&run.data_set_id)
        .bind(serde_json::to_string(&run.parameters)?)
        .bind(run.start_time)
        .bind(&run.job_id)
        .bind(run.final_gap)
        .bind(&run.solve_status)
        .bind(&run.label)
        .bind(&run.description)
        .bind(run.min_gap)
        .bind(i64::from(run.max_run_time))
        .bind(&run.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(run.id.clone()));
        }
        Ok(())
    }

    async fn remove(&self, run_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM run_attachments WHERE run_id = ?")
            .bind(run_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM runs WHERE id = ?")
            .bind(run_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn all(&self) -> Result<Vec<Run>> {
        let records = sqlx::query_as::<_, RunRecord>(&format!(
            "SELECT {RUN_COLUMNS} FROM runs ORDER BY seq"
        ))
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(Run::try_from).collect()
    }

    async fn find_by_job_id(&self, job_id: &str) -> Result<Option<Run>> {
        let record = sqlx::query_as::<_, RunRecord>(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE job_id = ? ORDER BY seq LIMIT 1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        record.map(Run::try_from).transpose()
    }

    async fn attach(&self, run_id: &str, attachment: Attachment) -> Result<()> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound(run_id.to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO run_attachments (run_id, name, content_type, data)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (run_id, name)
            DO UPDATE SET content_type = excluded.content_type, data = excluded.data
            "#,
        )
        .bind(run_id)
        .bind(&attachment.name)
        .bind(&attachment.content_type)
        .bind(&attachment.data)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn attachment(&self, run_id: &str, name: &str) -> Result<Option<Attachment>> {
        let record = sqlx::query_as::<_, AttachmentRecord>(
            "SELECT name, content_type, data FROM run_attachments WHERE run_id = ? AND name = ?",
        )
        .bind(run_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(|r| Attachment {
            name: r.name,
            content_type: r.content_type,
            data: r.data,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunStatus;

    async fn test_repo() -> SqliteRunRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = SqliteRunRepository::new(pool);
        repo.migrate().await.unwrap();
        repo
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let repo = test_repo().await;
        let mut run = Run::new("model-1", "tpl-1", "ds-1")
            .with_parameter("weights", serde_json::json!([1, 2]))
            .with_label("nightly");
        run.start_time = Some(Utc::now());

        let stored = repo.add(run).await.unwrap();
        let loaded = repo.get(&stored.id).await.unwrap().unwrap();

        assert_eq!(loaded.model_id, "model-1");
        assert_eq!(loaded.status, RunStatus::Queued);
        assert_eq!(loaded.parameters, stored.parameters);
        assert_eq!(loaded.label.as_deref(), Some("nightly"));
        assert!(loaded.start_time.is_some());
    }

    #[tokio::test]
    async fn test_update_persists_job_fields() {
        let repo = test_repo().await;
        let mut run = repo.add(Run::new("m", "t", "d")).await.unwrap();

        run.status = RunStatus::Completed;
        run.job_status = Some(JobStatus::Completed);
        run.job_id = Some("job-1".into());
        run.final_gap = Some(0.004);
        run.solve_status = Some("OPTIMAL_SOLUTION".into());
        repo.update(&run).await.unwrap();

        let loaded = repo.find_by_job_id("job-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
        assert_eq!(loaded.job_status, Some(JobStatus::Completed));
        assert_eq!(loaded.final_gap, Some(0.004));
        assert_eq!(loaded.solve_status.as_deref(), Some("OPTIMAL_SOLUTION"));
    }

    #[tokio::test]
    async fn test_update_missing_run_is_not_found() {
        let repo = test_repo().await;
        let mut run = Run::new("m", "t", "d");
        run.id = "missing".into();
        assert!(matches!(
            repo.update(&run).await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_add_is_rejected() {
        let repo = test_repo().await;
        let run = repo.add(Run::new("m", "t", "d")).await.unwrap();
        assert!(matches!(
            repo.add(run).await.unwrap_err(),
            StoreError::Duplicate(_)
        ));
    }

    #[tokio::test]
    async fn test_attachments_replace_and_cascade() {
        let repo = test_repo().await;
        let run = repo.add(Run::new("m", "t", "d")).await.unwrap();

        repo.attach(&run.id, Attachment::new("solution.json", "application/json", b"{}".to_vec()))
            .await
            .unwrap();
        repo.attach(
            &run.id,
            Attachment::new("solution.json", "application/json", b"{\"a\":1}".to_vec()),
        )
        .await
        .unwrap();

        let att = repo.attachment(&run.id, "solution.json").await.unwrap().unwrap();
        assert_eq!(att.data, b"{\"a\":1}".to_vec());

        assert!(repo.remove(&run.id).await.unwrap());
        assert!(repo.attachment(&run.id, "solution.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_attach_to_missing_run_fails() {
        let repo = test_repo().await;
        let err = repo
            .attach("nope", Attachment::new("execution.log", "text/plain", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_all_is_in_creation_order() {
        let repo = test_repo().await;
        let a = repo.add(Run::new("m", "t", "d")).await.unwrap();
        let b = repo.add(Run::new("m", "t", "d")).await.unwrap();
        let c = repo.add(Run::new("m", "t", "d")).await.unwrap();

        let ids: Vec<_> = repo.all().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }
}
