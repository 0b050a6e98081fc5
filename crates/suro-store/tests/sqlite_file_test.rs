// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the file-backed SQLite repository.

use suro_store::{
    Attachment, JobStatus, Run, RunRepository, RunStatus, SqliteRunRepository, StoreError,
};

#[tokio::test]
async fn test_runs_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/suro.db");

    let id = {
        let repo = SqliteRunRepository::from_path(&path).await.unwrap();
        let mut run = repo
            .add(
                Run::new("rostering", "tpl-1", "week-1")
                    .with_parameter("horizon", 14)
                    .with_label("nightly"),
            )
            .await
            .unwrap();
        run.status = RunStatus::Processing;
        run.job_status = Some(JobStatus::Running);
        run.job_id = Some("job-7".to_string());
        repo.update(&run).await.unwrap();
        repo.attach(
            &run.id,
            Attachment::new("execution.log", "text/plain", b"solving\n".to_vec()),
        )
        .await
        .unwrap();
        repo.pool().close().await;
        run.id
    };

    let repo = SqliteRunRepository::from_path(&path).await.unwrap();
    let run = repo.get(&id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Processing);
    assert_eq!(run.job_status, Some(JobStatus::Running));
    assert_eq!(run.job_id.as_deref(), Some("job-7"));
    assert_eq!(run.label.as_deref(), Some("nightly"));
    assert_eq!(run.parameter("horizon"), Some(&serde_json::json!(14)));

    assert_eq!(repo.find_by_job_id("job-7").await.unwrap().unwrap().id, id);
    let log = repo.attachment(&id, "execution.log").await.unwrap().unwrap();
    assert_eq!(log.data, b"solving\n");
}

#[tokio::test]
async fn test_duplicate_id_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let repo = SqliteRunRepository::from_path(dir.path().join("suro.db"))
        .await
        .unwrap();

    let run = repo.add(Run::new("m", "t", "d")).await.unwrap();
    let err = repo.add(run.clone()).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));
}
