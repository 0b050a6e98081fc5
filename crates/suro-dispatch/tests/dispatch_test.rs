// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end dispatch tests against the mock backend.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{TestContext, new_run, wait_until};
use serde_json::json;
use suro_dispatch::backend::{ExecutionStatus, MockBackend};
use suro_dispatch::catalog::ModelCatalog;
use suro_dispatch::core::Core;
use suro_dispatch::executor::{LOG_ATTACHMENT, SOLUTION_ATTACHMENT};
use suro_dispatch::notify::NotificationBus;
use suro_dispatch::request::{DATA_INPUT, TEMPLATE_PARAMETER};
use suro_dispatch::Error;
use suro_store::{
    Attachment, JobStatus, MemoryRunRepository, Run, RunRepository, RunStatus, StoreError,
};

/// Catalog whose model files cannot be read.
struct UnreadableCatalog;

#[async_trait]
impl ModelCatalog for UnreadableCatalog {
    async fn model_script(&self, model_id: &str) -> suro_dispatch::error::Result<Option<String>> {
        Err(Error::Other(format!("models/{model_id}.mod is not valid UTF-8")))
    }

    async fn data_set(&self, _data_set_id: &str) -> suro_dispatch::error::Result<Option<String>> {
        Ok(Some("n = 7;".to_string()))
    }
}

/// Repository that refuses to record a remote job on a run.
#[derive(Default)]
struct JobBindingFailsRepository {
    inner: MemoryRunRepository,
}

#[async_trait]
impl RunRepository for JobBindingFailsRepository {
    async fn get(&self, run_id: &str) -> suro_store::Result<Option<Run>> {
        self.inner.get(run_id).await
    }

    async fn add(&self, run: Run) -> suro_store::Result<Run> {
        self.inner.add(run).await
    }

    async fn update(&self, run: &Run) -> suro_store::Result<()> {
        if run.job_id.is_some() {
            return Err(StoreError::Io(std::io::Error::other("disk full")));
        }
        self.inner.update(run).await
    }

    async fn remove(&self, run_id: &str) -> suro_store::Result<bool> {
        self.inner.remove(run_id).await
    }

    async fn all(&self) -> suro_store::Result<Vec<Run>> {
        self.inner.all().await
    }

    async fn find_by_job_id(&self, job_id: &str) -> suro_store::Result<Option<Run>> {
        self.inner.find_by_job_id(job_id).await
    }

    async fn attach(&self, run_id: &str, attachment: Attachment) -> suro_store::Result<()> {
        self.inner.attach(run_id, attachment).await
    }

    async fn attachment(&self, run_id: &str, name: &str) -> suro_store::Result<Option<Attachment>> {
        self.inner.attachment(run_id, name).await
    }
}

async fn reaches(core: &Arc<Core>, run_id: &str, status: RunStatus) -> bool {
    wait_until(|| {
        let core = core.clone();
        let id = run_id.to_string();
        async move { matches!(core.get_run(&id).await, Ok(Some(run)) if run.status == status) }
    })
    .await
}

async fn pool_is_idle(core: &Arc<Core>) -> bool {
    wait_until(|| {
        let core = core.clone();
        async move {
            core.job_controller()
                .executors()
                .await
                .iter()
                .all(|slot| !slot.busy)
        }
    })
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_completes_end_to_end() {
    let ctx = TestContext::started(2).await;
    let run = ctx.submit().await;
    assert_eq!(run.status, RunStatus::Queued);

    let job_id = ctx.wait_for_job(&run.id).await;
    ctx.wait_for_status(&run.id, RunStatus::Processing).await;
    assert_eq!(
        ctx.backend.parameter(&job_id, TEMPLATE_PARAMETER).await.as_deref(),
        Some(common::TEMPLATE_ID)
    );
    let dat = ctx.backend.input(&job_id, DATA_INPUT).await.unwrap();
    assert_eq!(String::from_utf8(dat).unwrap(), "n = 7;\nhorizon = 14;\n");

    ctx.backend
        .complete_job(&job_id, Some(json!({"finalGap": {"value": 0.0125}})))
        .await;

    let done = ctx.wait_for_status(&run.id, RunStatus::Completed).await;
    assert_eq!(done.job_status, Some(JobStatus::Completed));
    assert_eq!(done.final_gap, Some(0.0125));
    assert_eq!(done.solve_status.as_deref(), Some("OPTIMAL_SOLUTION"));

    let solution = ctx
        .core
        .run_controller()
        .get_attachment(&run.id, SOLUTION_ATTACHMENT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(solution.content_type, "application/json");
    assert!(
        ctx.core
            .run_controller()
            .get_attachment(&run.id, LOG_ATTACHMENT)
            .await
            .unwrap()
            .is_some()
    );

    ctx.wait_for_idle_pool().await;
    let backend = ctx.backend.clone();
    assert!(
        wait_until(|| {
            let backend = backend.clone();
            async move { backend.job_ids().await.is_empty() }
        })
        .await
    );

    ctx.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_progress_gap_wins_over_solution_gap() {
    let ctx = TestContext::started(1).await;
    let run = ctx.submit().await;
    let job_id = ctx.wait_for_job(&run.id).await;

    ctx.backend.set_detail(&job_id, "PROGRESS_GAP", "0.004").await;
    ctx.backend
        .complete_job(&job_id, Some(json!({"finalGap": {"value": 0.5}})))
        .await;

    let done = ctx.wait_for_status(&run.id, RunStatus::Completed).await;
    assert_eq!(done.final_gap, Some(0.004));
    ctx.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_completion_without_solution_is_unknown() {
    let ctx = TestContext::started(1).await;
    let run = ctx.submit().await;
    let job_id = ctx.wait_for_job(&run.id).await;

    ctx.backend.complete_job(&job_id, None).await;

    let done = ctx.wait_for_status(&run.id, RunStatus::Completed).await;
    assert_eq!(done.solve_status.as_deref(), Some("UNKNOWN"));
    assert_eq!(done.final_gap, None);
    ctx.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_live_log_is_broadcast() {
    let ctx = TestContext::started(1).await;
    let mut rx = ctx.bus.subscribe();
    let run = ctx.submit().await;
    let job_id = ctx.wait_for_job(&run.id).await;

    ctx.backend.emit_log(&job_id, "Tried aggregator 1 time.").await;
    ctx.backend
        .emit_log(
            &job_id,
            "*     0+    0                          124.0000      102.0000       10   17.74%",
        )
        .await;

    let topic = format!("optim:log:{}", run.id);
    let entry = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let msg = rx.recv().await.unwrap();
            if msg.topic == topic {
                return msg.payload;
            }
        }
    })
    .await
    .unwrap();

    let entry: serde_json::Value = serde_json::from_str(&entry).unwrap();
    assert_eq!(entry["isSolution"], true);
    assert_eq!(entry["bestInteger"], 124.0);
    ctx.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_each_run_leaves_the_queue_once() {
    let ctx = TestContext::ready_without_workers(1).await;
    let mut submitted = HashSet::new();
    for _ in 0..50 {
        submitted.insert(ctx.submit().await.id);
    }

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let core = ctx.core.clone();
        tasks.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(run) = core.get_next_run().await.unwrap() {
                claimed.push(run.id);
            }
            claimed
        }));
    }

    let mut claimed = Vec::new();
    for task in futures::future::join_all(tasks).await {
        claimed.extend(task.unwrap());
    }
    assert_eq!(claimed.len(), 50);
    assert_eq!(claimed.into_iter().collect::<HashSet<_>>(), submitted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_never_binds_a_run_twice() {
    let ctx = TestContext::started(4).await;
    let mut runs = Vec::new();
    for _ in 0..12 {
        runs.push(ctx.submit().await.id);
    }

    let backend = ctx.backend.clone();
    let core = ctx.core.clone();
    let all_done = wait_until(|| {
        let backend = backend.clone();
        let core = core.clone();
        let runs = runs.clone();
        async move {
            let slots = core.job_controller().executors().await;
            let bound: Vec<_> = slots.iter().filter_map(|s| s.run_id.clone()).collect();
            let unique: HashSet<_> = bound.iter().collect();
            assert_eq!(bound.len(), unique.len(), "run bound to two executors");

            for job_id in backend.job_ids().await {
                if backend.status(&job_id).await == Some(ExecutionStatus::Running) {
                    backend.complete_job(&job_id, None).await;
                }
            }

            for id in &runs {
                match core.get_run(id).await {
                    Ok(Some(run)) if run.status == RunStatus::Completed => {}
                    _ => return false,
                }
            }
            true
        }
    })
    .await;

    assert!(all_done, "not every run completed");
    assert_eq!(ctx.backend.submissions(), 12);
    ctx.core.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_enqueue_is_rejected() {
    let ctx = TestContext::ready_without_workers(1).await;
    let run = ctx.submit().await;

    assert!(!ctx.core.run_controller().add_run(run.clone()));
    assert_eq!(ctx.core.queue_snapshot().len(), 1);
}

#[tokio::test]
async fn test_abort_before_submit() {
    let ctx = TestContext::ready_without_workers(1).await;
    let run = ctx.submit().await;

    assert!(ctx.core.abort_run(&run.id).await.unwrap());

    let aborted = ctx.run(&run.id).await;
    assert_eq!(aborted.status, RunStatus::Aborted);
    assert_eq!(aborted.job_status, None);
    assert!(ctx.core.queue_snapshot().is_empty());
    assert_eq!(ctx.backend.submit_attempts(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abort_after_submit() {
    let ctx = TestContext::started(1).await;
    let run = ctx.submit().await;
    let job_id = ctx.wait_for_job(&run.id).await;
    ctx.wait_for_status(&run.id, RunStatus::Processing).await;

    assert!(ctx.core.abort_run(&run.id).await.unwrap());
    assert_eq!(ctx.backend.aborts(), 1);

    let aborted = ctx.wait_for_status(&run.id, RunStatus::Aborted).await;
    assert_eq!(aborted.job_status, Some(JobStatus::Interrupt));

    ctx.wait_for_idle_pool().await;
    let backend = ctx.backend.clone();
    let id = job_id.clone();
    assert!(
        wait_until(|| {
            let backend = backend.clone();
            let id = id.clone();
            async move { backend.status(&id).await.is_none() }
        })
        .await
    );
    ctx.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abort_after_submit_when_backend_unreachable() {
    let ctx = TestContext::started(1).await;
    let run = ctx.submit().await;
    ctx.wait_for_job(&run.id).await;
    ctx.wait_for_status(&run.id, RunStatus::Processing).await;

    ctx.backend.set_abort_unreachable(true);
    assert!(ctx.core.abort_run(&run.id).await.unwrap());

    assert_eq!(ctx.run(&run.id).await.status, RunStatus::Aborted);
    ctx.wait_for_idle_pool().await;
    ctx.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abort_during_submission_discards_the_job() {
    let ctx = TestContext::started(1).await;
    ctx.backend.set_submit_delay(Duration::from_millis(200));
    let run = ctx.submit().await;

    let backend = ctx.backend.clone();
    assert!(
        wait_until(|| {
            let backend = backend.clone();
            async move { backend.submit_attempts() == 1 }
        })
        .await
    );
    assert!(ctx.core.abort_run(&run.id).await.unwrap());
    assert_eq!(ctx.run(&run.id).await.status, RunStatus::Aborted);

    assert!(
        wait_until(|| {
            let backend = backend.clone();
            async move { backend.deletes() == 1 }
        })
        .await
    );
    assert!(ctx.backend.job_ids().await.is_empty());

    let aborted = ctx.run(&run.id).await;
    assert_eq!(aborted.status, RunStatus::Aborted);
    assert_eq!(aborted.job_id, None);
    ctx.core.shutdown().await;
}

#[tokio::test]
async fn test_complete_does_not_override_aborting() {
    let ctx = TestContext::ready_without_workers(1).await;
    let run = ctx.submit().await;
    {
        let mut guard = ctx.core.run_controller().lock().await;
        let mut stored = guard.get_run(&run.id).await.unwrap().unwrap();
        guard
            .set_run_status(&mut stored, RunStatus::Aborting)
            .await
            .unwrap();
    }

    ctx.core.complete_run(&run.id).await.unwrap();
    assert_eq!(ctx.run(&run.id).await.status, RunStatus::Aborting);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resume_attaches_to_surviving_job() {
    let repo = Arc::new(MemoryRunRepository::new());
    let backend = Arc::new(MockBackend::new());

    let mut interrupted = new_run();
    interrupted.status = RunStatus::Processing;
    interrupted.job_status = Some(JobStatus::Running);
    interrupted.job_id = Some("job-survivor".to_string());
    let interrupted = repo.add(interrupted).await.unwrap();
    backend
        .insert_job("job-survivor", ExecutionStatus::Running)
        .await;
    backend.insert_job("job-orphan", ExecutionStatus::Running).await;

    let ctx = TestContext::with_parts(2, repo, backend);
    ctx.core.start().await;

    let core = ctx.core.clone();
    assert!(
        wait_until(|| {
            let core = core.clone();
            async move {
                core.job_controller()
                    .executors()
                    .await
                    .iter()
                    .any(|s| s.job_id.as_deref() == Some("job-survivor"))
            }
        })
        .await
    );
    ctx.wait_for_status(&interrupted.id, RunStatus::Processing).await;
    assert_eq!(ctx.backend.submit_attempts(), 0);
    assert_eq!(ctx.backend.job_ids().await, vec!["job-survivor".to_string()]);

    ctx.backend.complete_job("job-survivor", None).await;
    let done = ctx.wait_for_status(&interrupted.id, RunStatus::Completed).await;
    assert_eq!(done.job_id.as_deref(), Some("job-survivor"));
    assert_eq!(ctx.backend.submissions(), 0);
    ctx.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resume_resubmits_when_job_is_gone() {
    let repo = Arc::new(MemoryRunRepository::new());
    let mut interrupted = new_run();
    interrupted.status = RunStatus::Processing;
    interrupted.job_id = Some("job-lost".to_string());
    let interrupted = repo.add(interrupted).await.unwrap();

    let ctx = TestContext::with_parts(1, repo, Arc::new(MockBackend::new()));
    ctx.core.start().await;

    let core = ctx.core.clone();
    let id = interrupted.id.clone();
    assert!(
        wait_until(|| {
            let core = core.clone();
            let id = id.clone();
            async move {
                matches!(
                    core.get_run(&id).await,
                    Ok(Some(run)) if run.job_id.as_deref().is_some_and(|j| j != "job-lost")
                )
            }
        })
        .await
    );
    assert_eq!(ctx.backend.submissions(), 1);
    ctx.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resume_finalizes_aborting_runs() {
    let repo = Arc::new(MemoryRunRepository::new());
    let mut stuck = new_run();
    stuck.status = RunStatus::Aborting;
    stuck.job_status = Some(JobStatus::Running);
    let stuck = repo.add(stuck).await.unwrap();

    let ctx = TestContext::with_parts(1, repo, Arc::new(MockBackend::new()));
    ctx.core.start().await;

    let aborted = ctx.wait_for_status(&stuck.id, RunStatus::Aborted).await;
    assert_eq!(aborted.job_status, Some(JobStatus::Interrupt));
    assert_eq!(ctx.backend.submit_attempts(), 0);
    ctx.core.shutdown().await;
}

#[tokio::test]
async fn test_completions_wait_for_ready() {
    let ctx = TestContext::ready_without_workers(1).await;
    let run = ctx.submit().await;
    {
        let mut guard = ctx.core.run_controller().lock().await;
        let mut stored = guard.get_run(&run.id).await.unwrap().unwrap();
        guard
            .set_run_status(&mut stored, RunStatus::CollectingResults)
            .await
            .unwrap();
    }

    ctx.core.set_ready(false).await;
    ctx.core.complete_run(&run.id).await.unwrap();
    assert_eq!(ctx.run(&run.id).await.status, RunStatus::CollectingResults);

    ctx.core.set_ready(true).await;
    assert_eq!(ctx.run(&run.id).await.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let ctx = TestContext::ready_without_workers(1).await;
    ctx.backend.insert_job("orphan-1", ExecutionStatus::Running).await;
    ctx.backend.insert_job("orphan-2", ExecutionStatus::Processed).await;

    let mut owned = ctx.submit().await;
    owned.job_id = Some("owned".to_string());
    ctx.core.run_controller().lock().await.update_run(&owned).await.unwrap();
    ctx.backend.insert_job("owned", ExecutionStatus::Running).await;

    assert_eq!(ctx.core.job_controller().cleanup_jobs().await.unwrap(), 2);
    assert_eq!(ctx.core.job_controller().cleanup_jobs().await.unwrap(), 0);
    assert_eq!(ctx.backend.job_ids().await, vec!["owned".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_job_limit_aborts_run() {
    let ctx = TestContext::started(1).await;
    ctx.backend.set_job_limit(true);
    let run = ctx.submit().await;

    let aborted = ctx.wait_for_status(&run.id, RunStatus::Aborted).await;
    assert_eq!(aborted.job_id, None);
    assert_eq!(ctx.backend.submissions(), 0);
    ctx.wait_for_idle_pool().await;
    ctx.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_model_makes_run_invalid() {
    let ctx = TestContext::started(1).await;
    let run = ctx
        .core
        .submit_run(Run::new("unknown-model", "tpl", common::DATA_SET_ID))
        .await
        .unwrap()
        .unwrap();

    ctx.wait_for_status(&run.id, RunStatus::Invalid).await;
    assert_eq!(ctx.backend.submit_attempts(), 0);
    ctx.wait_for_idle_pool().await;
    ctx.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_submission_failure_fails_run() {
    let ctx = TestContext::started(1).await;
    ctx.backend.set_submit_unreachable(true);
    let run = ctx.submit().await;

    let failed = ctx.wait_for_status(&run.id, RunStatus::Failed).await;
    assert_eq!(failed.job_status, Some(JobStatus::Failed));
    assert_eq!(ctx.backend.submit_attempts(), 1);
    ctx.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_job_fails_run() {
    let ctx = TestContext::started(1).await;
    let run = ctx.submit().await;
    let job_id = ctx.wait_for_job(&run.id).await;

    ctx.backend.fail_job(&job_id).await;

    let failed = ctx.wait_for_status(&run.id, RunStatus::Failed).await;
    assert_eq!(failed.job_status, Some(JobStatus::Failed));
    ctx.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_resubmits_failed_run() {
    let ctx = TestContext::started(1).await;
    let run = ctx.submit().await;
    let first_job = ctx.wait_for_job(&run.id).await;
    ctx.backend.fail_job(&first_job).await;
    ctx.wait_for_status(&run.id, RunStatus::Failed).await;
    ctx.wait_for_idle_pool().await;

    assert!(ctx.core.restart_run(&run.id).await.unwrap());

    let core = ctx.core.clone();
    let id = run.id.clone();
    let first = first_job.clone();
    assert!(
        wait_until(|| {
            let core = core.clone();
            let id = id.clone();
            let first = first.clone();
            async move {
                matches!(
                    core.get_run(&id).await,
                    Ok(Some(run)) if run.status == RunStatus::Processing
                        && run.job_id.as_deref().is_some_and(|j| j != first)
                )
            }
        })
        .await
    );
    assert_eq!(ctx.backend.submissions(), 2);
    ctx.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delete_running_run() {
    let ctx = TestContext::started(1).await;
    let run = ctx.submit().await;
    let job_id = ctx.wait_for_job(&run.id).await;

    assert!(ctx.core.delete_run(&run.id).await.unwrap());

    assert!(ctx.core.get_run(&run.id).await.unwrap().is_none());
    assert!(ctx.backend.status(&job_id).await.is_none());
    ctx.wait_for_idle_pool().await;
    ctx.core.shutdown().await;
}

#[tokio::test]
async fn test_delete_unknown_run() {
    let ctx = TestContext::ready_without_workers(1).await;
    assert!(!ctx.core.delete_run("missing").await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unreadable_model_invalidates_run_and_keeps_worker() {
    let backend = Arc::new(MockBackend::new());
    let core = common::fast_core(
        1,
        Arc::new(MemoryRunRepository::new()),
        backend.clone(),
        Arc::new(UnreadableCatalog),
        NotificationBus::default(),
    );
    core.start().await;

    let first = core.submit_run(new_run()).await.unwrap().unwrap();
    let second = core.submit_run(new_run()).await.unwrap().unwrap();

    assert!(reaches(&core, &first.id, RunStatus::Invalid).await);
    assert!(reaches(&core, &second.id, RunStatus::Invalid).await);
    assert!(pool_is_idle(&core).await);
    assert!(core.queue_snapshot().is_empty());
    assert_eq!(backend.submit_attempts(), 0);
    core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_storage_failure_after_submit_fails_run_and_releases_worker() {
    let backend = Arc::new(MockBackend::new());
    let catalog = Arc::new(
        suro_dispatch::catalog::MemoryCatalog::new()
            .with_model(common::MODEL_ID, "int n = ...;")
            .with_data_set(common::DATA_SET_ID, "n = 7;"),
    );
    let core = common::fast_core(
        1,
        Arc::new(JobBindingFailsRepository::default()),
        backend.clone(),
        catalog,
        NotificationBus::default(),
    );
    core.start().await;

    let run = core.submit_run(new_run()).await.unwrap().unwrap();

    assert!(reaches(&core, &run.id, RunStatus::Failed).await);
    assert_eq!(
        core.get_run(&run.id).await.unwrap().unwrap().job_status,
        Some(JobStatus::Failed)
    );
    assert!(pool_is_idle(&core).await);
    assert_eq!(backend.submissions(), 1);

    let jobs_left = backend.clone();
    assert!(
        wait_until(|| {
            let backend = jobs_left.clone();
            async move { backend.job_ids().await.is_empty() }
        })
        .await,
        "unrecorded job was not discarded"
    );
    core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abort_while_resubmitting_resumed_run() {
    let repo = Arc::new(MemoryRunRepository::new());
    let mut interrupted = new_run();
    interrupted.status = RunStatus::Processing;
    interrupted.job_id = Some("job-lost".to_string());
    let interrupted = repo.add(interrupted).await.unwrap();

    let ctx = TestContext::with_parts(1, repo, Arc::new(MockBackend::new()));
    ctx.backend.set_submit_delay(Duration::from_millis(300));
    ctx.core.start().await;

    let backend = ctx.backend.clone();
    assert!(
        wait_until(|| {
            let backend = backend.clone();
            async move { backend.submit_attempts() == 1 }
        })
        .await
    );
    assert!(ctx.core.abort_run(&interrupted.id).await.unwrap());

    ctx.wait_for_status(&interrupted.id, RunStatus::Aborted).await;
    assert!(
        wait_until(|| {
            let backend = backend.clone();
            async move { backend.job_ids().await.is_empty() }
        })
        .await,
        "resubmitted job kept running"
    );
    ctx.wait_for_idle_pool().await;
    assert_eq!(ctx.run(&interrupted.id).await.status, RunStatus::Aborted);
    ctx.core.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_of_aborting_run_changes_nothing() {
    let ctx = TestContext::started(1).await;
    let run = ctx.submit().await;
    let job_id = ctx.wait_for_job(&run.id).await;
    ctx.wait_for_status(&run.id, RunStatus::Processing).await;
    {
        let mut guard = ctx.core.run_controller().lock().await;
        let mut stored = guard.get_run(&run.id).await.unwrap().unwrap();
        guard
            .set_run_status(&mut stored, RunStatus::Aborting)
            .await
            .unwrap();
    }

    assert!(!ctx.core.restart_run(&run.id).await.unwrap());

    assert_eq!(ctx.run(&run.id).await.status, RunStatus::Aborting);
    let slots = ctx.core.job_controller().executors().await;
    assert_eq!(slots[0].run_id.as_deref(), Some(run.id.as_str()));
    assert_eq!(ctx.backend.status(&job_id).await, Some(ExecutionStatus::Running));
    assert!(ctx.core.queue_snapshot().is_empty());

    ctx.backend
        .set_status(&job_id, ExecutionStatus::Interrupted)
        .await;
    let aborted = ctx.wait_for_status(&run.id, RunStatus::Aborted).await;
    assert_eq!(aborted.job_status, Some(JobStatus::Interrupt));
    ctx.core.shutdown().await;
}
