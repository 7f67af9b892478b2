//! Task lifecycle across the manager, store and queue together.

use tempo::{JobState, QueueBackend, RepeatOpts, TaskDraft, TaskManager, TaskStatus, TaskStore};

use crate::common;

#[tokio::test]
async fn test_create_persists_accepted_repeat_opts() {
    let fx = common::fixture();

    let task = fx
        .manager
        .create(TaskDraft::interval("sync", "EchoJob.echo", 60_000))
        .await
        .unwrap();

    // The stored copy must decode back to exactly what the queue accepted.
    let raw = task.job_opts.as_deref().unwrap();
    let opts: RepeatOpts = serde_json::from_str(raw).unwrap();
    assert_eq!(opts.task_id, task.id);
    assert_eq!(opts.every_ms, Some(60_000));
    assert!(opts.cron.is_none());
    assert!(opts.limit.is_none());

    let rules = fx.queue.repeatable_jobs().await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].opts, opts);
}

#[tokio::test]
async fn test_cron_opts_keep_window_and_limit() {
    let fx = common::fixture();

    let end = chrono::Utc::now() + chrono::Duration::days(30);
    let task = fx
        .manager
        .create(
            TaskDraft::cron("report", "EchoJob.echo", "0 3 * * *")
                .with_limit(5)
                .with_window(None, Some(end)),
        )
        .await
        .unwrap();

    let opts: RepeatOpts = serde_json::from_str(task.job_opts.as_deref().unwrap()).unwrap();
    assert_eq!(opts.cron.as_deref(), Some("0 3 * * *"));
    assert_eq!(opts.limit, Some(5));
    assert_eq!(opts.end_at, Some(end));
}

#[tokio::test]
async fn test_update_reschedules_rule() {
    let fx = common::fixture();

    let task = fx
        .manager
        .create(TaskDraft::interval("sync", "EchoJob.echo", 60_000))
        .await
        .unwrap();

    fx.manager
        .update(task.id, TaskDraft::interval("sync", "EchoJob.echo", 120_000))
        .await
        .unwrap();

    let rules = fx.queue.repeatable_jobs().await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].opts.every_ms, Some(120_000));

    // Exactly the one entry materialized from the new rule remains.
    let pending = fx.queue.jobs_in(&JobState::ALL).await.unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn test_stop_from_fresh_manager_uses_persisted_opts() {
    let fx = common::fixture();

    let task = fx
        .manager
        .create(TaskDraft::interval("sync", "EchoJob.echo", 60_000))
        .await
        .unwrap();

    // A different replica sharing the same backends can tear the rule down
    // using only what was persisted at start time.
    let other = TaskManager::new(
        fx.store.clone(),
        fx.store.clone(),
        fx.queue.clone(),
        fx.registry.clone(),
        "tempo",
    );
    other.stop(task.id).await.unwrap();

    assert!(fx.queue.repeatable_jobs().await.unwrap().is_empty());
    assert!(fx.queue.jobs_in(&JobState::ALL).await.unwrap().is_empty());
    assert_eq!(
        fx.store.get(task.id).await.unwrap().status,
        TaskStatus::Disabled
    );
}

#[tokio::test]
async fn test_delete_leaves_no_trace() {
    let fx = common::fixture();

    let task = fx
        .manager
        .create(TaskDraft::interval("sync", "EchoJob.echo", 60_000))
        .await
        .unwrap();
    fx.manager.delete(task.id).await.unwrap();

    assert!(fx.store.get(task.id).await.is_err());
    assert!(fx.queue.repeatable_jobs().await.unwrap().is_empty());
    assert!(fx.queue.jobs_in(&JobState::ALL).await.unwrap().is_empty());
}
