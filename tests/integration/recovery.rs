//! Restart recovery against shared backends.

use std::sync::Arc;
use std::time::Duration;

use tempo::{
    JobPayload, JobState, QueueBackend, TaskDraft, TaskId, TaskManager, TaskStatus, TaskStore,
};

use crate::common;

#[tokio::test]
async fn test_fresh_process_rebuilds_queue_from_store() {
    let fx = common::fixture();

    let active = fx
        .manager
        .create(TaskDraft::interval("active", "EchoJob.echo", 60_000))
        .await
        .unwrap();
    let disabled = fx
        .manager
        .create(
            TaskDraft::interval("disabled", "EchoJob.echo", 60_000)
                .with_status(TaskStatus::Disabled),
        )
        .await
        .unwrap();

    // Leftovers from the crashed process.
    fx.queue
        .add_once(JobPayload {
            id: TaskId::new(999),
            service: "EchoJob.echo".into(),
            data: String::new(),
        })
        .await
        .unwrap();

    // A new manager over the same backends stands in for the restarted
    // process.
    let restarted = Arc::new(TaskManager::new(
        fx.store.clone(),
        fx.store.clone(),
        fx.queue.clone(),
        fx.registry.clone(),
        "tempo",
    ));
    restarted.recover().await.unwrap();

    let rules = fx.queue.repeatable_jobs().await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].task_id(), active.id);

    let entries = fx.queue.jobs_in(&JobState::ALL).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].payload.id, active.id);

    assert_eq!(
        fx.store.get(disabled.id).await.unwrap().status,
        TaskStatus::Disabled
    );
}

#[tokio::test]
async fn test_lock_is_released_after_recovery() {
    let fx = common::fixture();
    fx.manager
        .create(TaskDraft::interval("t", "EchoJob.echo", 60_000))
        .await
        .unwrap();

    fx.manager.recover().await.unwrap();
    fx.manager.recover().await.unwrap();

    // Both passes ran to completion: still exactly one rule and one entry.
    assert_eq!(fx.queue.repeatable_jobs().await.unwrap().len(), 1);
    assert_eq!(fx.queue.jobs_in(&JobState::ALL).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_replica_defers_while_lock_held_then_recovers() {
    let fx = common::fixture();
    fx.manager
        .create(TaskDraft::interval("t", "EchoJob.echo", 60_000))
        .await
        .unwrap();

    // Stale leftover that only a recovery pass would drain.
    fx.queue
        .add_once(JobPayload {
            id: TaskId::new(999),
            service: "EchoJob.echo".into(),
            data: String::new(),
        })
        .await
        .unwrap();

    assert!(fx
        .queue
        .try_lock("tempo:init", Duration::from_secs(60))
        .await
        .unwrap());

    // Another replica holds the lock: recover must return without draining.
    fx.manager.recover().await.unwrap();
    assert_eq!(fx.queue.jobs_in(&JobState::ALL).await.unwrap().len(), 2);

    fx.queue.unlock("tempo:init").await.unwrap();

    fx.manager.recover().await.unwrap();
    let entries = fx.queue.jobs_in(&JobState::ALL).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_ne!(entries[0].payload.id, TaskId::new(999));
}
