//! Handler gate enforcement at every entry point.
//!
//! Only services explicitly marked safe for scheduling may be attached to a
//! task, and the gate holds even for rows that predate a handler's removal.

use tempo::{QueueBackend, RegistryError, SchedulerError, TaskDraft, TaskStore};

use crate::common;

#[tokio::test]
async fn test_update_rejects_unmarked_service_and_keeps_task() {
    let fx = common::fixture();

    let task = fx
        .manager
        .create(TaskDraft::interval("sync", "EchoJob.echo", 60_000))
        .await
        .unwrap();

    let result = fx
        .manager
        .update(
            task.id,
            TaskDraft::interval("sync", "PlainService.echo", 60_000),
        )
        .await;
    assert!(matches!(
        result,
        Err(SchedulerError::Registry(RegistryError::Insecure(_)))
    ));

    // The rejected update must not have touched the row or the rule.
    let current = fx.store.get(task.id).await.unwrap();
    assert_eq!(current.service, "EchoJob.echo");
    assert_eq!(fx.queue.repeatable_jobs().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_start_rejects_orphaned_service() {
    let fx = common::fixture();

    // A row referencing a handler that no longer exists in this build.
    let orphan = fx
        .store
        .create(TaskDraft::interval("orphan", "GoneJob.run", 60_000))
        .await
        .unwrap();

    let result = fx.manager.start(orphan.id).await;
    assert!(matches!(
        result,
        Err(SchedulerError::Registry(RegistryError::NotFound(_)))
    ));
    assert!(fx.queue.repeatable_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_once_rejects_orphaned_service() {
    let fx = common::fixture();

    let orphan = fx
        .store
        .create(TaskDraft::interval("orphan", "GoneJob.run", 60_000))
        .await
        .unwrap();

    let result = fx.manager.once(orphan.id).await;
    assert!(matches!(result, Err(SchedulerError::Registry(_))));
    assert!(fx
        .queue
        .jobs_in(&tempo::JobState::ALL)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(fx.echo.count(), 0);
}

#[tokio::test]
async fn test_bad_service_reference_rejected() {
    let fx = common::fixture();

    let result = fx
        .manager
        .create(TaskDraft::interval("bad", "no-dot-here", 60_000))
        .await;
    assert!(matches!(
        result,
        Err(SchedulerError::Registry(RegistryError::BadServiceRef(_)))
    ));
}
