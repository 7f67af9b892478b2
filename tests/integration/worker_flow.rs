//! End-to-end flows: manager, queue, worker and event bus wired together as
//! the daemon wires them.

use std::sync::Arc;
use std::time::Duration;

use tempo::{
    CompletionHook, EventBus, LogStatus, QueueBackend, TaskDraft, TaskStatus, TaskStore, Worker,
    WorkerHandle,
};

use crate::common::{self, Fixture};

async fn start_worker(fx: &Fixture) -> WorkerHandle {
    let bus = Arc::new(EventBus::new());
    bus.register(Arc::new(CompletionHook::new(fx.manager.clone())))
        .await;

    let worker = Worker::new(
        fx.queue.clone(),
        fx.registry.clone(),
        fx.store.clone(),
        bus,
    )
    .with_tick_interval(Duration::from_millis(10));

    let (handle, _task) = worker.start();
    handle
}

#[tokio::test]
async fn test_interval_task_runs_repeatedly() {
    let fx = common::fixture();
    let handle = start_worker(&fx).await;

    let task = fx
        .manager
        .create(TaskDraft::interval("fast", "EchoJob.echo", 50))
        .await
        .unwrap();

    let entries = common::wait_for_log_count(fx.store.as_ref(), 2, Duration::from_secs(5)).await;
    assert!(entries.iter().all(|e| e.task_id == task.id));
    assert!(entries.iter().all(|e| e.status == LogStatus::Success));
    assert!(fx.echo.count() >= 2);

    fx.manager.stop(task.id).await.unwrap();
    assert!(fx.queue.repeatable_jobs().await.unwrap().is_empty());
    assert_eq!(
        fx.store.get(task.id).await.unwrap().status,
        TaskStatus::Disabled
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cron_with_limit_one_auto_disables() {
    let fx = common::fixture();
    let handle = start_worker(&fx).await;

    // Six-field expression fires every second; the limit caps it at one run.
    let task = fx
        .manager
        .create(TaskDraft::cron("one-shot", "EchoJob.echo", "* * * * * *").with_limit(1))
        .await
        .unwrap();

    // The completion hook notices the exhausted rule and disables the task.
    common::wait_for_task_status(
        fx.store.as_ref(),
        task.id,
        TaskStatus::Disabled,
        Duration::from_secs(10),
    )
    .await;

    let entries = common::wait_for_log_count(fx.store.as_ref(), 1, Duration::from_secs(5)).await;
    assert_eq!(entries[0].status, LogStatus::Success);
    assert!(fx.queue.repeatable_jobs().await.unwrap().is_empty());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_once_runs_without_touching_status() {
    let fx = common::fixture();
    let handle = start_worker(&fx).await;

    let task = fx
        .manager
        .create(
            TaskDraft::interval("manual", "EchoJob.echo", 60_000)
                .with_status(TaskStatus::Disabled),
        )
        .await
        .unwrap();

    fx.manager.once(task.id).await.unwrap();

    let entries = common::wait_for_log_count(fx.store.as_ref(), 1, Duration::from_secs(5)).await;
    assert_eq!(entries[0].task_id, task.id);
    assert_eq!(entries[0].status, LogStatus::Success);
    assert_eq!(fx.echo.count(), 1);

    // Still disabled, still no rule.
    assert_eq!(
        fx.store.get(task.id).await.unwrap().status,
        TaskStatus::Disabled
    );
    assert!(fx.queue.repeatable_jobs().await.unwrap().is_empty());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failing_handler_recorded_with_detail() {
    let fx = common::fixture();
    let handle = start_worker(&fx).await;

    let task = fx
        .manager
        .create(TaskDraft::interval("broken", "FailingJob.boom", 50))
        .await
        .unwrap();

    let entries = common::wait_for_log_count(fx.store.as_ref(), 1, Duration::from_secs(5)).await;
    assert_eq!(entries[0].task_id, task.id);
    assert_eq!(entries[0].status, LogStatus::Failure);
    assert_eq!(entries[0].detail.as_deref(), Some("boom"));

    // Failures do not tear the registration down.
    fx.manager.stop(task.id).await.unwrap();
    handle.shutdown().await.unwrap();
}
