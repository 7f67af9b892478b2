//! Shared fixtures and polling helpers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempo::{
    CallArgs, HandlerRegistry, InvokeError, JobHandler, MemoryQueue, MemoryStore, Page, TaskId,
    TaskLogEntry, TaskLogStore, TaskManager, TaskStatus, TaskStore,
};

/// Counting handler registered as `EchoJob.echo`.
pub struct EchoJob {
    calls: AtomicU32,
}

impl EchoJob {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
        })
    }

    pub fn count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobHandler for EchoJob {
    fn methods(&self) -> &[&'static str] {
        &["echo"]
    }

    async fn call(&self, _method: &str, _args: CallArgs) -> Result<(), InvokeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Handler registered as `FailingJob.boom` that always fails.
pub struct FailingJob;

#[async_trait]
impl JobHandler for FailingJob {
    fn methods(&self) -> &[&'static str] {
        &["boom"]
    }

    async fn call(&self, _method: &str, _args: CallArgs) -> Result<(), InvokeError> {
        Err(InvokeError::new("boom"))
    }
}

/// A manager over shared in-memory backends with the standard test handlers.
pub struct Fixture {
    pub manager: Arc<TaskManager>,
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryQueue>,
    pub registry: Arc<HandlerRegistry>,
    pub echo: Arc<EchoJob>,
}

pub fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let echo = EchoJob::new();

    let mut registry = HandlerRegistry::new();
    registry.register("EchoJob", echo.clone());
    registry.register("FailingJob", Arc::new(FailingJob));
    registry.register_unmarked("PlainService", EchoJob::new());
    let registry = Arc::new(registry);

    let manager = Arc::new(TaskManager::new(
        store.clone(),
        store.clone(),
        queue.clone(),
        registry.clone(),
        "tempo",
    ));

    Fixture {
        manager,
        store,
        queue,
        registry,
        echo,
    }
}

/// Poll until at least `count` log entries exist; returns them newest first.
pub async fn wait_for_log_count(
    logs: &dyn TaskLogStore,
    count: usize,
    timeout: Duration,
) -> Vec<TaskLogEntry> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let page = logs.list_logs(Page::new(1, 100)).await.unwrap();
        if page.items.len() >= count {
            return page.items;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "timed out waiting for {} log entries, have {}",
                count,
                page.items.len()
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the task reaches the expected status.
pub async fn wait_for_task_status(
    store: &dyn TaskStore,
    id: TaskId,
    expected: TaskStatus,
    timeout: Duration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let task = store.get(id).await.unwrap();
        if task.status == expected {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "timed out waiting for task {} to reach {:?}, still {:?}",
                id, expected, task.status
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
