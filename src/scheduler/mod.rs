//! Task lifecycle management.
//!
//! The manager is responsible for:
//! - Creating, updating and deleting persisted tasks
//! - Starting and stopping their queue registrations
//! - One-off fire-and-forget runs
//! - Recovery after a restart, coordinated across replicas by a lock
//! - Reconciling task status once a repeat rule is exhausted
//!
//! Start is stop-first: the previous registration is always torn down before
//! a new rule is added, so a task never holds two live rules.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::task::{Task, TaskDraft, TaskStatus};
use crate::core::types::TaskId;
use crate::events::{Event, EventHandler};
use crate::queue::{JobPayload, JobState, QueueBackend, QueueError, RepeatOpts};
use crate::registry::{HandlerRegistry, RegistryError};
use crate::store::{Page, Paginated, StoreError, TaskLogEntry, TaskLogStore, TaskQuery, TaskStore};

/// Expiry on the recovery lock, bounding how long a crashed replica can
/// block recovery.
const INIT_LOCK_TTL: Duration = Duration::from_secs(30 * 60);

/// Errors that can occur in task lifecycle operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Task not found.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// Handler resolution or security rejection.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The queue rejected the registration.
    #[error("task registration failed: {0}")]
    StartFailure(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Queue error.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Manages persisted tasks and their queue registrations.
pub struct TaskManager {
    store: Arc<dyn TaskStore>,
    logs: Arc<dyn TaskLogStore>,
    queue: Arc<dyn QueueBackend>,
    registry: Arc<HandlerRegistry>,
    init_lock_key: String,
}

impl TaskManager {
    pub fn new(
        store: Arc<dyn TaskStore>,
        logs: Arc<dyn TaskLogStore>,
        queue: Arc<dyn QueueBackend>,
        registry: Arc<HandlerRegistry>,
        key_prefix: &str,
    ) -> Self {
        Self {
            store,
            logs,
            queue,
            registry,
            init_lock_key: format!("{}:init", key_prefix),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    async fn get_task(&self, id: TaskId) -> Result<Task, SchedulerError> {
        match self.store.get(id).await {
            Ok(task) => Ok(task),
            Err(StoreError::NotFound(_)) => Err(SchedulerError::TaskNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist a new task; an activated draft is registered immediately.
    pub async fn create(&self, draft: TaskDraft) -> Result<Task, SchedulerError> {
        self.registry.check(&draft.service)?;

        let task = self.store.create(draft).await?;
        if task.status == TaskStatus::Activated {
            self.start(task.id).await?;
        }

        self.get_task(task.id).await
    }

    /// Overwrite a task definition and re-apply its desired status.
    pub async fn update(&self, id: TaskId, draft: TaskDraft) -> Result<Task, SchedulerError> {
        self.registry.check(&draft.service)?;

        let desired = draft.status;
        match self.store.update(id, draft).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => return Err(SchedulerError::TaskNotFound(id)),
            Err(e) => return Err(e.into()),
        }

        match desired {
            TaskStatus::Activated => self.start(id).await?,
            TaskStatus::Disabled => self.stop(id).await?,
        }

        self.get_task(id).await
    }

    /// Stop and delete a task.
    pub async fn delete(&self, id: TaskId) -> Result<(), SchedulerError> {
        self.get_task(id).await?;
        self.stop(id).await?;
        self.store.delete(id).await?;

        info!(task_id = %id, "task deleted");
        Ok(())
    }

    pub async fn info(&self, id: TaskId) -> Result<Task, SchedulerError> {
        self.get_task(id).await
    }

    pub async fn list(&self, query: &TaskQuery) -> Result<Paginated<Task>, SchedulerError> {
        Ok(self.store.list(query).await?)
    }

    pub async fn task_logs(&self, page: Page) -> Result<Paginated<TaskLogEntry>, SchedulerError> {
        Ok(self.logs.list_logs(page).await?)
    }

    /// Validate a raw `"Service.method"` reference against the registry.
    pub fn check_service(&self, raw: &str) -> Result<(), SchedulerError> {
        Ok(self.registry.check(raw)?)
    }

    /// Register a task's repeat rule with the queue.
    ///
    /// Tears down any previous registration first. On success the accepted
    /// configuration is persisted so a later stop can identify the rule even
    /// across restarts; on queue rejection the task is forced to Disabled.
    pub async fn start(&self, id: TaskId) -> Result<(), SchedulerError> {
        let task = self.get_task(id).await?;
        self.registry.check(&task.service)?;

        self.stop(id).await?;

        let opts = RepeatOpts::from_task(&task);
        let payload = JobPayload::from_task(&task);

        match self.queue.add_repeatable(payload, opts).await {
            Ok(accepted) => {
                let encoded = serde_json::to_string(&accepted)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                self.store
                    .set_job_opts(id, Some(encoded), TaskStatus::Activated)
                    .await?;

                info!(task_id = %id, service = %task.service, "task started");
                Ok(())
            }
            Err(e) => {
                self.store.update_status(id, TaskStatus::Disabled).await?;
                warn!(task_id = %id, error = %e, "task registration rejected");
                Err(SchedulerError::StartFailure(e.to_string()))
            }
        }
    }

    /// Remove a task's queue registration and mark it Disabled.
    ///
    /// Idempotent: when no repeat rule exists the status transition is the
    /// only effect.
    pub async fn stop(&self, id: TaskId) -> Result<(), SchedulerError> {
        let task = self.get_task(id).await?;

        let rules = self.queue.repeatable_jobs().await?;
        let Some(rule) = rules.into_iter().find(|r| r.task_id() == id) else {
            self.store.update_status(id, TaskStatus::Disabled).await?;
            return Ok(());
        };

        let entries = self.queue.jobs_in(&JobState::ALL).await?;
        for entry in entries.iter().filter(|e| e.payload.id == id) {
            self.queue.remove_job(entry.entry_id).await?;
        }

        // The persisted copy of the accepted configuration is authoritative;
        // fall back to the live rule if it is missing.
        let opts = task
            .job_opts
            .as_deref()
            .and_then(|raw| serde_json::from_str::<RepeatOpts>(raw).ok())
            .unwrap_or(rule.opts);
        self.queue.remove_repeatable(&opts).await?;

        self.store.update_status(id, TaskStatus::Disabled).await?;

        info!(task_id = %id, "task stopped");
        Ok(())
    }

    /// Fire a task once, right now, without touching its status or rule.
    pub async fn once(&self, id: TaskId) -> Result<(), SchedulerError> {
        let task = self.get_task(id).await?;
        self.registry.check(&task.service)?;

        let entry_id = self.queue.add_once(JobPayload::from_task(&task)).await?;
        info!(task_id = %id, entry_id = %entry_id, "task queued for one-off run");

        Ok(())
    }

    /// Disable a task whose repeat rule has run out.
    ///
    /// Invoked after each completed run. A rule whose cursor still points to
    /// the past at that moment will never fire again, so the task and the
    /// rule are torn down.
    pub async fn reconcile_completed(&self, id: TaskId) -> Result<(), SchedulerError> {
        let rules = self.queue.repeatable_jobs().await?;
        let Some(rule) = rules.into_iter().find(|r| r.task_id() == id) else {
            return Ok(());
        };

        if rule.next < chrono::Utc::now() {
            info!(task_id = %id, "repeat rule exhausted, disabling task");
            self.stop(id).await?;
        }

        Ok(())
    }

    /// Rebuild queue state after a restart.
    ///
    /// Exactly one replica performs recovery; the others find the lock taken
    /// and skip. Every stale entry is drained, then each Activated task is
    /// re-registered from its persisted definition.
    pub async fn recover(&self) -> Result<(), SchedulerError> {
        if !self
            .queue
            .try_lock(&self.init_lock_key, INIT_LOCK_TTL)
            .await?
        {
            info!("recovery already in progress elsewhere, skipping");
            return Ok(());
        }

        let outcome = self.recover_locked().await;
        self.queue.unlock(&self.init_lock_key).await?;
        outcome
    }

    async fn recover_locked(&self) -> Result<(), SchedulerError> {
        let stale = self.queue.jobs_in(&JobState::ALL).await?;
        for entry in &stale {
            self.queue.remove_job(entry.entry_id).await?;
        }
        if !stale.is_empty() {
            info!(drained = stale.len(), "drained stale queue entries");
        }

        let tasks = self.store.list_by_status(TaskStatus::Activated).await?;
        for task in tasks {
            if let Err(e) = self.start(task.id).await {
                warn!(task_id = %task.id, error = %e, "failed to restart task during recovery");
            }
        }

        info!("recovery complete");
        Ok(())
    }
}

/// Event handler that reconciles task status after each completed run.
pub struct CompletionHook {
    manager: Arc<TaskManager>,
}

impl CompletionHook {
    pub fn new(manager: Arc<TaskManager>) -> Self {
        Self { manager }
    }
}

#[async_trait::async_trait]
impl EventHandler for CompletionHook {
    async fn handle(&self, event: &Event) {
        if let Event::JobCompleted { task_id, .. } = event {
            if let Err(e) = self.manager.reconcile_completed(*task_id).await {
                warn!(task_id = %task_id, error = %e, "failed to reconcile task status");
            }
        }
    }
}
