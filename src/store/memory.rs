//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.
//! Data is not persisted across restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{
    LogStatus, Page, Paginated, StoreError, TaskLogEntry, TaskLogStore, TaskQuery, TaskStore,
};
use crate::core::task::{Task, TaskDraft, TaskStatus};
use crate::core::types::TaskId;

/// In-memory store backing both tasks and execution logs.
pub struct MemoryStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
    logs: RwLock<Vec<TaskLogEntry>>,
    next_task_id: RwLock<i64>,
    next_log_id: RwLock<i64>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            logs: RwLock::new(Vec::new()),
            next_task_id: RwLock::new(1),
            next_log_id: RwLock::new(1),
        }
    }

    fn allocate_task_id(&self) -> Result<TaskId, StoreError> {
        let mut next = self
            .next_task_id
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        let id = TaskId::new(*next);
        *next += 1;
        Ok(id)
    }

    fn allocate_log_id(&self) -> Result<i64, StoreError> {
        let mut next = self
            .next_log_id
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        let id = *next;
        *next += 1;
        Ok(id)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_draft(task: &mut Task, draft: TaskDraft) {
    task.name = draft.name;
    task.kind = draft.kind;
    task.cron = draft.cron;
    task.every_ms = draft.every_ms;
    task.start_at = draft.start_at;
    task.end_at = draft.end_at;
    task.limit = draft.limit;
    task.service = draft.service;
    task.data = draft.data;
    task.status = draft.status;
    task.remark = draft.remark;
    task.updated_at = Utc::now();
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create(&self, draft: TaskDraft) -> Result<Task, StoreError> {
        let id = self.allocate_task_id()?;
        let now = Utc::now();
        let task = Task {
            id,
            name: draft.name,
            kind: draft.kind,
            cron: draft.cron,
            every_ms: draft.every_ms,
            start_at: draft.start_at,
            end_at: draft.end_at,
            limit: draft.limit,
            service: draft.service,
            data: draft.data,
            status: draft.status,
            job_opts: None,
            remark: draft.remark,
            created_at: now,
            updated_at: now,
        };

        let mut tasks = self.tasks.write().map_err(|_| StoreError::LockPoisoned)?;
        tasks.insert(id, task.clone());
        Ok(task)
    }

    async fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        let tasks = self.tasks.read().map_err(|_| StoreError::LockPoisoned)?;
        tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("task: {}", id)))
    }

    async fn list(&self, query: &TaskQuery) -> Result<Paginated<Task>, StoreError> {
        let tasks = self.tasks.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut matched: Vec<Task> = tasks
            .values()
            .filter(|t| {
                query
                    .name
                    .as_deref()
                    .is_none_or(|needle| t.name.contains(needle))
                    && query
                        .service
                        .as_deref()
                        .is_none_or(|needle| t.service.contains(needle))
                    && query.kind.is_none_or(|kind| t.kind == kind)
                    && query.status.is_none_or(|status| t.status == status)
            })
            .cloned()
            .collect();
        matched.sort_by_key(|t| t.id.as_i64());

        let total = matched.len() as u64;
        let page = query.page;
        let items = matched
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.page_size as usize)
            .collect();
        Ok(Paginated::new(items, total, page))
    }

    async fn update(&self, id: TaskId, draft: TaskDraft) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().map_err(|_| StoreError::LockPoisoned)?;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("task: {}", id)))?;
        apply_draft(task, draft);
        Ok(())
    }

    async fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().map_err(|_| StoreError::LockPoisoned)?;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("task: {}", id)))?;
        task.status = status;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn set_job_opts(
        &self,
        id: TaskId,
        job_opts: Option<String>,
        status: TaskStatus,
    ) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().map_err(|_| StoreError::LockPoisoned)?;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("task: {}", id)))?;
        task.job_opts = job_opts;
        task.status = status;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: TaskId) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().map_err(|_| StoreError::LockPoisoned)?;
        tasks
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("task: {}", id)))?;
        Ok(())
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut matched: Vec<Task> = tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        matched.sort_by_key(|t| t.id.as_i64());
        Ok(matched)
    }
}

#[async_trait]
impl TaskLogStore for MemoryStore {
    async fn record(
        &self,
        task_id: TaskId,
        status: LogStatus,
        duration_ms: u64,
        detail: Option<String>,
    ) -> Result<i64, StoreError> {
        let id = self.allocate_log_id()?;
        let entry = TaskLogEntry {
            id,
            task_id,
            status,
            duration_ms,
            detail,
            created_at: Utc::now(),
        };
        let mut logs = self.logs.write().map_err(|_| StoreError::LockPoisoned)?;
        logs.push(entry);
        Ok(id)
    }

    async fn list_logs(&self, page: Page) -> Result<Paginated<TaskLogEntry>, StoreError> {
        let logs = self.logs.read().map_err(|_| StoreError::LockPoisoned)?;
        let total = logs.len() as u64;
        let mut items: Vec<TaskLogEntry> = logs.iter().cloned().collect();
        items.sort_by_key(|e| std::cmp::Reverse(e.id));
        let items = items
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.page_size as usize)
            .collect();
        Ok(Paginated::new(items, total, page))
    }

    async fn clear_logs(&self) -> Result<(), StoreError> {
        let mut logs = self.logs.write().map_err(|_| StoreError::LockPoisoned)?;
        logs.clear();
        Ok(())
    }

    async fn clear_logs_before(&self, cutoff: DateTime<Utc>) -> Result<(), StoreError> {
        let mut logs = self.logs.write().map_err(|_| StoreError::LockPoisoned)?;
        logs.retain(|e| e.created_at >= cutoff);
        Ok(())
    }
}
