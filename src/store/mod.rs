//! Storage abstraction for persisting tasks and execution logs.
//!
//! This module provides a trait-based storage abstraction with pluggable
//! backends (in-memory, SQLite).

mod memory;
#[cfg(any(feature = "sqlite", test))]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(any(feature = "sqlite", test))]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::task::{Task, TaskDraft, TaskKind, TaskStatus};
use crate::core::types::TaskId;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested row was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

/// Outcome recorded for one handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Failure,
}

/// One append-only execution log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub id: i64,
    pub task_id: TaskId,
    pub status: LogStatus,
    pub duration_ms: u64,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Filters and pagination for listing tasks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskQuery {
    /// Substring match on the task name.
    pub name: Option<String>,
    /// Substring match on the service reference.
    pub service: Option<String>,
    pub kind: Option<TaskKind>,
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub page: Page,
}

/// Pagination request; pages are 1-indexed.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Page {
    #[serde(default = "Page::default_page")]
    pub page: u64,
    #[serde(default = "Page::default_page_size")]
    pub page_size: u64,
}

impl Page {
    fn default_page() -> u64 {
        1
    }

    fn default_page_size() -> u64 {
        20
    }

    pub fn new(page: u64, page_size: u64) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.max(1),
        }
    }

    /// Offset into the result set.
    pub fn offset(&self) -> u64 {
        (self.page.max(1) - 1) * self.page_size
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(Self::default_page(), Self::default_page_size())
    }
}

/// One page of results plus the total row count.
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, total: u64, page: Page) -> Self {
        Self {
            items,
            total,
            page: page.page,
            page_size: page.page_size,
        }
    }
}

/// Durable store of task definitions.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task and return it with its assigned id.
    async fn create(&self, draft: TaskDraft) -> Result<Task, StoreError>;

    /// Get a task by id.
    async fn get(&self, id: TaskId) -> Result<Task, StoreError>;

    /// List tasks matching the query, ordered by id ascending.
    async fn list(&self, query: &TaskQuery) -> Result<Paginated<Task>, StoreError>;

    /// Overwrite the caller-editable fields of a task.
    async fn update(&self, id: TaskId, draft: TaskDraft) -> Result<(), StoreError>;

    /// Persist a status transition.
    async fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<(), StoreError>;

    /// Persist the accepted repeat configuration together with a status.
    async fn set_job_opts(
        &self,
        id: TaskId,
        job_opts: Option<String>,
        status: TaskStatus,
    ) -> Result<(), StoreError>;

    /// Delete a task row.
    async fn delete(&self, id: TaskId) -> Result<(), StoreError>;

    /// All tasks currently in the given status.
    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError>;
}

/// Append-only sink of execution outcomes.
#[async_trait]
pub trait TaskLogStore: Send + Sync {
    /// Record one invocation attempt; returns the log row id.
    async fn record(
        &self,
        task_id: TaskId,
        status: LogStatus,
        duration_ms: u64,
        detail: Option<String>,
    ) -> Result<i64, StoreError>;

    /// List log entries, newest first.
    async fn list_logs(&self, page: Page) -> Result<Paginated<TaskLogEntry>, StoreError>;

    /// Remove every log entry.
    async fn clear_logs(&self) -> Result<(), StoreError>;

    /// Remove log entries created before the cutoff.
    async fn clear_logs_before(&self, cutoff: DateTime<Utc>) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_offset() {
        assert_eq!(Page::new(1, 20).offset(), 0);
        assert_eq!(Page::new(3, 10).offset(), 20);
    }

    #[test]
    fn test_page_clamps_to_one() {
        let page = Page::new(0, 0);
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, 1);
    }

    #[test]
    fn test_default_page() {
        let page = Page::default();
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, 20);
    }
}
