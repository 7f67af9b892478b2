//! API response types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::task::{Task, TaskKind, TaskStatus};
use crate::store::{Paginated, TaskLogEntry};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Simple message response.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Task detail for single and list responses.
#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub id: i64,
    pub name: String,
    pub kind: TaskKind,
    pub cron: Option<String>,
    pub every_ms: Option<u64>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub service: String,
    pub data: String,
    pub status: TaskStatus,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            id: task.id.as_i64(),
            name: task.name,
            kind: task.kind,
            cron: task.cron,
            every_ms: task.every_ms,
            start_at: task.start_at,
            end_at: task.end_at,
            limit: task.limit,
            service: task.service,
            data: task.data,
            status: task.status,
            remark: task.remark,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

/// One page of tasks.
#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskResponse>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

impl From<Paginated<Task>> for TaskListResponse {
    fn from(page: Paginated<Task>) -> Self {
        Self {
            tasks: page.items.into_iter().map(TaskResponse::from).collect(),
            total: page.total,
            page: page.page,
            page_size: page.page_size,
        }
    }
}

/// One execution log record.
#[derive(Debug, Serialize)]
pub struct TaskLogResponse {
    pub id: i64,
    pub task_id: i64,
    pub status: String,
    pub duration_ms: u64,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<TaskLogEntry> for TaskLogResponse {
    fn from(entry: TaskLogEntry) -> Self {
        Self {
            id: entry.id,
            task_id: entry.task_id.as_i64(),
            status: match entry.status {
                crate::store::LogStatus::Success => "success".to_string(),
                crate::store::LogStatus::Failure => "failure".to_string(),
            },
            duration_ms: entry.duration_ms,
            detail: entry.detail,
            created_at: entry.created_at,
        }
    }
}

/// One page of execution log records.
#[derive(Debug, Serialize)]
pub struct TaskLogListResponse {
    pub logs: Vec<TaskLogResponse>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

impl From<Paginated<TaskLogEntry>> for TaskLogListResponse {
    fn from(page: Paginated<TaskLogEntry>) -> Self {
        Self {
            logs: page.items.into_iter().map(TaskLogResponse::from).collect(),
            total: page.total,
            page: page.page,
            page_size: page.page_size,
        }
    }
}
