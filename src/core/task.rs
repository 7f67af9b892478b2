//! Persisted task definitions and their lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::TaskId;

/// How a task's schedule is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Fires every `every_ms` milliseconds.
    Interval,
    /// Fires per a cron expression, optionally bounded by a window and a
    /// repeat limit.
    Cron,
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// A live repeat rule for this task exists in the queue.
    Activated,
    /// No queue registration exists for this task.
    Disabled,
}

/// A persisted task definition.
///
/// `job_opts` holds the serialized repeat configuration that the queue
/// actually accepted at start time. It is authoritative for cancellation:
/// stopping a task removes the repeat rule identified by these opts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub kind: TaskKind,
    pub cron: Option<String>,
    pub every_ms: Option<u64>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    /// Handler reference in `"Service.method"` form.
    pub service: String,
    /// Opaque JSON-encoded arguments passed to the handler.
    pub data: String,
    pub status: TaskStatus,
    pub job_opts: Option<String>,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied by callers when creating or updating a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDraft {
    pub name: String,
    pub kind: TaskKind,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub every_ms: Option<u64>,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<u32>,
    pub service: String,
    #[serde(default)]
    pub data: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub remark: Option<String>,
}

impl TaskDraft {
    /// Create an interval draft firing every `every_ms` milliseconds.
    pub fn interval(name: impl Into<String>, service: impl Into<String>, every_ms: u64) -> Self {
        Self {
            name: name.into(),
            kind: TaskKind::Interval,
            cron: None,
            every_ms: Some(every_ms),
            start_at: None,
            end_at: None,
            limit: None,
            service: service.into(),
            data: String::new(),
            status: TaskStatus::Activated,
            remark: None,
        }
    }

    /// Create a cron draft from an expression.
    pub fn cron(
        name: impl Into<String>,
        service: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: TaskKind::Cron,
            cron: Some(expression.into()),
            every_ms: None,
            start_at: None,
            end_at: None,
            limit: None,
            service: service.into(),
            data: String::new(),
            status: TaskStatus::Activated,
            remark: None,
        }
    }

    /// Set the JSON argument payload.
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    /// Set the initial status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Cap the number of repeats.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Restrict the schedule to a window.
    pub fn with_window(
        mut self,
        start_at: Option<DateTime<Utc>>,
        end_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_at = start_at;
        self.end_at = end_at;
        self
    }
}
