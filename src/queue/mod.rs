//! Durable work queue abstraction with repeatable-job support.
//!
//! The queue owns delivery timing: a task that is started registers one
//! repeat rule keyed by its id, and the backend materializes concrete queue
//! entries from that rule as fire times come due. Backends also carry the
//! bootstrap lock, since recovery coordination must go through the shared
//! store rather than process memory.

mod memory;
#[cfg(feature = "redis-queue")]
mod redis;

pub use memory::MemoryQueue;
#[cfg(feature = "redis-queue")]
pub use redis::RedisQueue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::core::schedule::{Schedule, ScheduleError};
use crate::core::task::{Task, TaskKind};
use crate::core::types::{EntryId, TaskId};

/// Errors raised by queue backends.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The referenced entry or rule does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The repeat configuration cannot produce any firing.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Queue lock was poisoned.
    #[error("queue lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend transport or storage error.
    #[error("queue backend error: {0}")]
    Backend(String),
}

impl From<ScheduleError> for QueueError {
    fn from(err: ScheduleError) -> Self {
        QueueError::InvalidSchedule(err.to_string())
    }
}

/// Lifecycle state of a concrete queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Paused,
    Failed,
    Completed,
}

impl JobState {
    /// Every lifecycle state, in drain order.
    pub const ALL: [JobState; 6] = [
        JobState::Active,
        JobState::Delayed,
        JobState::Failed,
        JobState::Paused,
        JobState::Waiting,
        JobState::Completed,
    ];
}

/// Payload carried by every queue entry materialized from a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub id: TaskId,
    pub service: String,
    pub data: String,
}

impl JobPayload {
    pub fn from_task(task: &Task) -> Self {
        Self {
            id: task.id,
            service: task.service.clone(),
            data: task.data.clone(),
        }
    }
}

/// The repeat configuration registered with the queue.
///
/// This is the exact shape persisted into `Task.job_opts`; serialization must
/// be lossless because the serialized copy is what later identifies the rule
/// for removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatOpts {
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl RepeatOpts {
    /// Build the repeat configuration for a task.
    pub fn from_task(task: &Task) -> Self {
        match task.kind {
            TaskKind::Interval => Self {
                task_id: task.id,
                cron: None,
                every_ms: task.every_ms,
                start_at: None,
                end_at: None,
                limit: None,
            },
            TaskKind::Cron => Self {
                task_id: task.id,
                cron: task.cron.clone(),
                every_ms: None,
                start_at: task.start_at,
                end_at: task.end_at,
                limit: task.limit,
            },
        }
    }

    /// Parse the schedule behind this configuration.
    pub fn schedule(&self) -> Result<Schedule, QueueError> {
        if let Some(cron) = &self.cron {
            Ok(Schedule::cron(cron)?)
        } else if let Some(every_ms) = self.every_ms {
            Ok(Schedule::every_ms(every_ms)?)
        } else {
            Err(QueueError::InvalidSchedule(
                "neither cron nor interval set".into(),
            ))
        }
    }

    /// First fire time at registration, honoring the start bound.
    ///
    /// Fails when the configuration cannot fire at all, e.g. the window
    /// already elapsed; the caller treats that as a start failure.
    pub fn first_fire(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, QueueError> {
        let base = match self.start_at {
            Some(start) if start > now => start,
            _ => now,
        };
        let next = self.schedule()?.next_after(base)?;
        if let Some(end) = self.end_at {
            if next > end {
                return Err(QueueError::InvalidSchedule(
                    "schedule window already elapsed".into(),
                ));
            }
        }
        Ok(next)
    }

    /// Next fire time after a firing, or None once the rule is exhausted by
    /// its limit or end bound.
    pub fn next_fire(&self, after: DateTime<Utc>, fired: u32) -> Option<DateTime<Utc>> {
        if let Some(limit) = self.limit {
            if fired >= limit {
                return None;
            }
        }
        let next = self.schedule().ok()?.next_after(after).ok()?;
        if let Some(end) = self.end_at {
            if next > end {
                return None;
            }
        }
        Some(next)
    }
}

/// One concrete, time-bound entry materialized into the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub entry_id: EntryId,
    pub payload: JobPayload,
    pub state: JobState,
    pub due_at: DateTime<Utc>,
    /// Drop the entry after terminal completion instead of keeping a marker.
    pub auto_remove: bool,
    /// Whether this entry was generated by a repeat rule.
    pub from_repeat: bool,
}

/// A registered repeat rule and its delivery cursor.
///
/// An exhausted rule (limit or end bound reached) stays in the index with a
/// stale `next` until the owning task is stopped; the completion hook uses
/// that staleness to reconcile task status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatRule {
    pub opts: RepeatOpts,
    pub next: DateTime<Utc>,
    pub fired: u32,
}

impl RepeatRule {
    pub fn task_id(&self) -> TaskId {
        self.opts.task_id
    }
}

/// Durable queue backend with repeatable-job support.
///
/// Delivery guarantees (no double-claim of one entry across workers) are the
/// backend's responsibility; the scheduler layers no extra coordination on
/// top beyond the bootstrap lock.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Register a repeat rule keyed by the payload's task id and materialize
    /// its first entry. Returns the configuration as accepted.
    async fn add_repeatable(
        &self,
        payload: JobPayload,
        opts: RepeatOpts,
    ) -> Result<RepeatOpts, QueueError>;

    /// Enqueue a single immediate entry with auto-remove semantics.
    async fn add_once(&self, payload: JobPayload) -> Result<EntryId, QueueError>;

    /// List entries currently in any of the given states.
    async fn jobs_in(&self, states: &[JobState]) -> Result<Vec<QueuedJob>, QueueError>;

    /// List all registered repeat rules.
    async fn repeatable_jobs(&self) -> Result<Vec<RepeatRule>, QueueError>;

    /// Remove one entry regardless of state.
    async fn remove_job(&self, entry_id: EntryId) -> Result<(), QueueError>;

    /// Remove the repeat rule identified by a previously accepted
    /// configuration. Removing entries alone is insufficient: the rule keeps
    /// regenerating them until it is torn down.
    async fn remove_repeatable(&self, opts: &RepeatOpts) -> Result<(), QueueError>;

    /// Claim entries due at or before `now`, marking them active.
    async fn claim_due(&self, now: DateTime<Utc>, max: usize) -> Result<Vec<QueuedJob>, QueueError>;

    /// Report a claimed entry finished; advances the owning repeat rule.
    async fn complete(&self, entry_id: EntryId, success: bool) -> Result<(), QueueError>;

    /// Set a lock key if absent, with a bounded expiry.
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, QueueError>;

    /// Release a lock key explicitly.
    async fn unlock(&self, key: &str) -> Result<(), QueueError>;
}
