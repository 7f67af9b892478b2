//! In-memory queue backend.
//!
//! Single-process backend used in tests and standalone deployments. Repeat
//! rules advance at claim time: claiming the materialized entry computes the
//! following fire time and enqueues the next entry in the same critical
//! section, so at most one pending entry exists per rule.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::{JobPayload, JobState, QueueBackend, QueueError, QueuedJob, RepeatOpts, RepeatRule};
use crate::core::types::{EntryId, TaskId};

#[derive(Default)]
struct Inner {
    entries: HashMap<EntryId, QueuedJob>,
    rules: HashMap<TaskId, RepeatRule>,
    locks: HashMap<String, Instant>,
}

/// In-memory implementation of [`QueueBackend`].
#[derive(Default)]
pub struct MemoryQueue {
    inner: RwLock<Inner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry_state(due_at: DateTime<Utc>, now: DateTime<Utc>) -> JobState {
        if due_at > now {
            JobState::Delayed
        } else {
            JobState::Waiting
        }
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn add_repeatable(
        &self,
        payload: JobPayload,
        opts: RepeatOpts,
    ) -> Result<RepeatOpts, QueueError> {
        let now = Utc::now();
        let first = opts.first_fire(now)?;

        let mut inner = self.inner.write().map_err(|_| QueueError::LockPoisoned)?;

        // Re-registering replaces the previous rule and its pending entries.
        let task_id = opts.task_id;
        inner
            .entries
            .retain(|_, e| !(e.from_repeat && e.payload.id == task_id && e.state != JobState::Active));

        inner.rules.insert(
            task_id,
            RepeatRule {
                opts: opts.clone(),
                next: first,
                fired: 0,
            },
        );

        let entry_id = EntryId::new();
        inner.entries.insert(
            entry_id,
            QueuedJob {
                entry_id,
                payload,
                state: Self::entry_state(first, now),
                due_at: first,
                auto_remove: true,
                from_repeat: true,
            },
        );

        Ok(opts)
    }

    async fn add_once(&self, payload: JobPayload) -> Result<EntryId, QueueError> {
        let mut inner = self.inner.write().map_err(|_| QueueError::LockPoisoned)?;

        let entry_id = EntryId::new();
        inner.entries.insert(
            entry_id,
            QueuedJob {
                entry_id,
                payload,
                state: JobState::Waiting,
                due_at: Utc::now(),
                auto_remove: true,
                from_repeat: false,
            },
        );

        Ok(entry_id)
    }

    async fn jobs_in(&self, states: &[JobState]) -> Result<Vec<QueuedJob>, QueueError> {
        let inner = self.inner.read().map_err(|_| QueueError::LockPoisoned)?;

        let mut jobs: Vec<QueuedJob> = inner
            .entries
            .values()
            .filter(|e| states.contains(&e.state))
            .cloned()
            .collect();
        jobs.sort_by_key(|e| e.due_at);

        Ok(jobs)
    }

    async fn repeatable_jobs(&self) -> Result<Vec<RepeatRule>, QueueError> {
        let inner = self.inner.read().map_err(|_| QueueError::LockPoisoned)?;

        let mut rules: Vec<RepeatRule> = inner.rules.values().cloned().collect();
        rules.sort_by_key(|r| r.task_id().as_i64());

        Ok(rules)
    }

    async fn remove_job(&self, entry_id: EntryId) -> Result<(), QueueError> {
        let mut inner = self.inner.write().map_err(|_| QueueError::LockPoisoned)?;
        inner.entries.remove(&entry_id);
        Ok(())
    }

    async fn remove_repeatable(&self, opts: &RepeatOpts) -> Result<(), QueueError> {
        let mut inner = self.inner.write().map_err(|_| QueueError::LockPoisoned)?;

        inner.rules.remove(&opts.task_id);
        let task_id = opts.task_id;
        inner
            .entries
            .retain(|_, e| !(e.from_repeat && e.payload.id == task_id && e.state != JobState::Active));

        Ok(())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        max: usize,
    ) -> Result<Vec<QueuedJob>, QueueError> {
        let mut inner = self.inner.write().map_err(|_| QueueError::LockPoisoned)?;

        let mut due: Vec<EntryId> = inner
            .entries
            .values()
            .filter(|e| {
                matches!(e.state, JobState::Waiting | JobState::Delayed) && e.due_at <= now
            })
            .map(|e| e.entry_id)
            .collect();
        due.sort_by_key(|id| inner.entries[id].due_at);
        due.truncate(max);

        let mut claimed = Vec::with_capacity(due.len());
        for entry_id in due {
            let job = match inner.entries.get_mut(&entry_id) {
                Some(job) => {
                    job.state = JobState::Active;
                    job.clone()
                }
                None => continue,
            };

            // Advance the rule and materialize the next entry. An exhausted
            // rule keeps its stale cursor so status reconciliation can see it.
            if job.from_repeat {
                let next_entry = match inner.rules.get_mut(&job.payload.id) {
                    Some(rule) => {
                        rule.fired += 1;
                        match rule.opts.next_fire(job.due_at.max(now), rule.fired) {
                            Some(next) => {
                                rule.next = next;
                                let entry_id = EntryId::new();
                                Some(QueuedJob {
                                    entry_id,
                                    payload: job.payload.clone(),
                                    state: Self::entry_state(next, now),
                                    due_at: next,
                                    auto_remove: true,
                                    from_repeat: true,
                                })
                            }
                            None => None,
                        }
                    }
                    None => None,
                };
                if let Some(entry) = next_entry {
                    inner.entries.insert(entry.entry_id, entry);
                }
            }

            claimed.push(job);
        }

        Ok(claimed)
    }

    async fn complete(&self, entry_id: EntryId, success: bool) -> Result<(), QueueError> {
        let mut inner = self.inner.write().map_err(|_| QueueError::LockPoisoned)?;

        let auto_remove = inner
            .entries
            .get(&entry_id)
            .map(|e| e.auto_remove)
            .ok_or_else(|| QueueError::NotFound(entry_id.to_string()))?;

        if auto_remove {
            inner.entries.remove(&entry_id);
        } else if let Some(entry) = inner.entries.get_mut(&entry_id) {
            entry.state = if success {
                JobState::Completed
            } else {
                JobState::Failed
            };
        }

        Ok(())
    }

    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, QueueError> {
        let mut inner = self.inner.write().map_err(|_| QueueError::LockPoisoned)?;

        let now = Instant::now();
        if let Some(expiry) = inner.locks.get(key) {
            if *expiry > now {
                return Ok(false);
            }
        }
        inner.locks.insert(key.to_string(), now + ttl);

        Ok(true)
    }

    async fn unlock(&self, key: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.write().map_err(|_| QueueError::LockPoisoned)?;
        inner.locks.remove(key);
        Ok(())
    }
}
