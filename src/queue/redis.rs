//! Redis-backed queue backend.
//!
//! Keyspace, all under a configurable prefix:
//!
//! - `{prefix}:entries`    hash  entry id -> serialized entry
//! - `{prefix}:due`        zset  entry id scored by fire time (millis)
//! - `{prefix}:rules`      hash  task id -> serialized repeat rule
//! - `{prefix}:pending:{task}`  the rule's one pending entry id
//!
//! Claiming is atomic across workers: a Lua script pops due ids out of the
//! zset and returns the matching entries in one round trip, so two workers
//! never receive the same entry. Rule advancement happens after the claim,
//! which is safe because each entry is claimed exactly once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;

use super::{JobPayload, JobState, QueueBackend, QueueError, QueuedJob, RepeatOpts, RepeatRule};
use crate::core::types::{EntryId, TaskId};

const CLAIM_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
if #due > 0 then
    redis.call('ZREM', KEYS[1], unpack(due))
end
local jobs = {}
for i, id in ipairs(due) do
    jobs[i] = redis.call('HGET', KEYS[2], id)
end
return jobs
"#;

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Backend(err.to_string())
    }
}

/// Redis implementation of [`QueueBackend`].
pub struct RedisQueue {
    conn: ConnectionManager,
    prefix: String,
    claim_script: Script,
}

impl RedisQueue {
    /// Connect to Redis; keys are namespaced under `prefix`.
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, QueueError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
            claim_script: Script::new(CLAIM_SCRIPT),
        })
    }

    fn entries_key(&self) -> String {
        format!("{}:entries", self.prefix)
    }

    fn due_key(&self) -> String {
        format!("{}:due", self.prefix)
    }

    fn rules_key(&self) -> String {
        format!("{}:rules", self.prefix)
    }

    fn pending_key(&self, task_id: TaskId) -> String {
        format!("{}:pending:{}", self.prefix, task_id)
    }

    fn encode<T: serde::Serialize>(value: &T) -> Result<String, QueueError> {
        serde_json::to_string(value).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    fn decode<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, QueueError> {
        serde_json::from_str(raw).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    /// Write a pending entry and index it as the rule's current entry.
    async fn push_entry(&self, entry: &QueuedJob, pending_for: Option<TaskId>) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let id = entry.entry_id.to_string();
        let encoded = Self::encode(entry)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(self.entries_key(), &id, encoded)
            .ignore()
            .zadd(self.due_key(), &id, entry.due_at.timestamp_millis())
            .ignore();
        if let Some(task_id) = pending_for {
            pipe.set(self.pending_key(task_id), &id).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;

        Ok(())
    }

    /// Drop the rule's pending entry, if one is indexed.
    async fn drop_pending(&self, task_id: TaskId) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let pending_key = self.pending_key(task_id);

        let pending: Option<String> = conn.get(&pending_key).await?;
        if let Some(entry_id) = pending {
            redis::pipe()
                .atomic()
                .hdel(self.entries_key(), &entry_id)
                .ignore()
                .zrem(self.due_key(), &entry_id)
                .ignore()
                .del(&pending_key)
                .ignore()
                .query_async::<()>(&mut conn)
                .await?;
        }

        Ok(())
    }

    /// Advance the repeat rule behind a just-claimed entry. Exhausted rules
    /// keep their stale cursor until the task is stopped.
    async fn advance_rule(&self, job: &QueuedJob, now: DateTime<Utc>) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let task_field = job.payload.id.to_string();

        let raw: Option<String> = conn.hget(self.rules_key(), &task_field).await?;
        let Some(raw) = raw else {
            return Ok(());
        };
        let mut rule: RepeatRule = Self::decode(&raw)?;

        rule.fired += 1;
        match rule.opts.next_fire(job.due_at.max(now), rule.fired) {
            Some(next) => {
                rule.next = next;
                let _: () = conn
                    .hset(self.rules_key(), &task_field, Self::encode(&rule)?)
                    .await?;

                let entry = QueuedJob {
                    entry_id: EntryId::new(),
                    payload: job.payload.clone(),
                    state: JobState::Delayed,
                    due_at: next,
                    auto_remove: true,
                    from_repeat: true,
                };
                self.push_entry(&entry, Some(job.payload.id)).await?;
            }
            None => {
                let _: () = conn
                    .hset(self.rules_key(), &task_field, Self::encode(&rule)?)
                    .await?;
                let _: () = conn.del(self.pending_key(job.payload.id)).await?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl QueueBackend for RedisQueue {
    async fn add_repeatable(
        &self,
        payload: JobPayload,
        opts: RepeatOpts,
    ) -> Result<RepeatOpts, QueueError> {
        let now = Utc::now();
        let first = opts.first_fire(now)?;
        let task_id = opts.task_id;

        // Re-registering replaces the previous rule and its pending entry.
        self.drop_pending(task_id).await?;

        let rule = RepeatRule {
            opts: opts.clone(),
            next: first,
            fired: 0,
        };
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(self.rules_key(), task_id.to_string(), Self::encode(&rule)?)
            .await?;

        let entry = QueuedJob {
            entry_id: EntryId::new(),
            payload,
            state: JobState::Delayed,
            due_at: first,
            auto_remove: true,
            from_repeat: true,
        };
        self.push_entry(&entry, Some(task_id)).await?;

        Ok(opts)
    }

    async fn add_once(&self, payload: JobPayload) -> Result<EntryId, QueueError> {
        let entry = QueuedJob {
            entry_id: EntryId::new(),
            payload,
            state: JobState::Waiting,
            due_at: Utc::now(),
            auto_remove: true,
            from_repeat: false,
        };
        self.push_entry(&entry, None).await?;
        Ok(entry.entry_id)
    }

    async fn jobs_in(&self, states: &[JobState]) -> Result<Vec<QueuedJob>, QueueError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.hvals(self.entries_key()).await?;

        let mut jobs = Vec::new();
        for item in raw {
            let job: QueuedJob = Self::decode(&item)?;
            if states.contains(&job.state) {
                jobs.push(job);
            }
        }
        jobs.sort_by_key(|e| e.due_at);

        Ok(jobs)
    }

    async fn repeatable_jobs(&self) -> Result<Vec<RepeatRule>, QueueError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.hvals(self.rules_key()).await?;

        let mut rules = Vec::with_capacity(raw.len());
        for item in raw {
            rules.push(Self::decode(&item)?);
        }
        rules.sort_by_key(|r: &RepeatRule| r.task_id().as_i64());

        Ok(rules)
    }

    async fn remove_job(&self, entry_id: EntryId) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let id = entry_id.to_string();

        redis::pipe()
            .atomic()
            .hdel(self.entries_key(), &id)
            .ignore()
            .zrem(self.due_key(), &id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn remove_repeatable(&self, opts: &RepeatOpts) -> Result<(), QueueError> {
        self.drop_pending(opts.task_id).await?;

        let mut conn = self.conn.clone();
        let _: () = conn
            .hdel(self.rules_key(), opts.task_id.to_string())
            .await?;

        Ok(())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        max: usize,
    ) -> Result<Vec<QueuedJob>, QueueError> {
        let mut conn = self.conn.clone();

        let raw: Vec<String> = self
            .claim_script
            .key(self.due_key())
            .key(self.entries_key())
            .arg(now.timestamp_millis())
            .arg(max)
            .invoke_async(&mut conn)
            .await?;

        let mut claimed = Vec::with_capacity(raw.len());
        for item in raw {
            let mut job: QueuedJob = Self::decode(&item)?;
            job.state = JobState::Active;
            let _: () = conn
                .hset(self.entries_key(), job.entry_id.to_string(), Self::encode(&job)?)
                .await?;

            if job.from_repeat {
                self.advance_rule(&job, now).await?;
            }
            claimed.push(job);
        }

        Ok(claimed)
    }

    async fn complete(&self, entry_id: EntryId, success: bool) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let id = entry_id.to_string();

        let raw: Option<String> = conn.hget(self.entries_key(), &id).await?;
        let raw = raw.ok_or_else(|| QueueError::NotFound(id.clone()))?;
        let mut job: QueuedJob = Self::decode(&raw)?;

        if job.auto_remove {
            let _: () = conn.hdel(self.entries_key(), &id).await?;
        } else {
            job.state = if success {
                JobState::Completed
            } else {
                JobState::Failed
            };
            let _: () = conn.hset(self.entries_key(), &id, Self::encode(&job)?).await?;
        }

        Ok(())
    }

    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1);

        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(secs)
            .query_async(&mut conn)
            .await?;

        Ok(acquired.is_some())
    }

    async fn unlock(&self, key: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }
}
