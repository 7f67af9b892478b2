//! tempo - a dynamic task scheduler backed by a durable work queue.
//!
//! Persisted task definitions reference registered handlers by a
//! `"Service.method"` string; the queue owns delivery timing via repeat
//! rules, a worker consumes due entries, and a recovery pass rebuilds queue
//! state from the store after a restart.

pub mod api;
pub mod config;
pub mod core;
pub mod events;
pub mod jobs;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod worker;

pub use config::{AppConfig, ConfigError};
pub use core::schedule::{Schedule, ScheduleError};
pub use core::task::{Task, TaskDraft, TaskKind, TaskStatus};
pub use core::types::{EntryId, TaskId};
pub use events::{Event, EventBus, EventHandler};
pub use jobs::LogClearJob;
pub use queue::{JobPayload, JobState, MemoryQueue, QueueBackend, QueueError, QueuedJob, RepeatOpts};
#[cfg(feature = "redis-queue")]
pub use queue::RedisQueue;
pub use registry::{CallArgs, HandlerRegistry, InvokeError, JobHandler, RegistryError, ServiceRef};
pub use scheduler::{CompletionHook, SchedulerError, TaskManager};
pub use store::{
    LogStatus, MemoryStore, Page, Paginated, StoreError, TaskLogEntry, TaskLogStore, TaskQuery,
    TaskStore,
};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
pub use worker::{Worker, WorkerError, WorkerHandle};
