//! Queue consumer.
//!
//! The worker polls the queue on a fixed tick, claims due entries, and runs
//! each one on its own spawned task. Every claimed entry is driven to a
//! terminal outcome: handler resolution failures and handler errors are
//! recorded as failed runs, never allowed to take the consumer down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::types::EntryId;
use crate::events::{Event, EventBus};
use crate::queue::{QueueBackend, QueuedJob};
use crate::registry::{CallArgs, HandlerRegistry, ServiceRef};
use crate::store::{LogStatus, TaskLogStore};

/// Buffer size for the command channel between WorkerHandle and Worker.
const COMMAND_CHANNEL_BUFFER: usize = 8;

/// Errors that can occur controlling the worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),
}

enum WorkerCommand {
    Shutdown { response: oneshot::Sender<()> },
}

/// Handle for controlling a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
    command_tx: mpsc::Sender<WorkerCommand>,
}

impl WorkerHandle {
    /// Shut the worker down, waiting for in-flight runs up to the worker's
    /// shutdown timeout.
    pub async fn shutdown(&self) -> Result<(), WorkerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(WorkerCommand::Shutdown {
                response: response_tx,
            })
            .await
            .map_err(|_| WorkerError::ChannelError("failed to send shutdown command".into()))?;

        response_rx
            .await
            .map_err(|_| WorkerError::ChannelError("failed to receive shutdown response".into()))
    }
}

/// Consumes due queue entries and invokes their handlers.
pub struct Worker {
    queue: Arc<dyn QueueBackend>,
    registry: Arc<HandlerRegistry>,
    logs: Arc<dyn TaskLogStore>,
    event_bus: Arc<EventBus>,
    tick_interval: Duration,
    claim_batch: usize,
    running: Arc<RwLock<HashMap<EntryId, JoinHandle<()>>>>,
    shutdown_timeout: Duration,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn QueueBackend>,
        registry: Arc<HandlerRegistry>,
        logs: Arc<dyn TaskLogStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            queue,
            registry,
            logs,
            event_bus,
            tick_interval: Duration::from_secs(1),
            claim_batch: 16,
            running: Arc::new(RwLock::new(HashMap::new())),
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    /// Set the polling interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set how many entries one tick may claim.
    pub fn with_claim_batch(mut self, max: usize) -> Self {
        self.claim_batch = max;
        self
    }

    /// Set the graceful shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Start the worker and return a handle for controlling it.
    pub fn start(self) -> (WorkerHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let handle = WorkerHandle { command_tx };

        let worker_task = tokio::spawn(async move {
            self.run(command_rx).await;
        });

        (handle, worker_task)
    }

    /// Main consumer loop.
    async fn run(self, mut command_rx: mpsc::Receiver<WorkerCommand>) {
        let mut interval = tokio::time::interval(self.tick_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.claim_and_dispatch().await;
                    self.cleanup_finished().await;
                }

                Some(command) = command_rx.recv() => {
                    match command {
                        WorkerCommand::Shutdown { response } => {
                            self.await_running().await;
                            let _ = response.send(());
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn claim_and_dispatch(&self) {
        let claimed = match self.queue.claim_due(chrono::Utc::now(), self.claim_batch).await {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!(error = %e, "failed to claim due entries");
                return;
            }
        };

        for job in claimed {
            let entry_id = job.entry_id;
            let queue = Arc::clone(&self.queue);
            let registry = Arc::clone(&self.registry);
            let logs = Arc::clone(&self.logs);
            let event_bus = Arc::clone(&self.event_bus);

            let handle = tokio::spawn(async move {
                execute_entry(job, queue, registry, logs, event_bus).await;
            });

            self.running.write().await.insert(entry_id, handle);
        }
    }

    async fn cleanup_finished(&self) {
        let mut running = self.running.write().await;
        running.retain(|_, handle| !handle.is_finished());
    }

    /// Wait for in-flight runs to finish, bounded by the shutdown timeout.
    async fn await_running(&self) {
        let running_count = self.running.read().await.len();
        if running_count == 0 {
            return;
        }

        info!(
            running = running_count,
            timeout = ?self.shutdown_timeout,
            "waiting for in-flight runs before shutdown"
        );

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        loop {
            {
                let mut running = self.running.write().await;
                running.retain(|_, handle| !handle.is_finished());
                if running.is_empty() {
                    return;
                }
            }

            if tokio::time::Instant::now() >= deadline {
                let mut running = self.running.write().await;
                warn!(
                    abandoned = running.len(),
                    "shutdown timeout reached, aborting in-flight runs"
                );
                for (_, handle) in running.drain() {
                    handle.abort();
                }
                return;
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Drive one claimed entry to a terminal outcome.
async fn execute_entry(
    job: QueuedJob,
    queue: Arc<dyn QueueBackend>,
    registry: Arc<HandlerRegistry>,
    logs: Arc<dyn TaskLogStore>,
    event_bus: Arc<EventBus>,
) {
    let task_id = job.payload.id;
    let entry_id = job.entry_id;

    event_bus.emit(Event::job_started(task_id, entry_id)).await;
    debug!(task_id = %task_id, entry_id = %entry_id, service = %job.payload.service, "run started");

    let start = std::time::Instant::now();
    let outcome = invoke(&job, &registry).await;
    let duration = start.elapsed();

    let (status, detail) = match &outcome {
        Ok(()) => {
            info!(task_id = %task_id, duration_ms = duration.as_millis() as u64, "run succeeded");
            (LogStatus::Success, None)
        }
        Err(detail) => {
            warn!(task_id = %task_id, duration_ms = duration.as_millis() as u64, error = %detail, "run failed");
            (LogStatus::Failure, Some(detail.clone()))
        }
    };

    if let Err(e) = logs
        .record(task_id, status, duration.as_millis() as u64, detail)
        .await
    {
        warn!(task_id = %task_id, error = %e, "failed to record run outcome");
    }

    if let Err(e) = queue.complete(entry_id, outcome.is_ok()).await {
        warn!(task_id = %task_id, entry_id = %entry_id, error = %e, "failed to complete queue entry");
    }

    event_bus
        .emit(Event::job_completed(
            task_id,
            entry_id,
            outcome.is_ok(),
            duration,
        ))
        .await;
}

/// Resolve and call the entry's handler; any error becomes the run's detail.
async fn invoke(job: &QueuedJob, registry: &HandlerRegistry) -> Result<(), String> {
    let service_ref = ServiceRef::parse(&job.payload.service).map_err(|e| e.to_string())?;
    let handler = registry.resolve(&service_ref).map_err(|e| e.to_string())?;

    let args = CallArgs::parse(&job.payload.data);
    handler
        .call(&service_ref.method, args)
        .await
        .map_err(|e| e.to_string())
}
