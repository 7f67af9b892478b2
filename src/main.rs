//! tempod - dynamic task scheduler daemon.
//!
//! Usage:
//!   tempod run [--config tempo.yaml]       Run the daemon
//!   tempod validate --config tempo.yaml    Validate a configuration file

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tempo::{
    AppConfig, CompletionHook, Event, EventBus, EventHandler, HandlerRegistry, LogClearJob,
    MemoryQueue, MemoryStore, QueueBackend, TaskLogStore, TaskManager, TaskStore, Worker,
    config::{QueueConfig, StorageConfig},
};
use tracing::{error, info};

/// tempod - dynamic task scheduler daemon
#[derive(Parser)]
#[command(name = "tempod")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run {
        /// Path to the configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Validate a configuration file without running
    Validate {
        /// Path to the configuration file
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
}

/// Logs job lifecycle events.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::JobStarted {
                task_id, entry_id, ..
            } => {
                info!(task_id = %task_id, entry_id = %entry_id, "job started");
            }
            Event::JobCompleted {
                task_id,
                success,
                duration,
                ..
            } => {
                if *success {
                    info!(task_id = %task_id, duration = ?duration, "job completed");
                } else {
                    error!(task_id = %task_id, duration = ?duration, "job failed");
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config = match config {
                Some(path) => AppConfig::load(path)?,
                None => AppConfig::default(),
            };
            run_daemon(config).await?;
        }
        Commands::Validate { config } => {
            AppConfig::load(&config)?;
            info!("configuration is valid: {}", config.display());
        }
    }

    Ok(())
}

async fn run_daemon(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (store, logs) = build_storage(&config).await?;
    let queue = build_queue(&config).await?;

    let mut registry = HandlerRegistry::new();
    registry.register(LogClearJob::SERVICE, Arc::new(LogClearJob::new(logs.clone())));
    let registry = Arc::new(registry);

    let manager = Arc::new(TaskManager::new(
        store,
        logs.clone(),
        queue.clone(),
        registry.clone(),
        config.queue.prefix(),
    ));

    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;
    event_bus
        .register(Arc::new(CompletionHook::new(manager.clone())))
        .await;

    manager.recover().await?;

    let worker = Worker::new(queue, registry, logs, event_bus)
        .with_tick_interval(config.worker.tick_interval())
        .with_claim_batch(config.worker.claim_batch)
        .with_shutdown_timeout(config.worker.shutdown_timeout());
    let (worker_handle, worker_task) = worker.start();

    let addr: SocketAddr = config.api.bind_addr().parse()?;
    let api_task = tempo::api::start_server(addr, tempo::api::create_api_state(manager)).await?;

    info!("Press Ctrl+C to stop");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            worker_handle.shutdown().await?;
            api_task.abort();
        }
        _ = worker_task => {
            info!("Worker stopped");
        }
    }

    info!("Goodbye!");
    Ok(())
}

async fn build_storage(
    config: &AppConfig,
) -> Result<(Arc<dyn TaskStore>, Arc<dyn TaskLogStore>), Box<dyn std::error::Error>> {
    match &config.storage {
        StorageConfig::Memory => {
            let store = Arc::new(MemoryStore::new());
            Ok((store.clone(), store))
        }
        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite { path } => {
            let store = Arc::new(tempo::SqliteStore::new(path).await?);
            info!(path = %path, "using sqlite storage");
            Ok((store.clone(), store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageConfig::Sqlite { .. } => {
            Err("sqlite storage requires the 'sqlite' feature".into())
        }
    }
}

async fn build_queue(
    config: &AppConfig,
) -> Result<Arc<dyn QueueBackend>, Box<dyn std::error::Error>> {
    match &config.queue {
        QueueConfig::Memory { .. } => Ok(Arc::new(MemoryQueue::new())),
        #[cfg(feature = "redis-queue")]
        QueueConfig::Redis { url, prefix } => {
            let queue = tempo::RedisQueue::connect(url, prefix).await?;
            info!(prefix = %prefix, "using redis queue");
            Ok(Arc::new(queue))
        }
        #[cfg(not(feature = "redis-queue"))]
        QueueConfig::Redis { .. } => {
            Err("redis queue requires the 'redis-queue' feature".into())
        }
    }
}
