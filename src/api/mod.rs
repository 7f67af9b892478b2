//! HTTP API module.
//!
//! Provides REST endpoints for managing tasks, controlling their queue
//! registrations, and querying the execution log.

mod errors;
mod handlers;
mod responses;

pub use errors::ApiError;
pub use handlers::ApiState;
pub use responses::*;

use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::scheduler::TaskManager;

/// Build the API router with all endpoints.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        // Health check
        .route("/api/health", get(handlers::health))
        // Tasks
        .route(
            "/api/tasks",
            get(handlers::list_tasks).post(handlers::create_task),
        )
        .route(
            "/api/tasks/{task_id}",
            get(handlers::get_task)
                .put(handlers::update_task)
                .delete(handlers::delete_task),
        )
        .route("/api/tasks/{task_id}/start", post(handlers::start_task))
        .route("/api/tasks/{task_id}/stop", post(handlers::stop_task))
        .route("/api/tasks/{task_id}/once", post(handlers::run_task_once))
        // Execution log
        .route("/api/task-logs", get(handlers::list_task_logs))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Create the API state from the task manager.
pub fn create_api_state(manager: Arc<TaskManager>) -> ApiState {
    ApiState { manager }
}

/// Start the API server.
///
/// This function spawns the server and returns a handle to the task.
/// The server runs until the task is aborted or the process exits.
pub async fn start_server(
    addr: SocketAddr,
    state: ApiState,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let router = build_router(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("API server listening on http://{}", addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(handle)
}
