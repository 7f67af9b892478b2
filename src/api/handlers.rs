//! API request handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::core::task::{TaskDraft, TaskKind, TaskStatus};
use crate::core::types::TaskId;
use crate::scheduler::TaskManager;
use crate::store::{Page, TaskQuery};

use super::errors::ApiError;
use super::responses::{
    HealthResponse, MessageResponse, TaskListResponse, TaskLogListResponse, TaskResponse,
};

/// Shared application state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<TaskManager>,
}

/// Query parameters for the task list endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListTasksQuery {
    pub name: Option<String>,
    pub service: Option<String>,
    pub kind: Option<TaskKind>,
    pub status: Option<TaskStatus>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

impl ListTasksQuery {
    fn into_query(self) -> TaskQuery {
        let defaults = Page::default();
        TaskQuery {
            name: self.name,
            service: self.service,
            kind: self.kind,
            status: self.status,
            page: Page::new(
                self.page.unwrap_or(defaults.page),
                self.page_size.unwrap_or(defaults.page_size),
            ),
        }
    }
}

/// Query parameters for the log list endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListLogsQuery {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// List tasks.
pub async fn list_tasks(
    State(state): State<ApiState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let page = state.manager.list(&query.into_query()).await?;
    Ok(Json(TaskListResponse::from(page)))
}

/// Create a task; an activated draft is registered immediately.
pub async fn create_task(
    State(state): State<ApiState>,
    Json(draft): Json<TaskDraft>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = state.manager.create(draft).await?;
    Ok(Json(TaskResponse::from(task)))
}

/// Get a specific task.
pub async fn get_task(
    State(state): State<ApiState>,
    Path(task_id): Path<i64>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = state.manager.info(TaskId::new(task_id)).await?;
    Ok(Json(TaskResponse::from(task)))
}

/// Update a task and re-apply its desired status.
pub async fn update_task(
    State(state): State<ApiState>,
    Path(task_id): Path<i64>,
    Json(draft): Json<TaskDraft>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = state.manager.update(TaskId::new(task_id), draft).await?;
    Ok(Json(TaskResponse::from(task)))
}

/// Stop and delete a task.
pub async fn delete_task(
    State(state): State<ApiState>,
    Path(task_id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.manager.delete(TaskId::new(task_id)).await?;
    Ok(Json(MessageResponse {
        message: format!("task {} deleted", task_id),
    }))
}

/// Register the task's repeat rule.
pub async fn start_task(
    State(state): State<ApiState>,
    Path(task_id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.manager.start(TaskId::new(task_id)).await?;
    Ok(Json(MessageResponse {
        message: format!("task {} started", task_id),
    }))
}

/// Remove the task's repeat rule.
pub async fn stop_task(
    State(state): State<ApiState>,
    Path(task_id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.manager.stop(TaskId::new(task_id)).await?;
    Ok(Json(MessageResponse {
        message: format!("task {} stopped", task_id),
    }))
}

/// Fire the task once, right now.
pub async fn run_task_once(
    State(state): State<ApiState>,
    Path(task_id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.manager.once(TaskId::new(task_id)).await?;
    Ok(Json(MessageResponse {
        message: format!("task {} queued", task_id),
    }))
}

/// List execution log records, newest first.
pub async fn list_task_logs(
    State(state): State<ApiState>,
    Query(query): Query<ListLogsQuery>,
) -> Result<Json<TaskLogListResponse>, ApiError> {
    let defaults = Page::default();
    let page = Page::new(
        query.page.unwrap_or(defaults.page),
        query.page_size.unwrap_or(defaults.page_size),
    );
    let logs = state.manager.task_logs(page).await?;
    Ok(Json(TaskLogListResponse::from(logs)))
}
