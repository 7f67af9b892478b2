//! SQLite storage implementation.
//!
//! Provides persistent storage using SQLite with automatic schema migration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use super::{
    LogStatus, Page, Paginated, StoreError, TaskLogEntry, TaskLogStore, TaskQuery, TaskStore,
};
use crate::core::task::{Task, TaskDraft, TaskKind, TaskStatus};
use crate::core::types::TaskId;

/// SQLite backend implementing both the task store and the execution log.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database file and run migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StoreError::Other(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Other(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn kind_to_str(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Interval => "interval",
        TaskKind::Cron => "cron",
    }
}

fn str_to_kind(s: &str) -> TaskKind {
    match s {
        "cron" => TaskKind::Cron,
        _ => TaskKind::Interval,
    }
}

fn status_to_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Activated => "activated",
        TaskStatus::Disabled => "disabled",
    }
}

fn str_to_status(s: &str) -> TaskStatus {
    match s {
        "activated" => TaskStatus::Activated,
        _ => TaskStatus::Disabled,
    }
}

fn log_status_to_str(status: LogStatus) -> &'static str {
    match status {
        LogStatus::Success => "success",
        LogStatus::Failure => "failure",
    }
}

fn str_to_log_status(s: &str) -> LogStatus {
    match s {
        "success" => LogStatus::Success,
        _ => LogStatus::Failure,
    }
}

fn time_to_str(time: DateTime<Utc>) -> String {
    time.to_rfc3339()
}

fn str_to_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

type TaskRow = (
    i64,            // id
    String,         // name
    String,         // kind
    Option<String>, // cron
    Option<i64>,    // every_ms
    Option<String>, // start_at
    Option<String>, // end_at
    Option<i64>,    // run_limit
    String,         // service
    String,         // data
    String,         // status
    Option<String>, // job_opts
    Option<String>, // remark
    String,         // created_at
    String,         // updated_at
);

const TASK_COLUMNS: &str = "id, name, kind, cron, every_ms, start_at, end_at, run_limit, \
     service, data, status, job_opts, remark, created_at, updated_at";

fn row_to_task(row: TaskRow) -> Task {
    Task {
        id: TaskId::new(row.0),
        name: row.1,
        kind: str_to_kind(&row.2),
        cron: row.3,
        every_ms: row.4.map(|v| v as u64),
        start_at: row.5.as_deref().map(str_to_time),
        end_at: row.6.as_deref().map(str_to_time),
        limit: row.7.map(|v| v as u32),
        service: row.8,
        data: row.9,
        status: str_to_status(&row.10),
        job_opts: row.11,
        remark: row.12,
        created_at: str_to_time(&row.13),
        updated_at: str_to_time(&row.14),
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn create(&self, draft: TaskDraft) -> Result<Task, StoreError> {
        let now = time_to_str(Utc::now());
        let result = sqlx::query(
            r#"
            INSERT INTO tasks (name, kind, cron, every_ms, start_at, end_at, run_limit,
                               service, data, status, job_opts, remark, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?)
            "#,
        )
        .bind(&draft.name)
        .bind(kind_to_str(draft.kind))
        .bind(&draft.cron)
        .bind(draft.every_ms.map(|v| v as i64))
        .bind(draft.start_at.map(time_to_str))
        .bind(draft.end_at.map(time_to_str))
        .bind(draft.limit.map(|v| v as i64))
        .bind(&draft.service)
        .bind(&draft.data)
        .bind(status_to_str(draft.status))
        .bind(&draft.remark)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Other(e.to_string()))?;

        self.get(TaskId::new(result.last_insert_rowid())).await
    }

    async fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        let row: TaskRow =
            sqlx::query_as(&format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS))
                .bind(id.as_i64())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Other(e.to_string()))?
                .ok_or_else(|| StoreError::NotFound(format!("task: {}", id)))?;

        Ok(row_to_task(row))
    }

    async fn list(&self, query: &TaskQuery) -> Result<Paginated<Task>, StoreError> {
        let mut conditions = Vec::new();
        if query.name.is_some() {
            conditions.push("name LIKE '%' || ? || '%'");
        }
        if query.service.is_some() {
            conditions.push("service LIKE '%' || ? || '%'");
        }
        if query.kind.is_some() {
            conditions.push("kind = ?");
        }
        if query.status.is_some() {
            conditions.push("status = ?");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM tasks{}", where_clause);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(name) = &query.name {
            count_query = count_query.bind(name.clone());
        }
        if let Some(service) = &query.service {
            count_query = count_query.bind(service.clone());
        }
        if let Some(kind) = query.kind {
            count_query = count_query.bind(kind_to_str(kind));
        }
        if let Some(status) = query.status {
            count_query = count_query.bind(status_to_str(status));
        }
        let total = count_query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Other(e.to_string()))? as u64;

        let page = query.page;
        let list_sql = format!(
            "SELECT {} FROM tasks{} ORDER BY id ASC LIMIT ? OFFSET ?",
            TASK_COLUMNS, where_clause
        );
        let mut list_query = sqlx::query_as::<_, TaskRow>(&list_sql);
        if let Some(name) = &query.name {
            list_query = list_query.bind(name.clone());
        }
        if let Some(service) = &query.service {
            list_query = list_query.bind(service.clone());
        }
        if let Some(kind) = query.kind {
            list_query = list_query.bind(kind_to_str(kind));
        }
        if let Some(status) = query.status {
            list_query = list_query.bind(status_to_str(status));
        }
        let rows: Vec<TaskRow> = list_query
            .bind(page.page_size as i64)
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;

        Ok(Paginated::new(
            rows.into_iter().map(row_to_task).collect(),
            total,
            page,
        ))
    }

    async fn update(&self, id: TaskId, draft: TaskDraft) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET name = ?, kind = ?, cron = ?, every_ms = ?, start_at = ?, end_at = ?,
                run_limit = ?, service = ?, data = ?, status = ?, remark = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&draft.name)
        .bind(kind_to_str(draft.kind))
        .bind(&draft.cron)
        .bind(draft.every_ms.map(|v| v as i64))
        .bind(draft.start_at.map(time_to_str))
        .bind(draft.end_at.map(time_to_str))
        .bind(draft.limit.map(|v| v as i64))
        .bind(&draft.service)
        .bind(&draft.data)
        .bind(status_to_str(draft.status))
        .bind(&draft.remark)
        .bind(time_to_str(Utc::now()))
        .bind(id.as_i64())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("task: {}", id)));
        }
        Ok(())
    }

    async fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status_to_str(status))
            .bind(time_to_str(Utc::now()))
            .bind(id.as_i64())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("task: {}", id)));
        }
        Ok(())
    }

    async fn set_job_opts(
        &self,
        id: TaskId,
        job_opts: Option<String>,
        status: TaskStatus,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE tasks SET job_opts = ?, status = ?, updated_at = ? WHERE id = ?")
                .bind(&job_opts)
                .bind(status_to_str(status))
                .bind(time_to_str(Utc::now()))
                .bind(id.as_i64())
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("task: {}", id)));
        }
        Ok(())
    }

    async fn delete(&self, id: TaskId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("task: {}", id)));
        }
        Ok(())
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tasks WHERE status = ? ORDER BY id ASC",
            TASK_COLUMNS
        ))
        .bind(status_to_str(status))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Other(e.to_string()))?;

        Ok(rows.into_iter().map(row_to_task).collect())
    }
}

#[async_trait]
impl TaskLogStore for SqliteStore {
    async fn record(
        &self,
        task_id: TaskId,
        status: LogStatus,
        duration_ms: u64,
        detail: Option<String>,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO task_logs (task_id, status, duration_ms, detail, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(task_id.as_i64())
        .bind(log_status_to_str(status))
        .bind(duration_ms as i64)
        .bind(&detail)
        .bind(time_to_str(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Other(e.to_string()))?;

        Ok(result.last_insert_rowid())
    }

    async fn list_logs(&self, page: Page) -> Result<Paginated<TaskLogEntry>, StoreError> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM task_logs")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Other(e.to_string()))? as u64;

        let rows: Vec<(i64, i64, String, i64, Option<String>, String)> = sqlx::query_as(
            "SELECT id, task_id, status, duration_ms, detail, created_at \
             FROM task_logs ORDER BY id DESC LIMIT ? OFFSET ?",
        )
        .bind(page.page_size as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Other(e.to_string()))?;

        let items = rows
            .into_iter()
            .map(|row| TaskLogEntry {
                id: row.0,
                task_id: TaskId::new(row.1),
                status: str_to_log_status(&row.2),
                duration_ms: row.3 as u64,
                detail: row.4,
                created_at: str_to_time(&row.5),
            })
            .collect();

        Ok(Paginated::new(items, total, page))
    }

    async fn clear_logs(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM task_logs")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;
        Ok(())
    }

    async fn clear_logs_before(&self, cutoff: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM task_logs WHERE created_at < ?")
            .bind(time_to_str(cutoff))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get_task() {
        let store = SqliteStore::in_memory().await.unwrap();
        let task = store
            .create(TaskDraft::interval("clear", "LogClearJob.clear_task_log", 5000))
            .await
            .unwrap();

        let loaded = store.get(task.id).await.unwrap();
        assert_eq!(loaded.name, "clear");
        assert_eq!(loaded.every_ms, Some(5000));
        assert_eq!(loaded.kind, TaskKind::Interval);
        assert!(loaded.job_opts.is_none());
    }

    #[tokio::test]
    async fn test_list_with_filters_and_pagination() {
        let store = SqliteStore::in_memory().await.unwrap();
        for i in 0..3 {
            store
                .create(TaskDraft::interval(
                    format!("log task {}", i),
                    "LogClearJob.clear_task_log",
                    1000,
                ))
                .await
                .unwrap();
        }
        store
            .create(TaskDraft::cron("other", "HttpJob.ping", "* * * * *"))
            .await
            .unwrap();

        let query = TaskQuery {
            service: Some("LogClear".into()),
            page: Page::new(1, 2),
            ..Default::default()
        };
        let page = store.list(&query).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
    }

    #[tokio::test]
    async fn test_update_missing_task_fails() {
        let store = SqliteStore::in_memory().await.unwrap();
        let result = store
            .update(TaskId::new(7), TaskDraft::interval("x", "Job.run", 1))
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_job_opts_roundtrip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let task = store
            .create(TaskDraft::cron("c", "Job.run", "* * * * *"))
            .await
            .unwrap();

        store
            .set_job_opts(
                task.id,
                Some("{\"cron\":\"* * * * *\"}".into()),
                TaskStatus::Activated,
            )
            .await
            .unwrap();

        let loaded = store.get(task.id).await.unwrap();
        assert_eq!(loaded.job_opts.as_deref(), Some("{\"cron\":\"* * * * *\"}"));
        assert_eq!(loaded.status, TaskStatus::Activated);
    }

    #[tokio::test]
    async fn test_log_recording_and_listing() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = TaskId::new(1);
        store.record(id, LogStatus::Success, 25, None).await.unwrap();
        store
            .record(id, LogStatus::Failure, 50, Some("handler threw".into()))
            .await
            .unwrap();

        let page = store.list_logs(Page::default()).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].status, LogStatus::Failure);
        assert_eq!(page.items[0].duration_ms, 50);
    }

    #[tokio::test]
    async fn test_clear_logs() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .record(TaskId::new(1), LogStatus::Success, 1, None)
            .await
            .unwrap();
        store.clear_logs().await.unwrap();
        let page = store.list_logs(Page::default()).await.unwrap();
        assert_eq!(page.total, 0);
    }
}
