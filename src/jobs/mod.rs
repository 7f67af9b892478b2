//! Built-in job handlers.
//!
//! These are the handlers registered by the daemon itself. Downstream users
//! register their own [`JobHandler`](crate::registry::JobHandler)
//! implementations next to these at startup.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;

use crate::registry::{CallArgs, InvokeError, JobHandler};
use crate::store::TaskLogStore;

/// Maintenance handler for the execution log.
///
/// Exposes `clear_task_log` (drop everything) and `clear_before` (drop
/// entries older than a given number of days, default 30).
pub struct LogClearJob {
    logs: Arc<dyn TaskLogStore>,
}

impl LogClearJob {
    pub const SERVICE: &'static str = "LogClearJob";

    const DEFAULT_RETENTION_DAYS: i64 = 30;

    pub fn new(logs: Arc<dyn TaskLogStore>) -> Self {
        Self { logs }
    }

    fn retention_days(args: &CallArgs) -> Result<i64, InvokeError> {
        match args.first() {
            None => Ok(Self::DEFAULT_RETENTION_DAYS),
            Some(value) => value
                .as_i64()
                .filter(|days| *days > 0)
                .ok_or_else(|| InvokeError::new(format!("invalid retention days: {value}"))),
        }
    }
}

#[async_trait]
impl JobHandler for LogClearJob {
    fn methods(&self) -> &[&'static str] {
        &["clear_task_log", "clear_before"]
    }

    async fn call(&self, method: &str, args: CallArgs) -> Result<(), InvokeError> {
        match method {
            "clear_task_log" => self
                .logs
                .clear_logs()
                .await
                .map_err(|e| InvokeError::new(e.to_string())),
            "clear_before" => {
                let days = Self::retention_days(&args)?;
                let cutoff = Utc::now() - ChronoDuration::days(days);
                self.logs
                    .clear_logs_before(cutoff)
                    .await
                    .map_err(|e| InvokeError::new(e.to_string()))
            }
            other => Err(InvokeError::new(format!("unknown method: {other}"))),
        }
    }
}
