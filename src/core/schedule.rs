//! Schedule parsing and next occurrence calculation.
//!
//! Supports standard 5-field cron, extended 6-field cron (with seconds),
//! and fixed millisecond intervals.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when parsing or using schedules.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Invalid cron expression.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid interval.
    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// No more occurrences.
    #[error("no more occurrences")]
    NoMoreOccurrences,
}

/// A parsed schedule: either a cron expression or a fixed interval.
#[derive(Debug, Clone)]
pub enum Schedule {
    Cron {
        schedule: Box<CronSchedule>,
        timezone: Tz,
    },
    Interval(Duration),
}

impl Schedule {
    /// Parse a cron expression in UTC.
    ///
    /// Accepts standard 5-field cron (`minute hour day month weekday`) or
    /// extended 6-field cron with a leading seconds field.
    pub fn cron(expression: &str) -> Result<Self, ScheduleError> {
        Self::cron_in_timezone(expression, "UTC")
    }

    /// Parse a cron expression evaluated in a specific timezone.
    pub fn cron_in_timezone(expression: &str, timezone: &str) -> Result<Self, ScheduleError> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| ScheduleError::InvalidTimezone(timezone.to_string()))?;

        let fields: Vec<&str> = expression.split_whitespace().collect();
        let normalized = match fields.len() {
            // Standard 5-field cron, add a seconds field
            5 => format!("0 {}", expression),
            6 => expression.to_string(),
            n => {
                return Err(ScheduleError::InvalidCron(format!(
                    "expected 5 or 6 fields, got {}",
                    n
                )));
            }
        };

        let schedule = CronSchedule::from_str(&normalized)
            .map_err(|e| ScheduleError::InvalidCron(e.to_string()))?;

        Ok(Schedule::Cron {
            schedule: Box::new(schedule),
            timezone: tz,
        })
    }

    /// Build a fixed-interval schedule from milliseconds.
    pub fn every_ms(ms: u64) -> Result<Self, ScheduleError> {
        if ms == 0 {
            return Err(ScheduleError::InvalidInterval("interval is zero".into()));
        }
        Ok(Schedule::Interval(Duration::from_millis(ms)))
    }

    /// Get the next occurrence strictly after the given time.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        match self {
            Schedule::Cron { schedule, timezone } => {
                let local = after.with_timezone(timezone);
                schedule
                    .after(&local)
                    .next()
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or(ScheduleError::NoMoreOccurrences)
            }
            Schedule::Interval(duration) => {
                let step = ChronoDuration::from_std(*duration)
                    .map_err(|e| ScheduleError::InvalidInterval(e.to_string()))?;
                Ok(after + step)
            }
        }
    }

    /// Get the next occurrence from now.
    pub fn next(&self) -> Result<DateTime<Utc>, ScheduleError> {
        self.next_after(Utc::now())
    }
}
