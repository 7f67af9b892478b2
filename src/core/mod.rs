//! Core domain types: identifiers, task definitions, and schedules.

pub mod schedule;
pub mod task;
pub mod types;
