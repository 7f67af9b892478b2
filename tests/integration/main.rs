//! Integration tests exercising the full scheduling pipeline.

mod common;

mod api;
mod lifecycle;
mod recovery;
mod security;
mod worker_flow;
