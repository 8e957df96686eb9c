// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod alert;
pub mod error;
pub mod order;
pub mod store;

// Ingestion pipeline: mapping, normalization, dedup
pub mod ingest;

// Outbound messaging and dispatch
pub mod dispatch;
pub mod notify;

pub mod api;
pub mod config;
pub mod metrics;

pub use crate::api::router;
