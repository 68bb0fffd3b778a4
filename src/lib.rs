#![deny(missing_docs)]

//! Core library for the ingestd batch ingestion service.

/// HTTP routing and REST/SSE handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Structured logging and tracing setup.
pub mod logging;
/// Scheduler and pipeline counters.
pub mod metrics;
/// Per-file ingestion pipeline and collaborator contracts.
pub mod pipeline;
/// Progress trackers and their registry.
pub mod progress;
/// User-facing upload queues.
pub mod queue;
/// Job scheduling, slot pool, and retry policy.
pub mod scheduler;
/// Service glue shared by the HTTP surface.
pub mod service;
/// Streaming front door for small batches.
pub mod stream;
