//! opslog-core — operational telemetry pipeline.
//!
//! This crate exposes the pipeline layers as public modules, plus the shared
//! types used across all of them.
//!
//! # Architecture
//!
//! ```text
//! LogEvent ──► Normalizer ──► Store (rotated files) ──► Export
//!                                 │
//!                                 └──► Volume guard ──► AlertSink
//! ```
//!
//! Every write path is best-effort: the store and the guard report a status
//! and log failures through `tracing` rather than returning errors.

pub mod clock;
pub mod config;
pub mod error;
pub mod export;
pub mod guard;
pub mod normalizer;
pub mod pipeline;
pub mod store;
pub mod types;

pub use pipeline::Pipeline;
pub use types::{CanonicalRecord, LogEvent, Severity, StreamName};
