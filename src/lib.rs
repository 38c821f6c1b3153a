//! opslog — operational telemetry service.
//!
//! Thin HTTP layer over the workspace crates:
//!
//! ```text
//! POST /api/logs ──► Pipeline::ingest ──► rotated files ──► volume guard ──► webhook
//! GET  /api/logs/export ──► Arbiter (single-flight) ──► Exporter
//! GET  /api/logs/streams ──► FetchGate (cache + arbiter) ──► Exporter
//! ```

pub mod server;

pub use server::{router, AppState};
