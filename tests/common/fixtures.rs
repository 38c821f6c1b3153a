//! Static event corpora and on-disk store fixtures used across harnesses.

use std::path::Path;

use opslog_core::{LogEvent, Severity};
use serde_json::json;

/// Ingestion payloads as they arrive over HTTP, in various message shapes.
pub const CORPUS_JSON: &[&str] = &[
    r#"{"stream":"auth","message":"login ok","severity":"info","timestamp":"2024-03-01T09:00:00Z"}"#,
    r#"{"stream":"auth","message":"{\"user\":\"alice\",\"attempt\":3}","severity":"warn","timestamp":"2024-03-01T09:00:01Z"}"#,
    r#"{"stream":"payments","message":{"order":{"id":42,"total":19.5}},"severity":"error","timestamp":"2024-03-01T09:00:02Z"}"#,
    r#"{"stream":"payments","message":["a","b"],"timestamp":"2024-03-01T09:00:03Z"}"#,
    r#"{"stream":"../../etc/passwd","message":"path games"}"#,
];

/// Plain-text events for one stream, one per severity.
pub fn auth_events() -> Vec<LogEvent> {
    vec![
        LogEvent::new("auth", "login ok").timestamp("2024-03-01T09:00:00Z"),
        LogEvent::new("auth", "slow token refresh")
            .severity(Severity::Warn)
            .timestamp("2024-03-01T09:30:00Z"),
        LogEvent::new("auth", "token store unreachable")
            .severity(Severity::Error)
            .timestamp("2024-03-01T10:00:00Z"),
    ]
}

/// A structured event whose message flattens into several columns.
pub fn order_event() -> LogEvent {
    LogEvent::new(
        "payments",
        json!({ "order": { "id": 42, "total": 19.5 }, "note": "said \"hi\"" }),
    )
    .timestamp("2024-03-01T11:00:00Z")
}

/// Write a rotated file by hand, bypassing the writer.
pub fn write_store_file(dir: &Path, name: &str, lines: &[&str]) {
    std::fs::create_dir_all(dir).unwrap();
    let mut body = lines.join("\n");
    body.push('\n');
    std::fs::write(dir.join(name), body).unwrap();
}
