//! Core types for opslog-core.
//!
//! This module defines the data structures shared across the pipeline
//! layers: the inbound [`LogEvent`], its [`Severity`], the flattened
//! [`CanonicalRecord`], and the sanitised [`StreamName`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Stream used when sanitisation leaves nothing behind.
pub const FALLBACK_STREAM: &str = "app";

/// A loosely-typed log event as emitted by application code.
///
/// `message` may be a plain string, a string holding JSON, or any structured
/// JSON value. `timestamp` is an ISO-8601 string chosen by the caller; the
/// normalizer fills in the current time when it is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Logical log channel chosen by the caller (e.g. `auth`, `payments`).
    pub stream: String,
    /// Payload: textual or structured.
    #[serde(default)]
    pub message: serde_json::Value,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl LogEvent {
    pub fn new(stream: impl Into<String>, message: impl Into<serde_json::Value>) -> Self {
        Self {
            stream: stream.into(),
            message: message.into(),
            severity: Severity::Info,
            timestamp: None,
        }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn timestamp(mut self, ts: impl Into<String>) -> Self {
        self.timestamp = Some(ts.into());
        self
    }
}

/// Log severity tag carried by every event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A flat, ordered mapping of field name to primitive JSON value.
///
/// Produced by the normalizer. Every value is a JSON primitive (string,
/// number, bool, or null); nested objects have already been flattened into
/// underscore-joined keys and anything else has been JSON-stringified.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalRecord {
    fields: serde_json::Map<String, serde_json::Value>,
}

impl CanonicalRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field. Re-inserting an existing key replaces its value in
    /// place and keeps the original position.
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.fields.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }

    /// Field names in header order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Values in the same order as [`field_names`](Self::field_names).
    pub fn values(&self) -> impl Iterator<Item = &serde_json::Value> {
        self.fields.values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A sanitised stream name, safe to embed in a file name.
///
/// Path separators are stripped and a trailing `.csv` (any case) is removed
/// so the extension is only ever appended once, by [`file_name`](Self::file_name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamName(String);

impl StreamName {
    pub fn sanitize(raw: &str) -> Self {
        let stripped: String = raw.chars().filter(|c| *c != '/' && *c != '\\').collect();
        let mut name = stripped.trim();
        let cut = name.len().saturating_sub(4);
        if name.get(cut..).is_some_and(|s| s.eq_ignore_ascii_case(".csv")) {
            name = name[..cut].trim_end();
        }
        if name.is_empty() {
            Self(FALLBACK_STREAM.to_string())
        } else {
            Self(name.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `<stream>-<YYYY-MM-DD>.<ext>`
    pub fn file_name(&self, day: NaiveDate, extension: &str) -> String {
        format!("{}-{}.{}", self.0, day.format("%Y-%m-%d"), extension)
    }
}

impl std::fmt::Display for StreamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
