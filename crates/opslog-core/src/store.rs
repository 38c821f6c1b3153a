//! Rotated, append-only log files on disk.
//!
//! One file per `(stream, local day)`: `<logs_dir>/<stream>-<YYYY-MM-DD>.<ext>`.
//! The call that creates a file writes the header (its own record's field
//! names, unquoted) followed by its record; every later call appends one
//! quoted line in its own field order. Later calls are not checked against
//! the existing header, so rows of a stream whose payload shape varies do not
//! line up with the header columns.
//!
//! [`RotatingWriter::append`] never returns an error. Failures are logged
//! and reported as [`AppendStatus::Failed`] so that log ingestion can never
//! abort the operation that emitted the event.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::guard::VolumeGuard;
use crate::types::{CanonicalRecord, StreamName};

/// Result of a single append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendStatus {
    /// The record line is on disk. `created` is true when this call created
    /// the file and wrote its header.
    Written { path: PathBuf, created: bool },
    Failed { path: PathBuf, reason: String },
}

impl AppendStatus {
    pub fn is_written(&self) -> bool {
        matches!(self, AppendStatus::Written { .. })
    }

    pub fn path(&self) -> &Path {
        match self {
            AppendStatus::Written { path, .. } | AppendStatus::Failed { path, .. } => path,
        }
    }
}

/// Appends canonical records to day-rotated files under one directory.
pub struct RotatingWriter {
    logs_dir: PathBuf,
    extension: String,
    clock: Arc<dyn Clock>,
    guard: Option<Arc<VolumeGuard>>,
}

impl RotatingWriter {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
            extension: "csv".to_string(),
            clock: Arc::new(SystemClock),
            guard: None,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run `guard` in the background after every successful append.
    pub fn with_guard(mut self, guard: Arc<VolumeGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Today's file for `stream`.
    pub fn path_for(&self, stream: &StreamName) -> PathBuf {
        self.logs_dir
            .join(stream.file_name(self.clock.today(), &self.extension))
    }

    pub async fn append(&self, stream: &StreamName, record: &CanonicalRecord) -> AppendStatus {
        let path = self.path_for(stream);
        let header = header_line(record);
        let line = record_line(record);

        let dir = self.logs_dir.clone();
        let target = path.clone();
        let result = tokio::task::spawn_blocking(move || append_blocking(&dir, &target, &header, &line))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))
            .and_then(|r| r);

        match result {
            Ok(created) => {
                tracing::debug!(path = %path.display(), created, "appended log record");
                if let Some(guard) = &self.guard {
                    guard.spawn_check();
                }
                AppendStatus::Written { path, created }
            }
            Err(e) => {
                tracing::warn!(stream = %stream, error = %e, "failed to persist log record");
                AppendStatus::Failed {
                    path,
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Returns whether this call created the file.
///
/// A new file is staged under a temporary name with its header and first
/// record, then hard-linked into place, so no reader or concurrent appender
/// ever sees it without its header. The link fails with `AlreadyExists` for
/// every caller but one; those fall back to a plain append.
fn append_blocking(dir: &Path, path: &Path, header: &str, line: &str) -> Result<bool, StoreError> {
    std::fs::create_dir_all(dir).map_err(|source| StoreError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let append_err = |source: std::io::Error| StoreError::Append {
        path: path.to_path_buf(),
        source,
    };

    match OpenOptions::new().append(true).open(path) {
        Ok(file) => return append_line(file, line).map(|()| false).map_err(append_err),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(append_err(e)),
    }

    let mut staged = tempfile::Builder::new()
        .prefix(".staging-")
        .tempfile_in(dir)
        .map_err(append_err)?;
    staged
        .write_all(format!("{header}\n{line}\n").as_bytes())
        .map_err(append_err)?;

    // `staged` is removed on drop; the link keeps the data.
    match std::fs::hard_link(staged.path(), path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            tracing::trace!(path = %path.display(), "lost file creation race; appending");
            let file = OpenOptions::new().append(true).open(path).map_err(append_err)?;
            append_line(file, line).map(|()| false).map_err(append_err)
        }
        Err(e) => Err(append_err(e)),
    }
}

/// One write per record so concurrent appends never interleave within a line.
fn append_line(mut file: File, line: &str) -> std::io::Result<()> {
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    file.write_all(buf.as_bytes())
}

// ---------------------------------------------------------------------------
// Line encoding
// ---------------------------------------------------------------------------

/// Field names, comma-joined, unquoted.
pub fn header_line(record: &CanonicalRecord) -> String {
    record.field_names().collect::<Vec<_>>().join(",")
}

/// Values in header order, each passed through [`encode_field`].
pub fn record_line(record: &CanonicalRecord) -> String {
    record.values().map(encode_field).collect::<Vec<_>>().join(",")
}

/// Quote one value: newline runs become a single space, `"` is doubled.
pub fn encode_field(value: &Value) -> String {
    let text = match value {
        Value::String(s) => collapse_newlines(s),
        other => collapse_newlines(&other.to_string()),
    };
    format!("\"{}\"", text.replace('"', "\"\""))
}

fn collapse_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_break = false;
    for c in text.chars() {
        if c == '\n' || c == '\r' {
            if !in_break {
                out.push(' ');
                in_break = true;
            }
        } else {
            out.push(c);
            in_break = false;
        }
    }
    out
}

/// Split a stored line back into fields. Understands both the quoted record
/// lines and the unquoted header line.
pub fn split_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            other => field.push(other),
        }
    }
    fields.push(field);
    fields
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
