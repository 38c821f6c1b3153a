//! Filtered historical slices of persisted streams.
//!
//! Reads every rotated file of a stream (or of all streams), keeps records
//! whose `timestamp` falls inside an inclusive `[start, end]` range, and
//! renders them under a fixed, configured header. Output values are
//! comma-joined without quoting; structured values are re-serialised as
//! compact JSON. This is deliberately a different serialisation from the
//! writer's quoted lines.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::clock::{Clock, SystemClock};
use crate::error::ExportError;
use crate::store::split_line;
use crate::types::StreamName;

/// Export request. Both bounds are required even though they are optional
/// here, so a missing one can be reported as [`ExportError::MissingRange`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub stream: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

impl ExportQuery {
    pub fn range(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            stream: None,
            start: Some(start.into()),
            end: Some(end.into()),
        }
    }

    pub fn stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = Some(stream.into());
        self
    }

    /// The parsed inclusive `[start, end]` range. Fails with a client error
    /// when either bound is missing, blank, or unparsable.
    pub fn bounds(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), ExportError> {
        match (non_blank(&self.start), non_blank(&self.end)) {
            (Some(start), Some(end)) => Ok((parse_bound("start", start)?, parse_bound("end", end)?)),
            _ => Err(ExportError::MissingRange),
        }
    }
}

/// A rendered export, ready to be served as an attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDocument {
    /// `logs-export-<YYYY-MM-DD>.csv`, dated at export time.
    pub file_name: String,
    pub body: String,
    /// Number of data rows (header excluded).
    pub rows: usize,
}

pub struct Exporter {
    logs_dir: PathBuf,
    extension: String,
    columns: Vec<String>,
    clock: Arc<dyn Clock>,
}

impl Exporter {
    pub fn new(logs_dir: impl Into<PathBuf>, columns: Vec<String>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
            extension: "csv".to_string(),
            columns,
            clock: Arc::new(SystemClock),
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

    pub async fn export(&self, query: &ExportQuery) -> Result<ExportDocument, ExportError> {
        let (start, end) = query.bounds()?;
        let stream = non_blank(&query.stream).map(StreamName::sanitize);

        let dir = self.logs_dir.clone();
        let extension = self.extension.clone();
        let columns = self.columns.clone();
        let (body, rows) = tokio::task::spawn_blocking(move || {
            render(&dir, &extension, stream.as_ref(), start, end, &columns)
        })
        .await
        .map_err(|e| ExportError::Task(e.to_string()))??;

        tracing::debug!(rows, "rendered log export");
        Ok(ExportDocument {
            file_name: format!("logs-export-{}.csv", self.clock.today().format("%Y-%m-%d")),
            body,
            rows,
        })
    }

    /// Distinct stream names with at least one file on disk, sorted.
    pub async fn streams(&self) -> Result<Vec<String>, ExportError> {
        let dir = self.logs_dir.clone();
        let extension = self.extension.clone();
        let files = tokio::task::spawn_blocking(move || stream_files(&dir, &extension, None))
            .await
            .map_err(|e| ExportError::Task(e.to_string()))??;
        let names: BTreeSet<String> = files.into_iter().map(|f| f.stream).collect();
        Ok(names.into_iter().collect())
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_bound(which: &'static str, value: &str) -> Result<DateTime<Utc>, ExportError> {
    parse_timestamp(value).ok_or_else(|| ExportError::InvalidBound {
        which,
        value: value.to_string(),
    })
}

/// Accepts RFC 3339, a zone-less `YYYY-MM-DDTHH:MM:SS[.f]` or
/// `YYYY-MM-DD HH:MM:SS[.f]` (read as UTC), or a bare `YYYY-MM-DD`
/// (midnight UTC).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

// ---------------------------------------------------------------------------
// File discovery
// ---------------------------------------------------------------------------

struct StreamFile {
    path: PathBuf,
    stream: String,
}

/// Rotated files in `dir`, sorted by file name. A missing directory yields
/// no files.
fn stream_files(
    dir: &Path,
    extension: &str,
    only: Option<&StreamName>,
) -> Result<Vec<StreamFile>, ExportError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some((stream, _day)) = parse_file_name(&name, extension) else {
            continue;
        };
        if only.is_some_and(|s| s.as_str() != stream) {
            continue;
        }
        files.push(StreamFile {
            path: entry.path(),
            stream,
        });
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Split `<stream>-<YYYY-MM-DD>.<ext>` into its stream and day.
pub fn parse_file_name(name: &str, extension: &str) -> Option<(String, NaiveDate)> {
    let stem = name.strip_suffix(extension)?.strip_suffix('.')?;
    let cut = stem.len().checked_sub(11)?;
    let (stream, dated) = (stem.get(..cut)?, stem.get(cut..)?);
    let day = NaiveDate::parse_from_str(dated.strip_prefix('-')?, "%Y-%m-%d").ok()?;
    if stream.is_empty() {
        return None;
    }
    Some((stream.to_string(), day))
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(
    dir: &Path,
    extension: &str,
    stream: Option<&StreamName>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    columns: &[String],
) -> Result<(String, usize), ExportError> {
    let mut body = columns.join(",");
    body.push('\n');
    let mut rows = 0usize;

    for file in stream_files(dir, extension, stream)? {
        let text = std::fs::read_to_string(&file.path)?;
        let mut lines = text.lines();
        let Some(header) = lines.next() else {
            continue;
        };
        let header = split_line(header);

        for line in lines.filter(|l| !l.trim().is_empty()) {
            let values = split_line(line);
            // Positional pairing: rows written with a different field set
            // than the header are read as-is.
            let record: HashMap<&str, &str> = header
                .iter()
                .map(String::as_str)
                .zip(values.iter().map(String::as_str))
                .collect();

            let in_range = record
                .get("timestamp")
                .and_then(|ts| parse_timestamp(ts))
                .is_some_and(|ts| ts >= start && ts <= end);
            if !in_range {
                continue;
            }

            let row: Vec<String> = columns
                .iter()
                .map(|column| match record.get(column.as_str()) {
                    Some(value) => export_value(value),
                    None if column == "stream" => file.stream.clone(),
                    None => String::new(),
                })
                .collect();
            body.push_str(&row.join(","));
            body.push('\n');
            rows += 1;
        }
    }
    Ok((body, rows))
}

/// Structured values become compact JSON; everything else passes through.
fn export_value(value: &str) -> String {
    let trimmed = value.trim();
    let structured = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if structured {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(trimmed) {
            return parsed.to_string();
        }
    }
    value.to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
