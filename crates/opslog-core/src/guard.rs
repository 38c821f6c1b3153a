//! Volume guard: bounds total log storage and raises an external alert.
//!
//! [`VolumeGuard::check_and_alert`] is cheap to call after every append: the
//! cooldown gate runs before the directory walk, so at most one walk happens
//! per cooldown window once an alert has fired. When the measured total
//! exceeds the ceiling the window is stamped and one [`ThresholdAlert`] goes
//! to the configured [`AlertSink`]. Errors are logged, never returned.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::clock::{Clock, SystemClock};
use crate::error::AlertError;

pub const ALERT_EVENT: &str = "logs_folder_threshold_exceeded";

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// JSON body posted to the alert webhook.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdAlert {
    pub event: String,
    pub total_bytes: u64,
    /// GiB, rounded to three decimals.
    #[serde(rename = "totalGB")]
    pub total_gb: f64,
    pub hostname: String,
    pub ts: String,
}

impl ThresholdAlert {
    pub fn new(total_bytes: u64, hostname: impl Into<String>, ts: impl Into<String>) -> Self {
        Self {
            event: ALERT_EVENT.to_string(),
            total_bytes,
            total_gb: round_gib(total_bytes),
            hostname: hostname.into(),
            ts: ts.into(),
        }
    }
}

fn round_gib(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_GIB * 1000.0).round() / 1000.0
}

/// Destination for threshold alerts.
pub trait AlertSink: Send + Sync {
    fn dispatch<'a>(&'a self, alert: &'a ThresholdAlert) -> BoxFuture<'a, Result<(), AlertError>>;
}

/// What a single [`VolumeGuard::check_and_alert`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    /// An alert fired within the cooldown window; nothing was measured.
    CoolingDown,
    WithinLimit { total_bytes: u64 },
    Alerted { total_bytes: u64 },
    /// Over the ceiling but no sink is configured.
    Exceeded { total_bytes: u64 },
    Failed { reason: String },
}

pub struct VolumeGuard {
    logs_dir: PathBuf,
    ceiling_bytes: u64,
    cooldown: Duration,
    hostname: String,
    sink: Option<Arc<dyn AlertSink>>,
    clock: Arc<dyn Clock>,
    last_alert: Mutex<Option<Instant>>,
}

impl VolumeGuard {
    pub fn new(logs_dir: impl Into<PathBuf>, ceiling_bytes: u64, cooldown: Duration) -> Self {
        Self {
            logs_dir: logs_dir.into(),
            ceiling_bytes,
            cooldown,
            hostname: gethostname::gethostname().to_string_lossy().into_owned(),
            sink: None,
            clock: Arc::new(SystemClock),
            last_alert: Mutex::new(None),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Fire-and-forget [`check_and_alert`](Self::check_and_alert) on the
    /// current runtime.
    pub fn spawn_check(self: &Arc<Self>) -> JoinHandle<GuardOutcome> {
        let guard = Arc::clone(self);
        tokio::spawn(async move { guard.check_and_alert().await })
    }

    pub async fn check_and_alert(&self) -> GuardOutcome {
        if self.in_cooldown(Instant::now()) {
            return GuardOutcome::CoolingDown;
        }

        let dir = self.logs_dir.clone();
        let total_bytes = match tokio::task::spawn_blocking(move || dir_size(&dir)).await {
            Ok(Ok(total)) => total,
            Ok(Err(e)) => {
                tracing::warn!(dir = %self.logs_dir.display(), error = %e, "failed to measure log storage");
                return GuardOutcome::Failed { reason: e.to_string() };
            }
            Err(e) => {
                tracing::warn!(error = %e, "log storage measurement task failed");
                return GuardOutcome::Failed { reason: e.to_string() };
            }
        };

        if total_bytes <= self.ceiling_bytes {
            return GuardOutcome::WithinLimit { total_bytes };
        }

        // Re-check under the lock: a concurrent check may have claimed the
        // window while we were walking.
        {
            let mut last = self.last_alert.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            if matches!(*last, Some(prev) if now.duration_since(prev) < self.cooldown) {
                return GuardOutcome::CoolingDown;
            }
            *last = Some(now);
        }

        tracing::warn!(
            total_bytes,
            ceiling_bytes = self.ceiling_bytes,
            "log storage exceeds ceiling"
        );

        let Some(sink) = &self.sink else {
            tracing::debug!("no alert webhook configured; skipping dispatch");
            return GuardOutcome::Exceeded { total_bytes };
        };

        let alert = ThresholdAlert::new(total_bytes, self.hostname.clone(), self.clock.now_rfc3339());
        match sink.dispatch(&alert).await {
            Ok(()) => {
                tracing::info!(total_bytes, "log volume alert dispatched");
                GuardOutcome::Alerted { total_bytes }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to dispatch log volume alert");
                GuardOutcome::Failed { reason: e.to_string() }
            }
        }
    }

    fn in_cooldown(&self, now: Instant) -> bool {
        let last = self.last_alert.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(*last, Some(prev) if now.duration_since(prev) < self.cooldown)
    }
}

/// Sum of regular-file sizes under `root`. A missing root counts as empty.
/// Symlinks are not followed.
pub fn dir_size(root: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && dir == root => return Ok(0),
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            // Staged files can disappear between listing and stat.
            let meta = match std::fs::symlink_metadata(entry.path()) {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            if meta.is_dir() {
                pending.push(entry.path());
            } else if meta.is_file() {
                total += meta.len();
            }
        }
    }
    Ok(total)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
