//! Test builders: fixed clocks, scratch configs, pipelines, and sinks.
//!
//! These are for readability in harnesses, not for production use. They
//! panic on invalid input rather than returning `Result`.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures::future::BoxFuture;
use opslog_core::clock::{Clock, FixedClock};
use opslog_core::config::Config;
use opslog_core::error::AlertError;
use opslog_core::guard::{AlertSink, ThresholdAlert};
use opslog_core::Pipeline;

/// 2024-03-01T12:00:00Z, the day every harness writes into.
pub fn march_first() -> Arc<dyn Clock> {
    fixed_clock(2024, 3, 1, 12)
}

pub fn fixed_clock(year: i32, month: u32, day: u32, hour: u32) -> Arc<dyn Clock> {
    Arc::new(FixedClock(
        Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap(),
    ))
}

/// Built-in defaults pointed at `logs_dir`, with a stable hostname.
pub fn test_config(logs_dir: &Path) -> Config {
    let mut config = Config::defaults();
    config.storage.logs_dir = logs_dir.to_path_buf();
    config.guard.hostname = Some("test-host".to_string());
    config
}

// ---------------------------------------------------------------------------
// PipelineBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for a [`Pipeline`] over a scratch directory.
///
/// ```rust
/// let pipeline = PipelineBuilder::new(dir.path())
///     .ceiling_bytes(64)
///     .sink(sink.clone())
///     .build();
/// ```
pub struct PipelineBuilder {
    config: Config,
    clock: Arc<dyn Clock>,
    sink: Option<Arc<dyn AlertSink>>,
}

impl PipelineBuilder {
    pub fn new(logs_dir: &Path) -> Self {
        Self {
            config: test_config(logs_dir),
            clock: march_first(),
            sink: None,
        }
    }

    pub fn ceiling_bytes(mut self, bytes: u64) -> Self {
        self.config.guard.ceiling_bytes = bytes;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.config.guard.cooldown_secs = cooldown.as_secs();
        self
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.config.export.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn build(self) -> Pipeline {
        Pipeline::with_clock(&self.config, self.sink, self.clock)
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// Alert sink that keeps every alert it is handed.
#[derive(Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<ThresholdAlert>>,
}

impl RecordingSink {
    pub fn alerts(&self) -> Vec<ThresholdAlert> {
        self.alerts.lock().unwrap().clone()
    }

    /// Poll until at least `n` alerts arrived or `timeout` elapsed.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> Vec<ThresholdAlert> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let alerts = self.alerts();
            if alerts.len() >= n || tokio::time::Instant::now() >= deadline {
                return alerts;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl AlertSink for RecordingSink {
    fn dispatch<'a>(&'a self, alert: &'a ThresholdAlert) -> BoxFuture<'a, Result<(), AlertError>> {
        Box::pin(async move {
            self.alerts.lock().unwrap().push(alert.clone());
            Ok(())
        })
    }
}
