//! The single ingestion entry point.
//!
//! Wires the normalizer, the rotated writer, the volume guard, and the
//! exporter from one [`Config`]. Application code only ever calls
//! [`Pipeline::ingest`]; it never touches the writer directly.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::ExportError;
use crate::export::{ExportDocument, ExportQuery, Exporter};
use crate::guard::{AlertSink, VolumeGuard};
use crate::normalizer::normalize;
use crate::store::{AppendStatus, RotatingWriter};
use crate::types::LogEvent;

pub struct Pipeline {
    clock: Arc<dyn Clock>,
    writer: RotatingWriter,
    exporter: Exporter,
    guard: Arc<VolumeGuard>,
}

impl Pipeline {
    pub fn new(config: &Config, sink: Option<Arc<dyn AlertSink>>) -> Self {
        Self::with_clock(config, sink, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: &Config,
        sink: Option<Arc<dyn AlertSink>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let storage = &config.storage;

        let mut guard = VolumeGuard::new(
            &storage.logs_dir,
            config.guard.ceiling_bytes,
            config.guard.cooldown(),
        )
        .with_hostname(config.guard.resolved_hostname())
        .with_clock(Arc::clone(&clock));
        if let Some(sink) = sink {
            guard = guard.with_sink(sink);
        }
        let guard = Arc::new(guard);

        let writer = RotatingWriter::new(&storage.logs_dir)
            .with_extension(&storage.extension)
            .with_clock(Arc::clone(&clock))
            .with_guard(Arc::clone(&guard));

        let exporter = Exporter::new(&storage.logs_dir, config.export.columns.clone())
            .with_extension(&storage.extension)
            .with_clock(Arc::clone(&clock));

        Self {
            clock,
            writer,
            exporter,
            guard,
        }
    }

    /// Normalise and persist one event. Never fails; see [`AppendStatus`].
    pub async fn ingest(&self, event: LogEvent) -> AppendStatus {
        let normalized = normalize(&event, self.clock.as_ref());
        self.writer
            .append(&normalized.stream, &normalized.record)
            .await
    }

    pub async fn export(&self, query: &ExportQuery) -> Result<ExportDocument, ExportError> {
        self.exporter.export(query).await
    }

    pub async fn streams(&self) -> Result<Vec<String>, ExportError> {
        self.exporter.streams().await
    }

    pub fn writer(&self) -> &RotatingWriter {
        &self.writer
    }

    pub fn guard(&self) -> &Arc<VolumeGuard> {
        &self.guard
    }
}
