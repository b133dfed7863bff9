//! Telemetry sinks.
//!
//! The engine hands each finished record to a [`TelemetrySink`] exactly once
//! and never waits on it. Sinks own any buffering, batching or transport.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::record::DependencyTelemetry;

/// Receiver of finished records.
pub trait TelemetrySink: Send + Sync {
    /// Take ownership of a record. Must not block the caller.
    fn accept(&self, record: DependencyTelemetry);
}

/// Collects records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<DependencyTelemetry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Copy of everything accepted so far
    pub fn records(&self) -> Vec<DependencyTelemetry> {
        self.records.lock().clone()
    }

    /// Drain accepted records
    pub fn take(&self) -> Vec<DependencyTelemetry> {
        std::mem::take(&mut *self.records.lock())
    }
}

impl TelemetrySink for MemorySink {
    fn accept(&self, record: DependencyTelemetry) {
        self.records.lock().push(record);
    }
}

/// Forwards records over an unbounded channel to an async consumer.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<DependencyTelemetry>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DependencyTelemetry>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl TelemetrySink for ChannelSink {
    fn accept(&self, record: DependencyTelemetry) {
        if let Err(e) = self.sender.send(record) {
            debug!(id = %e.0.id, "telemetry receiver closed; record discarded");
        }
    }
}

/// Output format for [`WriterSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// One human-readable line per record
    Text,
}

/// Writes each record as a line to any writer (stdout, a file, a buffer).
pub struct WriterSink<W: Write + Send> {
    writer: Mutex<W>,
    format: RecordFormat,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W, format: RecordFormat) -> Self {
        Self {
            writer: Mutex::new(writer),
            format,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    /// Format a record as a single human-readable line.
    pub fn format_text(record: &DependencyTelemetry) -> String {
        let started: DateTime<Local> = record.timestamp.into();
        let mut line = format!(
            "[{}] {} {} {:.3}ms {}",
            started.format("%Y-%m-%d %H:%M:%S%.3f"),
            record.dependency_type,
            record.name,
            record.duration.as_secs_f64() * 1000.0,
            if record.success { "ok" } else { "failed" },
        );
        if let Some(code) = &record.result_code {
            line.push_str(&format!(" code={code}"));
        }
        if let Some(data) = &record.data {
            line.push_str(&format!(" data={data:?}"));
        }
        line
    }

    fn render(&self, record: &DependencyTelemetry) -> Result<String, serde_json::Error> {
        match self.format {
            RecordFormat::Json => serde_json::to_string(record),
            RecordFormat::Text => Ok(Self::format_text(record)),
        }
    }
}

impl<W: Write + Send> TelemetrySink for WriterSink<W> {
    fn accept(&self, record: DependencyTelemetry) {
        let line = match self.render(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!(id = %record.id, "Failed to serialize telemetry record: {}", e);
                return;
            }
        };

        let mut writer = self.writer.lock();
        if let Err(e) = writeln!(writer, "{line}").and_then(|_| writer.flush()) {
            warn!(id = %record.id, "Failed to write telemetry record: {}", e);
        }
    }
}
