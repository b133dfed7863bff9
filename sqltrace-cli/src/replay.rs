//! `sqltrace replay` - feed recorded diagnostic events through a collector.
//!
//! Input is JSON lines, one event per line:
//!
//! ```text
//! {"name": "Microsoft.Data.SqlClient.WriteCommandBefore",
//!  "payload": {"OperationId": "...", "Command": {...}, "Timestamp": 100},
//!  "context": {"root_id": "...", "parent_id": "...", "baggage": {...}}}
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. Malformed lines are
//! skipped with a warning, the same way the engine treats bad payloads.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::BufRead;
use std::sync::Arc;
use tabled::Tabled;
use tracing::{debug, info, warn};

use sqltrace_core::{
    Arbitrator, CollectorConfig, DependencyCollector, DiagnosticBus, Payload, SelfDiagnostics,
    TelemetrySink, ThreadContext, TraceContextSnapshot,
};

fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// One line of a replay file.
#[derive(Debug, Deserialize)]
pub struct ReplayEvent {
    pub name: String,
    #[serde(default = "empty_object")]
    pub payload: Value,
    /// Ambient context in effect on the producer thread when the event fired
    #[serde(default)]
    pub context: Option<TraceContextSnapshot>,
}

/// Totals for one replay run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    /// Non-blank, non-comment lines
    pub lines: usize,
    pub published: usize,
    pub skipped: usize,
    /// Events the collector recognized
    pub recognized: u64,
    pub emitted: u64,
    /// Operations still waiting for a completion when input ended
    pub unfinished: usize,
    pub anomalies: u64,
}

#[derive(Tabled)]
pub struct SummaryRow {
    #[tabled(rename = "Metric")]
    metric: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

impl ReplaySummary {
    pub fn rows(&self) -> Vec<SummaryRow> {
        let row = |metric: &'static str, value: String| SummaryRow { metric, value };
        vec![
            row("lines", self.lines.to_string()),
            row("published", self.published.to_string()),
            row("skipped", self.skipped.to_string()),
            row("recognized", self.recognized.to_string()),
            row("records emitted", self.emitted.to_string()),
            row("unfinished", self.unfinished.to_string()),
            row("anomalies", self.anomalies.to_string()),
        ]
    }
}

/// Publish every event in `input` to a fresh collector writing to `sink`.
pub fn replay<R: BufRead>(
    input: R,
    config: CollectorConfig,
    sink: Arc<dyn TelemetrySink>,
) -> Result<ReplaySummary> {
    let bus = DiagnosticBus::new();
    let arbitrator = Arbitrator::new();
    let diagnostics = Arc::new(SelfDiagnostics::new());
    let channel = config.channel.clone();

    let collector = DependencyCollector::builder(sink)
        .config(config)
        .diagnostics(diagnostics.clone())
        .start(&bus, &arbitrator);

    let mut summary = ReplaySummary::default();
    for (index, line) in input.lines().enumerate() {
        let line_no = index + 1;
        let line = line.with_context(|| format!("Failed to read replay input at line {line_no}"))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        summary.lines += 1;

        let event: ReplayEvent = match serde_json::from_str(trimmed) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_no, "Skipping malformed replay line: {}", e);
                summary.skipped += 1;
                continue;
            }
        };
        let payload = match Payload::from_json(&event.payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(line = line_no, event = %event.name, "Skipping event with invalid payload: {}", e);
                summary.skipped += 1;
                continue;
            }
        };

        let _context = event.context.map(ThreadContext::enter);
        let delivered = bus.publish(&channel, &event.name, &payload);
        debug!(line = line_no, event = %event.name, delivered, "replayed event");
        summary.published += 1;
    }

    let stats = collector.stats();
    summary.recognized = stats.events_observed;
    summary.emitted = stats.records_emitted;
    summary.unfinished = collector.in_flight();
    summary.anomalies = diagnostics.total();
    collector.dispose();

    info!(
        published = summary.published,
        emitted = summary.emitted,
        skipped = summary.skipped,
        "Replay finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqltrace_core::MemorySink;
    use std::io::Cursor;

    const BEGIN: &str = r#"{"name":"Microsoft.Data.SqlClient.WriteCommandBefore","payload":{"OperationId":"550e8400-e29b-41d4-a716-446655440000","Command":{"CommandText":"SELECT 1","Connection":{"DataSource":"srv","Database":"db"}},"Timestamp":100},"context":{"root_id":"r1","parent_id":"p1"}}"#;
    const END: &str = r#"{"name":"Microsoft.Data.SqlClient.WriteCommandAfter","payload":{"OperationId":"550e8400-e29b-41d4-a716-446655440000","Timestamp":600}}"#;

    fn run(input: &str) -> (ReplaySummary, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let summary = replay(Cursor::new(input.to_string()), CollectorConfig::default(), sink.clone())
            .unwrap();
        (summary, sink)
    }

    #[test]
    fn test_replay_matched_pair() {
        let (summary, sink) = run(&format!("{BEGIN}\n{END}\n"));

        assert_eq!(summary.published, 2);
        assert_eq!(summary.emitted, 1);
        assert_eq!(summary.unfinished, 0);
        let record = &sink.records()[0];
        assert_eq!(record.id, "550e8400e29b41d4a716446655440000");
        assert_eq!(record.name, "srv | db");
        assert_eq!(record.duration.as_nanos(), 500);
        assert_eq!(record.operation_context.root_id.as_deref(), Some("r1"));
    }

    #[test]
    fn test_comments_and_blank_lines_ignored() {
        let (summary, _) = run(&format!("# captured from staging\n\n{BEGIN}\n"));
        assert_eq!(summary.lines, 1);
        assert_eq!(summary.unfinished, 1);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let input = format!("not json\n{{\"name\":\"x\",\"payload\":[1]}}\n{BEGIN}\n{END}\n");
        let (summary, sink) = run(&input);

        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.published, 2);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_unrecognized_names_are_published_but_not_counted() {
        let input = r#"{"name":"Microsoft.EntityFrameworkCore.Query"}"#;
        let (summary, sink) = run(input);

        assert_eq!(summary.published, 1);
        assert_eq!(summary.recognized, 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_unmatched_completion_counts_anomaly() {
        let (summary, sink) = run(END);
        assert!(sink.is_empty());
        assert_eq!(summary.anomalies, 1);
    }
}
