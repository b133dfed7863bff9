//! Self-diagnostics channel.
//!
//! Internal anomalies never surface to the producer as errors. They are
//! logged under the `sqltrace::diagnostics` target and counted per category
//! so a host (or a test) can see what the engine dropped and why.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::error::{BuildError, FieldError, PayloadError, SubscribeError};
use crate::events::OperationKind;

/// Tracing target for every self-diagnostic signal
pub const DIAGNOSTICS_TARGET: &str = "sqltrace::diagnostics";

static GLOBAL: Lazy<Arc<SelfDiagnostics>> = Lazy::new(|| Arc::new(SelfDiagnostics::new()));

/// Everything the engine can drop or degrade.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// End/Error with no matching Begin
    #[error("{event} for operation {operation_id} has no matching begin; no telemetry emitted")]
    UnmatchedCompletion { operation_id: String, event: String },

    /// Second Begin for an operation id that is still in flight
    #[error("duplicate begin for in-flight operation {operation_id}; previous {previous_kind} record evicted")]
    DuplicateBegin {
        operation_id: String,
        previous_kind: OperationKind,
    },

    /// Required payload field missing or malformed
    #[error("ignored {event} event: {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: PayloadError,
    },

    /// An optional field could not be read and was left out
    #[error("field omitted for operation {operation_id}: {source}")]
    FieldOmitted {
        operation_id: String,
        #[source]
        source: FieldError,
    },

    /// A core field was unavailable so the whole record was dropped
    #[error("record dropped: {source}")]
    RecordDropped {
        #[source]
        source: BuildError,
    },

    /// Subscription setup failed; the collector is inert
    #[error("collector on channel '{channel}' is not functional: {source}")]
    ConstructionFailed {
        channel: String,
        #[source]
        source: SubscribeError,
    },

    /// Event handling panicked; the panic was contained
    #[error("handler panicked while processing {event}: {message}")]
    HandlerPanicked { event: String, message: String },
}

/// Counter bucket for an [`Anomaly`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnomalyCategory {
    UnmatchedCompletion,
    DuplicateBegin,
    InvalidPayload,
    FieldOmitted,
    RecordDropped,
    ConstructionFailed,
    HandlerPanicked,
}

impl AnomalyCategory {
    pub const ALL: [AnomalyCategory; 7] = [
        AnomalyCategory::UnmatchedCompletion,
        AnomalyCategory::DuplicateBegin,
        AnomalyCategory::InvalidPayload,
        AnomalyCategory::FieldOmitted,
        AnomalyCategory::RecordDropped,
        AnomalyCategory::ConstructionFailed,
        AnomalyCategory::HandlerPanicked,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyCategory::UnmatchedCompletion => "unmatched_completion",
            AnomalyCategory::DuplicateBegin => "duplicate_begin",
            AnomalyCategory::InvalidPayload => "invalid_payload",
            AnomalyCategory::FieldOmitted => "field_omitted",
            AnomalyCategory::RecordDropped => "record_dropped",
            AnomalyCategory::ConstructionFailed => "construction_failed",
            AnomalyCategory::HandlerPanicked => "handler_panicked",
        }
    }
}

impl Anomaly {
    pub fn category(&self) -> AnomalyCategory {
        match self {
            Anomaly::UnmatchedCompletion { .. } => AnomalyCategory::UnmatchedCompletion,
            Anomaly::DuplicateBegin { .. } => AnomalyCategory::DuplicateBegin,
            Anomaly::InvalidPayload { .. } => AnomalyCategory::InvalidPayload,
            Anomaly::FieldOmitted { .. } => AnomalyCategory::FieldOmitted,
            Anomaly::RecordDropped { .. } => AnomalyCategory::RecordDropped,
            Anomaly::ConstructionFailed { .. } => AnomalyCategory::ConstructionFailed,
            Anomaly::HandlerPanicked { .. } => AnomalyCategory::HandlerPanicked,
        }
    }
}

/// Low-volume sink for engine anomalies.
#[derive(Debug)]
pub struct SelfDiagnostics {
    counters: [AtomicU64; AnomalyCategory::ALL.len()],
}

impl SelfDiagnostics {
    pub fn new() -> Self {
        Self {
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Process-wide instance used when a collector is not given its own
    pub fn global() -> Arc<SelfDiagnostics> {
        Arc::clone(&GLOBAL)
    }

    pub fn report(&self, anomaly: Anomaly) {
        let category = anomaly.category();
        self.counters[category.index()].fetch_add(1, Ordering::Relaxed);

        warn!(target: DIAGNOSTICS_TARGET, category = category.as_str(), "{}", anomaly);
    }

    pub fn count(&self, category: AnomalyCategory) -> u64 {
        self.counters[category.index()].load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        AnomalyCategory::ALL.iter().map(|c| self.count(*c)).sum()
    }
}

impl Default for SelfDiagnostics {
    fn default() -> Self {
        Self::new()
    }
}
