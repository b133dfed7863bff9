//! Correlation store for in-flight operations.
//!
//! Keyed by operation id on a sharded concurrent map, so unrelated ids never
//! contend on one lock while the same id is always handled atomically.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Instant, SystemTime};
use tracing::trace;

use crate::context::TraceContextSnapshot;
use crate::events::OperationKind;
use crate::payload::OperationId;

/// Everything captured at Begin and held until the matching completion.
#[derive(Debug, Clone)]
pub struct InFlightOperation {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    /// Producer counter value from the Begin payload, if any
    pub start_timestamp_raw: Option<i64>,
    /// Wall-clock time the engine observed Begin (reported start time)
    pub start_wall_clock: SystemTime,
    /// Monotonic fallback for duration
    pub start_instant: Instant,
    /// `"<dataSource> | <database>"`, computed once at Begin
    pub target: String,
    /// Command text for commands, operation label otherwise
    pub data: Option<String>,
    pub operation_label: String,
    pub isolation_level: Option<String>,
    pub transaction_name: Option<String>,
    pub trace_context: TraceContextSnapshot,
}

impl InFlightOperation {
    /// Start a record now with the fields every kind carries.
    pub fn start(
        operation_id: OperationId,
        kind: OperationKind,
        target: impl Into<String>,
        trace_context: TraceContextSnapshot,
    ) -> Self {
        Self {
            operation_id,
            kind,
            start_timestamp_raw: None,
            start_wall_clock: SystemTime::now(),
            start_instant: Instant::now(),
            target: target.into(),
            data: None,
            operation_label: kind.default_label().to_string(),
            isolation_level: None,
            transaction_name: None,
            trace_context,
        }
    }
}

/// Concurrent map from operation id to its in-flight record.
#[derive(Debug, Default)]
pub struct CorrelationStore {
    inflight: DashMap<OperationId, InFlightOperation>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, returning the stale one it replaced.
    ///
    /// A replaced record means the producer reused a live id; the caller
    /// reports it.
    pub fn begin(&self, operation: InFlightOperation) -> Option<InFlightOperation> {
        let id = operation.operation_id;
        match self.inflight.entry(id) {
            Entry::Occupied(mut occupied) => {
                trace!(operation_id = %id, "replacing in-flight operation");
                Some(occupied.insert(operation))
            }
            Entry::Vacant(vacant) => {
                trace!(operation_id = %id, kind = %operation.kind, "operation started");
                vacant.insert(operation);
                None
            }
        }
    }

    /// Atomically remove and return the record for `id`.
    ///
    /// Of several racing completions for one id, exactly one gets the record.
    pub fn complete(&self, id: &OperationId) -> Option<InFlightOperation> {
        self.inflight.remove(id).map(|(_, operation)| operation)
    }

    pub fn contains(&self, id: &OperationId) -> bool {
        self.inflight.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}
