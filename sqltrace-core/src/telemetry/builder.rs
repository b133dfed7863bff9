//! Telemetry builder.
//!
//! Formats the strings backends match on (`target`, `name`, `result_code`,
//! the `Exception` property) and computes duration. Optional fields that
//! cannot be read are left out; only a missing target drops the record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{BuildError, FieldError};
use crate::events::OperationKind;
use crate::payload::{ConnectionInfo, DriverError};
use crate::store::InFlightOperation;

use super::record::{
    system_time_to_nanos, DependencyTelemetry, OperationContext, EXCEPTION_PROPERTY,
    SQL_DEPENDENCY_TYPE, TRANSACTION_NAME_PROPERTY,
};

const SEPARATOR: &str = " | ";
const NANOS_PER_SECOND: u128 = 1_000_000_000;

/// Join data source and database as `"<dataSource> | <database>"`.
///
/// When only one side is non-empty that side is the whole target.
pub fn format_target(data_source: &str, database: &str) -> String {
    match (data_source.is_empty(), database.is_empty()) {
        (false, false) => format!("{data_source}{SEPARATOR}{database}"),
        (false, true) => data_source.to_string(),
        (true, false) => database.to_string(),
        (true, true) => String::new(),
    }
}

/// Result of reading a connection's identity once at Begin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetResolution {
    /// `None` when neither side could be read
    pub target: Option<String>,
    /// Accessor failures, reported as omitted fields
    pub omitted: Vec<FieldError>,
}

pub fn resolve_target(connection: &dyn ConnectionInfo) -> TargetResolution {
    let mut omitted = Vec::new();
    let data_source = connection.data_source().unwrap_or_else(|e| {
        omitted.push(e);
        String::new()
    });
    let database = connection.database_name().unwrap_or_else(|e| {
        omitted.push(e);
        String::new()
    });

    let target = format_target(&data_source, &database);
    TargetResolution {
        target: (!target.is_empty()).then_some(target),
        omitted,
    }
}

/// How an operation finished.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success,
    /// The failure, when the Error payload carried one
    Failure(Option<Arc<DriverError>>),
}

/// The completion half of a matched pair.
#[derive(Debug, Clone)]
pub struct Completion {
    pub timestamp_raw: Option<i64>,
    pub observed_at: Instant,
    pub outcome: Outcome,
}

impl Completion {
    pub fn now(timestamp_raw: Option<i64>, outcome: Outcome) -> Self {
        Self {
            timestamp_raw,
            observed_at: Instant::now(),
            outcome,
        }
    }
}

/// Builds finished records from matched pairs.
#[derive(Debug, Clone)]
pub struct TelemetryBuilder {
    dependency_type: String,
    ticks_per_second: u64,
}

impl Default for TelemetryBuilder {
    fn default() -> Self {
        Self {
            dependency_type: SQL_DEPENDENCY_TYPE.to_string(),
            ticks_per_second: NANOS_PER_SECOND as u64,
        }
    }
}

impl TelemetryBuilder {
    pub fn new(dependency_type: impl Into<String>, ticks_per_second: u64) -> Self {
        Self {
            dependency_type: dependency_type.into(),
            ticks_per_second: ticks_per_second.max(1),
        }
    }

    /// Record name for an operation.
    pub fn format_name(operation: &InFlightOperation) -> String {
        if operation.kind == OperationKind::Command {
            return operation.target.clone();
        }

        let mut name = format!(
            "{}{SEPARATOR}{}",
            operation.target, operation.operation_label
        );
        if operation.kind.is_transaction() {
            if let Some(level) = &operation.isolation_level {
                name.push_str(SEPARATOR);
                name.push_str(level);
            }
        }
        name
    }

    /// Duration from producer counters, falling back to the monotonic clock.
    ///
    /// Never returns zero.
    pub fn compute_duration(
        &self,
        start_raw: Option<i64>,
        end_raw: Option<i64>,
        start_instant: Instant,
        end_instant: Instant,
    ) -> Duration {
        if let (Some(start), Some(end)) = (start_raw, end_raw) {
            if end > start {
                let ticks = (end as i128 - start as i128) as u128;
                let nanos = ticks * NANOS_PER_SECOND / self.ticks_per_second as u128;
                if nanos > 0 && nanos <= u64::MAX as u128 {
                    return Duration::from_nanos(nanos as u64);
                }
            }
        }

        let elapsed = end_instant.saturating_duration_since(start_instant);
        if elapsed.is_zero() {
            Duration::from_nanos(1)
        } else {
            elapsed
        }
    }

    /// Turn a matched pair into a finished record.
    pub fn build(
        &self,
        operation: InFlightOperation,
        completion: &Completion,
    ) -> Result<DependencyTelemetry, BuildError> {
        let id = operation.operation_id.to_hex();
        if operation.target.is_empty() {
            return Err(BuildError::MissingTarget { operation_id: id });
        }

        let name = Self::format_name(&operation);
        let duration = self.compute_duration(
            operation.start_timestamp_raw,
            completion.timestamp_raw,
            operation.start_instant,
            completion.observed_at,
        );

        let InFlightOperation {
            kind,
            start_wall_clock,
            target,
            data,
            operation_label,
            transaction_name,
            trace_context,
            ..
        } = operation;

        let mut properties = trace_context.baggage;
        if let Some(transaction_name) = transaction_name {
            properties.insert(TRANSACTION_NAME_PROPERTY.to_string(), transaction_name);
        }

        let (success, result_code) = match &completion.outcome {
            Outcome::Success => (true, None),
            Outcome::Failure(failure) => {
                let code = failure.as_ref().and_then(|err| {
                    properties.insert(EXCEPTION_PROPERTY.to_string(), err.to_string());
                    err.first_code().map(|c| c.to_string())
                });
                (false, code)
            }
        };

        let data = match kind {
            OperationKind::Command => data,
            _ => data.or(Some(operation_label)),
        };

        Ok(DependencyTelemetry {
            id,
            name,
            data,
            target,
            dependency_type: self.dependency_type.clone(),
            timestamp: start_wall_clock.into(),
            start_time_unix_nano: system_time_to_nanos(&start_wall_clock),
            duration,
            success,
            result_code,
            properties,
            operation_context: OperationContext {
                root_id: trace_context.root_id,
                parent_id: trace_context.parent_id,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TraceContextSnapshot;
    use crate::payload::{ConnectionSnapshot, ErrorEntry, OperationId};
    use pretty_assertions::assert_eq;

    const LOCALDB: &str = "(localdb)\\MSSQLLocalDB";

    fn operation(kind: OperationKind) -> InFlightOperation {
        InFlightOperation::start(
            OperationId::new_random(),
            kind,
            format_target(LOCALDB, "master"),
            TraceContextSnapshot::new("root-id", "parent-id").with_baggage("tenant", "t1"),
        )
    }

    #[derive(Debug)]
    struct BrokenConnection;

    impl ConnectionInfo for BrokenConnection {
        fn data_source(&self) -> Result<String, FieldError> {
            Err(FieldError::new("DataSource", "connection disposed"))
        }

        fn database_name(&self) -> Result<String, FieldError> {
            Ok("orders".into())
        }
    }

    #[test]
    fn test_format_target() {
        assert_eq!(format_target(LOCALDB, "master"), "(localdb)\\MSSQLLocalDB | master");
        assert_eq!(format_target("srv", ""), "srv");
        assert_eq!(format_target("", "db"), "db");
        assert_eq!(format_target("", ""), "");
    }

    #[test]
    fn test_resolve_target_reports_failed_accessor() {
        let resolution = resolve_target(&BrokenConnection);
        assert_eq!(resolution.target.as_deref(), Some("orders"));
        assert_eq!(resolution.omitted.len(), 1);
        assert_eq!(resolution.omitted[0].field, "DataSource");

        let clean = resolve_target(&ConnectionSnapshot::new("srv", "db"));
        assert_eq!(clean.target.as_deref(), Some("srv | db"));
        assert!(clean.omitted.is_empty());
    }

    #[test]
    fn test_command_record() {
        let mut op = operation(OperationKind::Command);
        op.data = Some("SELECT * FROM dbo.Orders".into());
        let id = op.operation_id;

        let record = TelemetryBuilder::default()
            .build(op, &Completion::now(None, Outcome::Success))
            .unwrap();

        assert_eq!(record.id, id.to_hex());
        assert_eq!(record.target, "(localdb)\\MSSQLLocalDB | master");
        assert_eq!(record.name, record.target);
        assert_eq!(record.data.as_deref(), Some("SELECT * FROM dbo.Orders"));
        assert_eq!(record.dependency_type, "SQL");
        assert!(record.success);
        assert!(record.result_code.is_none());
        assert!(record.duration > Duration::ZERO);
        assert_eq!(record.operation_context.root_id.as_deref(), Some("root-id"));
        assert_eq!(record.operation_context.parent_id.as_deref(), Some("parent-id"));
        assert_eq!(record.properties.get("tenant").map(String::as_str), Some("t1"));
    }

    #[test]
    fn test_commit_name_includes_isolation_level() {
        let mut op = operation(OperationKind::TransactionCommit);
        op.isolation_level = Some("Snapshot".into());

        let record = TelemetryBuilder::default()
            .build(op, &Completion::now(None, Outcome::Success))
            .unwrap();

        assert_eq!(record.name, "(localdb)\\MSSQLLocalDB | master | Commit | Snapshot");
        assert_eq!(record.data.as_deref(), Some("Commit"));
    }

    #[test]
    fn test_open_name_ignores_isolation_level() {
        let mut op = operation(OperationKind::ConnectionOpen);
        op.operation_label = "OpenAsync".into();
        op.isolation_level = Some("Serializable".into());

        let record = TelemetryBuilder::default()
            .build(op, &Completion::now(None, Outcome::Success))
            .unwrap();
        assert_eq!(record.name, "(localdb)\\MSSQLLocalDB | master | OpenAsync");
    }

    #[test]
    fn test_structured_failure_yields_result_code() {
        let err = DriverError::structured(
            "SqlException",
            "Something failed",
            vec![ErrorEntry {
                number: 42,
                message: "first".into(),
            }],
        );
        let record = TelemetryBuilder::default()
            .build(
                operation(OperationKind::Command),
                &Completion::now(None, Outcome::Failure(Some(Arc::new(err.clone())))),
            )
            .unwrap();

        assert!(!record.success);
        assert_eq!(record.result_code.as_deref(), Some("42"));
        assert_eq!(record.exception(), Some(err.to_string().as_str()));
    }

    #[test]
    fn test_generic_failure_has_no_result_code() {
        let err = DriverError::generic("InvalidOperationException", "Connection broken");
        let record = TelemetryBuilder::default()
            .build(
                operation(OperationKind::ConnectionOpen),
                &Completion::now(None, Outcome::Failure(Some(Arc::new(err)))),
            )
            .unwrap();

        assert!(!record.success);
        assert!(record.result_code.is_none());
        assert_eq!(
            record.exception(),
            Some("InvalidOperationException: Connection broken")
        );
    }

    #[test]
    fn test_failure_without_error_payload() {
        let record = TelemetryBuilder::default()
            .build(
                operation(OperationKind::Command),
                &Completion::now(None, Outcome::Failure(None)),
            )
            .unwrap();
        assert!(!record.success);
        assert!(record.exception().is_none());
    }

    #[test]
    fn test_exception_overrides_baggage_key() {
        let mut op = operation(OperationKind::Command);
        op.trace_context = op.trace_context.with_baggage("Exception", "from baggage");
        let err = DriverError::generic("SqlException", "real");

        let record = TelemetryBuilder::default()
            .build(op, &Completion::now(None, Outcome::Failure(Some(Arc::new(err)))))
            .unwrap();
        assert_eq!(record.exception(), Some("SqlException: real"));
    }

    #[test]
    fn test_transaction_name_property() {
        let mut op = operation(OperationKind::TransactionRollback);
        op.transaction_name = Some("checkout".into());

        let record = TelemetryBuilder::default()
            .build(op, &Completion::now(None, Outcome::Success))
            .unwrap();
        assert_eq!(
            record.properties.get(TRANSACTION_NAME_PROPERTY).map(String::as_str),
            Some("checkout")
        );
        assert_eq!(record.name, "(localdb)\\MSSQLLocalDB | master | Rollback");
    }

    #[test]
    fn test_missing_target_drops_record() {
        let op = InFlightOperation::start(
            OperationId::new_random(),
            OperationKind::Command,
            "",
            TraceContextSnapshot::default(),
        );
        let err = TelemetryBuilder::default()
            .build(op, &Completion::now(None, Outcome::Success))
            .unwrap_err();
        assert!(matches!(err, BuildError::MissingTarget { .. }));
    }

    #[test]
    fn test_raw_counters_take_precedence() {
        let builder = TelemetryBuilder::new("SQL", 10_000_000);
        let start = Instant::now();
        let end = start + Duration::from_secs(5);

        // 2_500 ticks at 10 MHz
        let duration = builder.compute_duration(Some(10_000), Some(12_500), start, end);
        assert_eq!(duration, Duration::from_micros(250));
    }

    #[test]
    fn test_unusable_counters_fall_back_to_wall_clock() {
        let builder = TelemetryBuilder::default();
        let start = Instant::now();
        let end = start + Duration::from_millis(3);

        assert_eq!(builder.compute_duration(Some(50), Some(50), start, end), Duration::from_millis(3));
        assert_eq!(builder.compute_duration(Some(90), Some(10), start, end), Duration::from_millis(3));
        assert_eq!(builder.compute_duration(None, Some(10), start, end), Duration::from_millis(3));
    }

    #[test]
    fn test_duration_is_never_zero() {
        let builder = TelemetryBuilder::default();
        let now = Instant::now();
        assert_eq!(builder.compute_duration(None, None, now, now), Duration::from_nanos(1));
    }
}
