//! Dependency telemetry: the finished record, how it is built, and where it goes.
//!
//! ```text
//! InFlightOperation (captured at Begin)
//!   + Completion (End / Error)
//!   └── TelemetryBuilder::build ──> DependencyTelemetry ──> TelemetrySink::accept
//! ```

pub mod builder;
pub mod record;
pub mod sink;

pub use builder::{format_target, resolve_target, Completion, Outcome, TelemetryBuilder};
pub use record::{DependencyTelemetry, OperationContext, SQL_DEPENDENCY_TYPE};
pub use sink::{ChannelSink, MemorySink, RecordFormat, TelemetrySink, WriterSink};
