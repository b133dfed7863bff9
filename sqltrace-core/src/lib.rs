//! sqltrace library exports
//!
//! Correlates SQL client diagnostic events (begin, end, error) into finished
//! dependency telemetry records.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sqltrace_core::{Arbitrator, DependencyCollector, DiagnosticBus, MemorySink};
//!
//! let bus = DiagnosticBus::new();
//! let arbitrator = Arbitrator::new();
//! let sink = Arc::new(MemorySink::new());
//! let collector = DependencyCollector::builder(sink.clone()).start(&bus, &arbitrator);
//! // ... the driver publishes events on `bus` ...
//! collector.dispose();
//! ```

pub mod arbitrator;
pub mod collector;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod payload;
pub mod source;
pub mod store;
pub mod telemetry;

pub use arbitrator::{Arbitrator, InstanceState};
pub use collector::{CollectorBuilder, CollectorStats, DependencyCollector};
pub use config::{CollectorConfig, DEFAULT_CHANNEL};
pub use context::{AmbientContext, NoContext, StaticContext, ThreadContext, TraceContextSnapshot};
pub use diagnostics::{Anomaly, AnomalyCategory, SelfDiagnostics, DIAGNOSTICS_TARGET};
pub use error::{BuildError, FieldError, PayloadError, SubscribeError};
pub use events::{DriverScheme, EventNameTable, EventRole, LogicalEvent, OperationKind};
pub use payload::{
    CommandInfo, CommandSnapshot, ConnectionInfo, ConnectionSnapshot, DriverError, ErrorEntry,
    OperationId, Payload, PayloadValue,
};
pub use source::{DiagnosticBus, DiagnosticSource, EventHandler, Subscription};
pub use telemetry::{
    ChannelSink, DependencyTelemetry, MemorySink, RecordFormat, TelemetrySink, WriterSink,
};
