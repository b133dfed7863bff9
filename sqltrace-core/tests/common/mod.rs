//! Test helper functions for integration tests
//!
//! Shared across test files using the tests/common/ pattern. Not every test
//! binary uses every helper.
#![allow(dead_code)]

use sqltrace_core::payload::keys;
use sqltrace_core::{
    Arbitrator, CollectorConfig, CommandSnapshot, ConnectionSnapshot, DependencyCollector,
    DiagnosticBus, DriverError, DriverScheme, LogicalEvent, MemorySink, OperationId, Payload,
    SelfDiagnostics, DEFAULT_CHANNEL,
};
use std::sync::{Arc, Once};

/// Initialize logging for tests (only once per test run)
static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Raw event name for a logical event under a driver scheme
pub fn event_name(scheme: DriverScheme, event: LogicalEvent) -> &'static str {
    scheme
        .names()
        .iter()
        .find(|(_, logical)| *logical == event)
        .map(|(name, _)| *name)
        .unwrap_or_else(|| panic!("{event:?} has no name under {scheme}"))
}

/// A bus, an isolated arbitrator, a memory sink and private diagnostics.
pub struct Harness {
    pub bus: DiagnosticBus,
    pub arbitrator: Arbitrator,
    pub sink: Arc<MemorySink>,
    pub diagnostics: Arc<SelfDiagnostics>,
    pub scheme: DriverScheme,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_scheme(DriverScheme::Legacy)
    }

    pub fn with_scheme(scheme: DriverScheme) -> Self {
        init_test_logging();
        Self {
            bus: DiagnosticBus::new(),
            arbitrator: Arbitrator::new(),
            sink: Arc::new(MemorySink::new()),
            diagnostics: Arc::new(SelfDiagnostics::new()),
            scheme,
        }
    }

    pub fn collector(&self) -> DependencyCollector {
        self.collector_with(CollectorConfig::default())
    }

    pub fn collector_with(&self, config: CollectorConfig) -> DependencyCollector {
        DependencyCollector::builder(self.sink.clone())
            .config(config)
            .diagnostics(self.diagnostics.clone())
            .start(&self.bus, &self.arbitrator)
    }

    pub fn publish(&self, event: LogicalEvent, payload: &Payload) -> usize {
        self.bus
            .publish(DEFAULT_CHANNEL, event_name(self.scheme, event), payload)
    }

    /// Publish a complete successful command and return its id
    pub fn run_command(&self, data_source: &str, database: &str, sql: &str) -> OperationId {
        let id = OperationId::new_random();
        self.publish(
            LogicalEvent::BEGIN_COMMAND,
            &begin_command(id, data_source, database, sql, 100),
        );
        self.publish(LogicalEvent::END_COMMAND, &completion(id, 900));
        id
    }
}

pub fn begin_command(
    id: OperationId,
    data_source: &str,
    database: &str,
    sql: &str,
    timestamp: i64,
) -> Payload {
    Payload::new()
        .with(keys::OPERATION_ID, id)
        .with(
            keys::COMMAND,
            CommandSnapshot::new(sql, ConnectionSnapshot::new(data_source, database)),
        )
        .with(keys::TIMESTAMP, timestamp)
}

pub fn begin_lifecycle(id: OperationId, data_source: &str, database: &str) -> Payload {
    Payload::new()
        .with(keys::OPERATION_ID, id)
        .with(keys::CONNECTION, ConnectionSnapshot::new(data_source, database))
}

pub fn completion(id: OperationId, timestamp: i64) -> Payload {
    Payload::new()
        .with(keys::OPERATION_ID, id)
        .with(keys::TIMESTAMP, timestamp)
}

pub fn failure(id: OperationId, error: DriverError) -> Payload {
    Payload::new()
        .with(keys::OPERATION_ID, id)
        .with(keys::EXCEPTION, error)
}
