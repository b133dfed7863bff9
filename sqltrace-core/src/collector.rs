//! Subscription lifecycle.
//!
//! A [`DependencyCollector`] owns one bus subscription. Every raw event is
//! resolved through the name table, gated on the arbitrator's Active state,
//! and dispatched to the correlation store and telemetry builder. Nothing
//! escapes to the producer thread: failures become [`Anomaly`] reports.
//!
//! The collector registers with the arbitrator *before* subscribing, so the
//! very first event delivered already sees a settled Active/Standby state.

use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::arbitrator::{Arbitrator, InstanceSlot, InstanceState};
use crate::config::CollectorConfig;
use crate::context::{AmbientContext, ThreadContext, TraceContextSnapshot};
use crate::diagnostics::{Anomaly, SelfDiagnostics};
use crate::error::FieldError;
use crate::events::{EventNameTable, EventRole, LogicalEvent, OperationKind};
use crate::payload::{keys, ConnectionInfo, OperationId, Payload};
use crate::source::{DiagnosticSource, EventHandler, Subscription};
use crate::store::{CorrelationStore, InFlightOperation};
use crate::telemetry::{resolve_target, Completion, Outcome, TelemetryBuilder, TelemetrySink};

/// Point-in-time counters for one collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CollectorStats {
    /// Recognized events delivered to this instance
    pub events_observed: u64,
    /// Recognized events ignored because the instance was not Active
    pub events_discarded: u64,
    pub records_emitted: u64,
    pub state: InstanceState,
}

/// Configures and starts a [`DependencyCollector`].
pub struct CollectorBuilder {
    config: CollectorConfig,
    sink: Arc<dyn TelemetrySink>,
    context: Arc<dyn AmbientContext>,
    diagnostics: Arc<SelfDiagnostics>,
}

impl CollectorBuilder {
    pub fn config(mut self, config: CollectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Source of the ambient trace context captured at Begin
    pub fn context(mut self, context: Arc<dyn AmbientContext>) -> Self {
        self.context = context;
        self
    }

    pub fn diagnostics(mut self, diagnostics: Arc<SelfDiagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Register with `arbitrator` and subscribe to the configured channel.
    ///
    /// Never fails. If the source refuses the subscription the collector is
    /// returned inert and one `ConstructionFailed` anomaly is reported.
    pub fn start(self, source: &dyn DiagnosticSource, arbitrator: &Arbitrator) -> DependencyCollector {
        let channel = self.config.channel.clone();
        let registration = arbitrator.register(&channel);

        let core = Arc::new(CollectorCore {
            slot: registration.slot,
            store: registration.store,
            names: self.config.name_table(),
            builder: self.config.telemetry_builder(),
            capture_baggage: self.config.capture_baggage,
            context: self.context,
            sink: self.sink,
            diagnostics: self.diagnostics,
            accepting: AtomicBool::new(true),
            observed: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
        });

        let handler: Arc<dyn EventHandler> = Arc::clone(&core) as Arc<dyn EventHandler>;
        let (subscription, inert) = match source.subscribe(&channel, handler) {
            Ok(subscription) => (Some(subscription), false),
            Err(source_error) => {
                core.accepting.store(false, Ordering::Release);
                arbitrator.dispose(&core.slot);
                core.diagnostics.report(Anomaly::ConstructionFailed {
                    channel: channel.clone(),
                    source: source_error,
                });
                (None, true)
            }
        };

        if !inert {
            info!(
                channel = %channel,
                sequence = core.slot.sequence(),
                state = %core.slot.state(),
                schemes = ?self.config.schemes,
                "dependency collector started"
            );
        }

        DependencyCollector {
            core,
            arbitrator: arbitrator.clone(),
            subscription: Mutex::new(subscription),
            inert,
        }
    }
}

/// One engine instance: a subscription plus its arbitration slot.
///
/// Dropping the collector disposes it.
pub struct DependencyCollector {
    core: Arc<CollectorCore>,
    arbitrator: Arbitrator,
    subscription: Mutex<Option<Box<dyn Subscription>>>,
    inert: bool,
}

impl DependencyCollector {
    /// Start configuring a collector that hands records to `sink`.
    ///
    /// Defaults: [`CollectorConfig::default`], [`ThreadContext`] for ambient
    /// context, and the process-wide [`SelfDiagnostics`].
    pub fn builder(sink: Arc<dyn TelemetrySink>) -> CollectorBuilder {
        CollectorBuilder {
            config: CollectorConfig::default(),
            sink,
            context: Arc::new(ThreadContext),
            diagnostics: SelfDiagnostics::global(),
        }
    }

    pub fn channel(&self) -> &str {
        self.core.slot.channel()
    }

    pub fn sequence(&self) -> u64 {
        self.core.slot.sequence()
    }

    /// Arbitration state. A collector whose subscription failed never joined
    /// the channel and reports `Unregistered`.
    pub fn state(&self) -> InstanceState {
        if self.inert {
            InstanceState::Unregistered
        } else {
            self.core.slot.state()
        }
    }

    pub fn is_active(&self) -> bool {
        !self.inert && self.core.slot.is_active()
    }

    /// Operations begun on this channel and not yet completed
    pub fn in_flight(&self) -> usize {
        self.core.store.len()
    }

    pub fn stats(&self) -> CollectorStats {
        CollectorStats {
            events_observed: self.core.observed.load(Ordering::Relaxed),
            events_discarded: self.core.discarded.load(Ordering::Relaxed),
            records_emitted: self.core.emitted.load(Ordering::Relaxed),
            state: self.state(),
        }
    }

    /// Leave the channel, stop accepting events, and unsubscribe.
    ///
    /// The successor is promoted before this instance stops accepting, so no
    /// completion falls between the two. Returns `false` when already
    /// disposed. A second call promotes nothing.
    pub fn dispose(&self) -> bool {
        let left = self.arbitrator.dispose(&self.core.slot);
        self.core.accepting.store(false, Ordering::Release);
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
        }
        if left {
            debug!(
                channel = %self.channel(),
                sequence = self.sequence(),
                "dependency collector disposed"
            );
        }
        left
    }
}

impl Drop for DependencyCollector {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct CollectorCore {
    slot: Arc<InstanceSlot>,
    store: Arc<CorrelationStore>,
    names: EventNameTable,
    builder: TelemetryBuilder,
    capture_baggage: bool,
    context: Arc<dyn AmbientContext>,
    sink: Arc<dyn TelemetrySink>,
    diagnostics: Arc<SelfDiagnostics>,
    accepting: AtomicBool,
    observed: AtomicU64,
    discarded: AtomicU64,
    emitted: AtomicU64,
}

impl EventHandler for CollectorCore {
    fn on_event(&self, name: &str, payload: &Payload) {
        let Some(resolved) = self.names.resolve(name) else {
            return;
        };
        self.observed.fetch_add(1, Ordering::Relaxed);

        if !self.accepting.load(Ordering::Acquire) || !self.slot.is_active() {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            trace!(event = name, state = %self.slot.state(), "event discarded by inactive collector");
            return;
        }

        let event = resolved.event;
        let outcome = catch_unwind(AssertUnwindSafe(|| self.dispatch(event, payload)));
        if let Err(panic) = outcome {
            self.diagnostics.report(Anomaly::HandlerPanicked {
                event: event.canonical_name(),
                message: panic_message(panic.as_ref()),
            });
        }
    }
}

impl CollectorCore {
    fn dispatch(&self, event: LogicalEvent, payload: &Payload) {
        let operation_id = match payload.operation_id() {
            Ok(id) => id,
            Err(source) => {
                self.report_invalid(event, source);
                return;
            }
        };

        match event.role {
            EventRole::Begin => self.on_begin(event, operation_id, payload),
            EventRole::End => self.on_complete(event, operation_id, payload, Outcome::Success),
            EventRole::Error => {
                let failure = match payload.error() {
                    Ok(error) => Some(error),
                    Err(source) => {
                        self.report_omitted(&operation_id, keys::EXCEPTION, source.to_string());
                        None
                    }
                };
                self.on_complete(event, operation_id, payload, Outcome::Failure(failure));
            }
        }
    }

    fn on_begin(&self, event: LogicalEvent, operation_id: OperationId, payload: &Payload) {
        let kind = event.kind;
        let mut command_text = None;

        let connection: Arc<dyn ConnectionInfo> = if kind == OperationKind::Command {
            let command = match payload.command() {
                Ok(command) => command,
                Err(source) => {
                    self.report_invalid(event, source);
                    return;
                }
            };
            match command.command_text() {
                Ok(text) if !text.is_empty() => command_text = Some(text),
                Ok(_) => {}
                Err(source) => self.report(Anomaly::FieldOmitted {
                    operation_id: operation_id.to_hex(),
                    source,
                }),
            }
            match command.connection().map_or_else(|| payload.connection(), Ok) {
                Ok(connection) => connection,
                Err(source) => {
                    self.report_invalid(event, source);
                    return;
                }
            }
        } else {
            match payload.connection() {
                Ok(connection) => connection,
                Err(source) => {
                    self.report_invalid(event, source);
                    return;
                }
            }
        };

        let resolution = resolve_target(connection.as_ref());
        for source in resolution.omitted {
            self.report(Anomaly::FieldOmitted {
                operation_id: operation_id.to_hex(),
                source,
            });
        }

        let trace_context = TraceContextSnapshot::capture(self.context.as_ref(), self.capture_baggage);
        let mut operation = InFlightOperation::start(
            operation_id,
            kind,
            resolution.target.unwrap_or_default(),
            trace_context,
        );
        operation.start_timestamp_raw = self.optional_timestamp(&operation_id, payload);

        if kind == OperationKind::Command {
            operation.data = command_text;
        } else if let Some(label) = self.optional_text(&operation_id, payload, keys::OPERATION) {
            operation.operation_label = label;
        }
        if kind.is_transaction() {
            operation.isolation_level = self.optional_text(&operation_id, payload, keys::ISOLATION_LEVEL);
            operation.transaction_name = self.optional_text(&operation_id, payload, keys::TRANSACTION_NAME);
        }

        trace!(operation_id = %operation_id, kind = %kind, target = %operation.target, "operation begun");
        if let Some(evicted) = self.store.begin(operation) {
            self.report(Anomaly::DuplicateBegin {
                operation_id: operation_id.to_hex(),
                previous_kind: evicted.kind,
            });
        }
    }

    fn on_complete(
        &self,
        event: LogicalEvent,
        operation_id: OperationId,
        payload: &Payload,
        outcome: Outcome,
    ) {
        let Some(operation) = self.store.complete(&operation_id) else {
            self.report(Anomaly::UnmatchedCompletion {
                operation_id: operation_id.to_hex(),
                event: event.canonical_name(),
            });
            return;
        };

        if operation.kind != event.kind {
            debug!(
                operation_id = %operation_id,
                begun_as = %operation.kind,
                completed_as = %event.kind,
                "completion kind differs from begin kind"
            );
        }

        if event.role == EventRole::End && !event.kind.reports_success() {
            trace!(operation_id = %operation_id, kind = %event.kind, "operation completed without telemetry");
            return;
        }

        let timestamp = self.optional_timestamp(&operation_id, payload);
        let completion = Completion::now(timestamp, outcome);
        match self.builder.build(operation, &completion) {
            Ok(record) => {
                trace!(
                    operation_id = %operation_id,
                    name = %record.name,
                    success = record.success,
                    "dependency record emitted"
                );
                self.sink.accept(record);
                self.emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(source) => self.report(Anomaly::RecordDropped { source }),
        }
    }

    fn optional_text(&self, id: &OperationId, payload: &Payload, field: &'static str) -> Option<String> {
        match payload.text(field) {
            Ok(value) => value.map(str::to_string),
            Err(source) => {
                self.report_omitted(id, field, source.to_string());
                None
            }
        }
    }

    fn optional_timestamp(&self, id: &OperationId, payload: &Payload) -> Option<i64> {
        match payload.timestamp() {
            Ok(timestamp) => timestamp,
            Err(source) => {
                self.report_omitted(id, keys::TIMESTAMP, source.to_string());
                None
            }
        }
    }

    fn report_invalid(&self, event: LogicalEvent, source: crate::error::PayloadError) {
        self.report(Anomaly::InvalidPayload {
            event: event.canonical_name(),
            source,
        });
    }

    fn report_omitted(&self, id: &OperationId, field: &'static str, reason: String) {
        self.report(Anomaly::FieldOmitted {
            operation_id: id.to_hex(),
            source: FieldError::new(field, reason),
        });
    }

    fn report(&self, anomaly: Anomaly) {
        self.diagnostics.report(anomaly);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StaticContext;
    use crate::diagnostics::AnomalyCategory;
    use crate::error::SubscribeError;
    use crate::events::DriverScheme;
    use crate::payload::{CommandSnapshot, ConnectionSnapshot, DriverError};
    use crate::source::DiagnosticBus;
    use crate::telemetry::MemorySink;

    const CHANNEL: &str = "SqlClientDiagnosticListener";

    struct Fixture {
        bus: DiagnosticBus,
        arbitrator: Arbitrator,
        sink: Arc<MemorySink>,
        diagnostics: Arc<SelfDiagnostics>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                bus: DiagnosticBus::new(),
                arbitrator: Arbitrator::new(),
                sink: Arc::new(MemorySink::new()),
                diagnostics: Arc::new(SelfDiagnostics::new()),
            }
        }

        fn start(&self) -> DependencyCollector {
            DependencyCollector::builder(self.sink.clone())
                .context(Arc::new(StaticContext(TraceContextSnapshot::new("root", "parent"))))
                .diagnostics(self.diagnostics.clone())
                .start(&self.bus, &self.arbitrator)
        }

        fn publish(&self, name: &str, payload: &Payload) {
            self.bus.publish(CHANNEL, name, payload);
        }
    }

    fn command_payload(id: OperationId) -> Payload {
        Payload::new()
            .with(keys::OPERATION_ID, id)
            .with(
                keys::COMMAND,
                CommandSnapshot::new("SELECT 1", ConnectionSnapshot::new("srv", "db")),
            )
            .with(keys::TIMESTAMP, 1_000_i64)
    }

    fn end_payload(id: OperationId, ts: i64) -> Payload {
        Payload::new()
            .with(keys::OPERATION_ID, id)
            .with(keys::TIMESTAMP, ts)
    }

    #[test]
    fn test_begin_end_emits_one_record() {
        let fx = Fixture::new();
        let collector = fx.start();
        let id = OperationId::new_random();

        fx.publish("System.Data.SqlClient.WriteCommandBefore", &command_payload(id));
        assert_eq!(collector.in_flight(), 1);
        fx.publish("System.Data.SqlClient.WriteCommandAfter", &end_payload(id, 6_000));

        let records = fx.sink.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, id.to_hex());
        assert_eq!(record.name, "srv | db");
        assert_eq!(record.data.as_deref(), Some("SELECT 1"));
        assert_eq!(record.duration.as_nanos(), 5_000);
        assert!(record.success);
        assert_eq!(record.operation_context.root_id.as_deref(), Some("root"));
        assert_eq!(collector.in_flight(), 0);
        assert_eq!(collector.stats().records_emitted, 1);
    }

    #[test]
    fn test_error_event_without_exception_still_fails() {
        let fx = Fixture::new();
        let _collector = fx.start();
        let id = OperationId::new_random();

        fx.publish("Microsoft.Data.SqlClient.WriteCommandBefore", &command_payload(id));
        fx.publish("Microsoft.Data.SqlClient.WriteCommandError", &end_payload(id, 2_000));

        let records = fx.sink.records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
        assert!(records[0].exception().is_none());
        assert_eq!(fx.diagnostics.count(AnomalyCategory::FieldOmitted), 1);
    }

    #[test]
    fn test_connection_close_end_is_silent() {
        let fx = Fixture::new();
        let collector = fx.start();
        let id = OperationId::new_random();
        let begin = Payload::new()
            .with(keys::OPERATION_ID, id)
            .with(keys::CONNECTION, ConnectionSnapshot::new("srv", "db"));

        fx.publish("System.Data.SqlClient.WriteConnectionCloseBefore", &begin);
        fx.publish("System.Data.SqlClient.WriteConnectionCloseAfter", &end_payload(id, 5));

        assert!(fx.sink.is_empty());
        assert_eq!(collector.in_flight(), 0);
        assert_eq!(fx.diagnostics.total(), 0);
    }

    #[test]
    fn test_connection_close_error_is_reported() {
        let fx = Fixture::new();
        let _collector = fx.start();
        let id = OperationId::new_random();
        let begin = Payload::new()
            .with(keys::OPERATION_ID, id)
            .with(keys::CONNECTION, ConnectionSnapshot::new("srv", "db"));
        let error = end_payload(id, 5).with(keys::EXCEPTION, DriverError::generic("IOException", "reset"));

        fx.publish("System.Data.SqlClient.WriteConnectionCloseBefore", &begin);
        fx.publish("System.Data.SqlClient.WriteConnectionCloseError", &error);

        let records = fx.sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "srv | db | Close");
        assert_eq!(records[0].exception(), Some("IOException: reset"));
    }

    #[test]
    fn test_begin_without_connection_is_ignored() {
        let fx = Fixture::new();
        let collector = fx.start();
        let payload = Payload::new().with(keys::OPERATION_ID, OperationId::new_random());

        fx.publish("System.Data.SqlClient.WriteConnectionOpenBefore", &payload);

        assert_eq!(collector.in_flight(), 0);
        assert_eq!(fx.diagnostics.count(AnomalyCategory::InvalidPayload), 1);
    }

    #[test]
    fn test_missing_operation_id_is_ignored() {
        let fx = Fixture::new();
        let _collector = fx.start();

        fx.publish("System.Data.SqlClient.WriteCommandAfter", &Payload::new());

        assert!(fx.sink.is_empty());
        assert_eq!(fx.diagnostics.count(AnomalyCategory::InvalidPayload), 1);
    }

    #[test]
    fn test_unrecognized_names_are_not_counted() {
        let fx = Fixture::new();
        let collector = fx.start();

        fx.publish("System.Data.SqlClient.WriteSomethingElse", &Payload::new());

        assert_eq!(collector.stats().events_observed, 0);
        assert_eq!(fx.diagnostics.total(), 0);
    }

    #[test]
    fn test_disabled_scheme_is_ignored() {
        let fx = Fixture::new();
        let _collector = DependencyCollector::builder(fx.sink.clone())
            .config(CollectorConfig::default().with_schemes(&[DriverScheme::Current]))
            .diagnostics(fx.diagnostics.clone())
            .start(&fx.bus, &fx.arbitrator);
        let id = OperationId::new_random();

        fx.publish("System.Data.SqlClient.WriteCommandBefore", &command_payload(id));
        fx.publish("System.Data.SqlClient.WriteCommandAfter", &end_payload(id, 2_000));

        assert!(fx.sink.is_empty());
    }

    #[test]
    fn test_standby_discards() {
        let fx = Fixture::new();
        let active = fx.start();
        let standby = fx.start();
        let id = OperationId::new_random();

        fx.publish("System.Data.SqlClient.WriteCommandBefore", &command_payload(id));
        fx.publish("System.Data.SqlClient.WriteCommandAfter", &end_payload(id, 2_000));

        assert_eq!(fx.sink.len(), 1);
        assert_eq!(active.stats().events_discarded, 0);
        let stats = standby.stats();
        assert_eq!(stats.events_observed, 2);
        assert_eq!(stats.events_discarded, 2);
        assert_eq!(stats.state, InstanceState::Standby);
    }

    #[test]
    fn test_dispose_is_idempotent_and_unsubscribes() {
        let fx = Fixture::new();
        let collector = fx.start();
        assert_eq!(fx.bus.subscriber_count(CHANNEL), 1);

        assert!(collector.dispose());
        assert!(!collector.dispose());
        assert_eq!(fx.bus.subscriber_count(CHANNEL), 0);
        assert_eq!(collector.state(), InstanceState::Disposed);
    }

    #[test]
    fn test_subscribe_failure_leaves_collector_inert() {
        let fx = Fixture::new();
        fx.bus.close();
        let collector = fx.start();

        assert_eq!(collector.state(), InstanceState::Unregistered);
        assert!(!collector.is_active());
        assert!(!fx.arbitrator.is_registered(CHANNEL));
        assert_eq!(fx.diagnostics.count(AnomalyCategory::ConstructionFailed), 1);
        assert!(!collector.dispose());
    }

    #[test]
    fn test_failed_collector_does_not_block_later_one() {
        struct Refusing;
        impl DiagnosticSource for Refusing {
            fn subscribe(
                &self,
                channel: &str,
                _handler: Arc<dyn EventHandler>,
            ) -> Result<Box<dyn Subscription>, SubscribeError> {
                Err(SubscribeError::Rejected {
                    channel: channel.to_string(),
                    reason: "listener limit reached".into(),
                })
            }
        }

        let fx = Fixture::new();
        let _failed = DependencyCollector::builder(fx.sink.clone())
            .diagnostics(fx.diagnostics.clone())
            .start(&Refusing, &fx.arbitrator);
        let working = fx.start();
        assert!(working.is_active());
    }

    #[test]
    fn test_panicking_sink_is_contained() {
        struct Exploding;
        impl TelemetrySink for Exploding {
            fn accept(&self, _record: crate::telemetry::DependencyTelemetry) {
                panic!("sink exploded");
            }
        }

        let fx = Fixture::new();
        let _collector = DependencyCollector::builder(Arc::new(Exploding))
            .diagnostics(fx.diagnostics.clone())
            .start(&fx.bus, &fx.arbitrator);
        let id = OperationId::new_random();

        fx.publish("System.Data.SqlClient.WriteCommandBefore", &command_payload(id));
        fx.publish("System.Data.SqlClient.WriteCommandAfter", &end_payload(id, 2_000));

        assert_eq!(fx.diagnostics.count(AnomalyCategory::HandlerPanicked), 1);
    }

    #[test]
    fn test_panic_message_extraction() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
