//! Event name table
//!
//! Driver generations publish the same lifecycle under different event
//! names. This module maps every recognized raw name onto one logical
//! `(kind, role)` pair so the correlation logic never sees a driver-specific
//! string. Unknown names resolve to `None` and are ignored by callers.

mod current;
mod legacy;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The operation family an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Command,
    ConnectionOpen,
    ConnectionClose,
    TransactionCommit,
    TransactionRollback,
}

impl OperationKind {
    /// Short label used in record names when the payload carries no `Operation`
    pub fn default_label(&self) -> &'static str {
        match self {
            OperationKind::Command => "Execute",
            OperationKind::ConnectionOpen => "Open",
            OperationKind::ConnectionClose => "Close",
            OperationKind::TransactionCommit => "Commit",
            OperationKind::TransactionRollback => "Rollback",
        }
    }

    pub fn is_transaction(&self) -> bool {
        matches!(
            self,
            OperationKind::TransactionCommit | OperationKind::TransactionRollback
        )
    }

    /// Whether a successful completion of this kind produces a record.
    ///
    /// Closing a connection is only reported when it fails.
    pub fn reports_success(&self) -> bool {
        !matches!(self, OperationKind::ConnectionClose)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Command => "Command",
            OperationKind::ConnectionOpen => "ConnectionOpen",
            OperationKind::ConnectionClose => "ConnectionClose",
            OperationKind::TransactionCommit => "TransactionCommit",
            OperationKind::TransactionRollback => "TransactionRollback",
        };
        f.write_str(s)
    }
}

/// Position of an event within its begin/complete pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventRole {
    Begin,
    End,
    Error,
}

/// Canonical, driver-independent identity of a raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalEvent {
    pub kind: OperationKind,
    pub role: EventRole,
}

impl LogicalEvent {
    pub const BEGIN_COMMAND: Self = Self::new(OperationKind::Command, EventRole::Begin);
    pub const END_COMMAND: Self = Self::new(OperationKind::Command, EventRole::End);
    pub const ERROR_COMMAND: Self = Self::new(OperationKind::Command, EventRole::Error);
    pub const BEGIN_CONNECTION_OPEN: Self =
        Self::new(OperationKind::ConnectionOpen, EventRole::Begin);
    pub const END_CONNECTION_OPEN: Self = Self::new(OperationKind::ConnectionOpen, EventRole::End);
    pub const ERROR_CONNECTION_OPEN: Self =
        Self::new(OperationKind::ConnectionOpen, EventRole::Error);
    pub const BEGIN_CONNECTION_CLOSE: Self =
        Self::new(OperationKind::ConnectionClose, EventRole::Begin);
    pub const END_CONNECTION_CLOSE: Self =
        Self::new(OperationKind::ConnectionClose, EventRole::End);
    pub const ERROR_CONNECTION_CLOSE: Self =
        Self::new(OperationKind::ConnectionClose, EventRole::Error);
    pub const BEGIN_TRANSACTION_COMMIT: Self =
        Self::new(OperationKind::TransactionCommit, EventRole::Begin);
    pub const END_TRANSACTION_COMMIT: Self =
        Self::new(OperationKind::TransactionCommit, EventRole::End);
    pub const ERROR_TRANSACTION_COMMIT: Self =
        Self::new(OperationKind::TransactionCommit, EventRole::Error);
    pub const BEGIN_TRANSACTION_ROLLBACK: Self =
        Self::new(OperationKind::TransactionRollback, EventRole::Begin);
    pub const END_TRANSACTION_ROLLBACK: Self =
        Self::new(OperationKind::TransactionRollback, EventRole::End);
    pub const ERROR_TRANSACTION_ROLLBACK: Self =
        Self::new(OperationKind::TransactionRollback, EventRole::Error);

    pub const fn new(kind: OperationKind, role: EventRole) -> Self {
        Self { kind, role }
    }

    /// Canonical name such as `BeginCommand` or `ErrorTransactionCommit`
    pub fn canonical_name(&self) -> String {
        let role = match self.role {
            EventRole::Begin => "Begin",
            EventRole::End => "End",
            EventRole::Error => "Error",
        };
        format!("{role}{}", self.kind)
    }
}

/// Recognized driver generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverScheme {
    /// System.Data.SqlClient
    Legacy,
    /// Microsoft.Data.SqlClient
    Current,
}

impl DriverScheme {
    pub const ALL: [DriverScheme; 2] = [DriverScheme::Legacy, DriverScheme::Current];

    pub fn as_str(&self) -> &'static str {
        match self {
            DriverScheme::Legacy => "legacy",
            DriverScheme::Current => "current",
        }
    }

    /// Raw event names published by this driver generation
    pub fn names(&self) -> &'static [(&'static str, LogicalEvent)] {
        match self {
            DriverScheme::Legacy => legacy::NAMES,
            DriverScheme::Current => current::NAMES,
        }
    }
}

impl fmt::Display for DriverScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DriverScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "legacy" | "system" | "system.data.sqlclient" => Ok(DriverScheme::Legacy),
            "current" | "microsoft" | "microsoft.data.sqlclient" => Ok(DriverScheme::Current),
            _ => Err(format!(
                "Unknown driver scheme: '{s}'. Valid options: legacy, current"
            )),
        }
    }
}

/// A raw name resolved through the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedEvent {
    pub scheme: DriverScheme,
    pub event: LogicalEvent,
}

static STANDARD: Lazy<EventNameTable> = Lazy::new(|| EventNameTable::new(&DriverScheme::ALL));

/// Lookup from raw event name to logical event.
#[derive(Debug, Clone)]
pub struct EventNameTable {
    index: HashMap<&'static str, ResolvedEvent>,
    schemes: Vec<DriverScheme>,
}

impl EventNameTable {
    /// Build a table recognizing only the given schemes
    pub fn new(schemes: &[DriverScheme]) -> Self {
        let mut index = HashMap::new();
        let mut enabled = Vec::with_capacity(schemes.len());
        for &scheme in schemes {
            if enabled.contains(&scheme) {
                continue;
            }
            enabled.push(scheme);
            for &(name, event) in scheme.names() {
                index.insert(name, ResolvedEvent { scheme, event });
            }
        }
        Self {
            index,
            schemes: enabled,
        }
    }

    /// Shared table recognizing every known scheme
    pub fn standard() -> &'static EventNameTable {
        &STANDARD
    }

    pub fn resolve(&self, raw_name: &str) -> Option<ResolvedEvent> {
        self.index.get(raw_name).copied()
    }

    pub fn schemes(&self) -> &[DriverScheme] {
        &self.schemes
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl Default for EventNameTable {
    fn default() -> Self {
        Self::new(&DriverScheme::ALL)
    }
}
