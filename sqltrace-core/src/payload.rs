//! Loosely typed event payloads.
//!
//! The driver documents field names but not a schema, so a payload is a map
//! from field name to a small set of value variants. Accessors validate the
//! shape each event kind needs and report a [`PayloadError`] otherwise.
//!
//! | Field             | Variant      | Events                          |
//! |-------------------|--------------|---------------------------------|
//! | `OperationId`     | id / text    | all (required)                  |
//! | `Timestamp`       | integer      | all (optional)                  |
//! | `Command`         | command      | command events (Begin required) |
//! | `Connection`      | connection   | connection and transaction      |
//! | `Operation`       | text         | lifecycle events (optional)     |
//! | `IsolationLevel`  | text         | transaction Begin (optional)    |
//! | `TransactionName` | text         | transaction Begin (optional)    |
//! | `Exception`       | error        | Error events (required)         |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{FieldError, PayloadError};

/// Documented payload field names.
pub mod keys {
    pub const OPERATION_ID: &str = "OperationId";
    pub const TIMESTAMP: &str = "Timestamp";
    pub const COMMAND: &str = "Command";
    pub const CONNECTION: &str = "Connection";
    pub const OPERATION: &str = "Operation";
    pub const ISOLATION_LEVEL: &str = "IsolationLevel";
    pub const TRANSACTION_NAME: &str = "TransactionName";
    pub const EXCEPTION: &str = "Exception";
}

/// Correlation key supplied by the producer for one logical operation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Lowercase hex with no separators; the record id format
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationId({})", self.to_hex())
    }
}

impl From<Uuid> for OperationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::str::FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Read-only view of a driver connection.
///
/// Called once per Begin event; the values are frozen onto the in-flight
/// record and never re-read.
pub trait ConnectionInfo: Send + Sync + fmt::Debug {
    fn data_source(&self) -> Result<String, FieldError>;
    fn database_name(&self) -> Result<String, FieldError>;
}

/// Read-only view of a driver command.
pub trait CommandInfo: Send + Sync + fmt::Debug {
    fn command_text(&self) -> Result<String, FieldError>;

    /// The connection the command runs on, if it has one
    fn connection(&self) -> Option<Arc<dyn ConnectionInfo>>;
}

/// Plain-data connection, used for replayed and test events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    #[serde(rename = "DataSource", default)]
    pub data_source: String,
    #[serde(rename = "Database", default)]
    pub database: String,
}

impl ConnectionSnapshot {
    pub fn new(data_source: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            data_source: data_source.into(),
            database: database.into(),
        }
    }
}

impl ConnectionInfo for ConnectionSnapshot {
    fn data_source(&self) -> Result<String, FieldError> {
        Ok(self.data_source.clone())
    }

    fn database_name(&self) -> Result<String, FieldError> {
        Ok(self.database.clone())
    }
}

/// Plain-data command, used for replayed and test events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSnapshot {
    #[serde(rename = "CommandText", default)]
    pub command_text: String,
    #[serde(rename = "Connection", default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionSnapshot>,
}

impl CommandSnapshot {
    pub fn new(command_text: impl Into<String>, connection: ConnectionSnapshot) -> Self {
        Self {
            command_text: command_text.into(),
            connection: Some(connection),
        }
    }
}

impl CommandInfo for CommandSnapshot {
    fn command_text(&self) -> Result<String, FieldError> {
        Ok(self.command_text.clone())
    }

    fn connection(&self) -> Option<Arc<dyn ConnectionInfo>> {
        self.connection
            .clone()
            .map(|c| Arc::new(c) as Arc<dyn ConnectionInfo>)
    }
}

/// One entry of a structured driver error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    #[serde(rename = "Number")]
    pub number: i32,
    #[serde(rename = "Message", default)]
    pub message: String,
}

/// The failure carried by an Error event.
///
/// Drivers that report server errors expose an ordered list of entries; the
/// code of the first entry becomes the record's result code. A generic
/// failure has no entries and yields no result code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverError {
    #[serde(rename = "Type", default = "default_error_type")]
    pub type_name: String,
    #[serde(rename = "Message", default)]
    pub message: String,
    #[serde(rename = "Errors", default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ErrorEntry>>,
}

fn default_error_type() -> String {
    "Exception".to_string()
}

impl DriverError {
    /// A failure with no structured entries
    pub fn generic(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            errors: None,
        }
    }

    /// A failure exposing an ordered list of error entries
    pub fn structured(
        type_name: impl Into<String>,
        message: impl Into<String>,
        errors: Vec<ErrorEntry>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            errors: Some(errors),
        }
    }

    /// Code of the first structured entry, if there is one
    pub fn first_code(&self) -> Option<i32> {
        self.errors
            .as_ref()
            .and_then(|entries| entries.first())
            .map(|entry| entry.number)
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(&self.type_name)
        } else {
            write!(f, "{}: {}", self.type_name, self.message)
        }
    }
}

impl std::error::Error for DriverError {}

/// A single payload field value.
#[derive(Debug, Clone)]
pub enum PayloadValue {
    Text(String),
    Integer(i64),
    Id(Uuid),
    Connection(Arc<dyn ConnectionInfo>),
    Command(Arc<dyn CommandInfo>),
    Error(Arc<DriverError>),
}

impl PayloadValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            PayloadValue::Text(_) => "text",
            PayloadValue::Integer(_) => "integer",
            PayloadValue::Id(_) => "id",
            PayloadValue::Connection(_) => "connection",
            PayloadValue::Command(_) => "command",
            PayloadValue::Error(_) => "error",
        }
    }
}

impl From<&str> for PayloadValue {
    fn from(s: &str) -> Self {
        PayloadValue::Text(s.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(s: String) -> Self {
        PayloadValue::Text(s)
    }
}

impl From<i64> for PayloadValue {
    fn from(n: i64) -> Self {
        PayloadValue::Integer(n)
    }
}

impl From<OperationId> for PayloadValue {
    fn from(id: OperationId) -> Self {
        PayloadValue::Id(id.as_uuid())
    }
}

impl From<DriverError> for PayloadValue {
    fn from(err: DriverError) -> Self {
        PayloadValue::Error(Arc::new(err))
    }
}

impl From<ConnectionSnapshot> for PayloadValue {
    fn from(conn: ConnectionSnapshot) -> Self {
        PayloadValue::Connection(Arc::new(conn))
    }
}

impl From<CommandSnapshot> for PayloadValue {
    fn from(cmd: CommandSnapshot) -> Self {
        PayloadValue::Command(Arc::new(cmd))
    }
}

/// Field name to value mapping delivered with each raw event.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    fields: HashMap<String, PayloadValue>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PayloadValue>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.fields.get(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn operation_id(&self) -> Result<OperationId, PayloadError> {
        match self.fields.get(keys::OPERATION_ID) {
            Some(PayloadValue::Id(uuid)) => Ok(OperationId::from_uuid(*uuid)),
            Some(PayloadValue::Text(s)) => s.parse().map_err(|e: uuid::Error| {
                PayloadError::Unparseable {
                    field: keys::OPERATION_ID,
                    reason: e.to_string(),
                }
            }),
            Some(other) => Err(PayloadError::UnexpectedType {
                field: keys::OPERATION_ID,
                expected: "id",
                found: other.type_name(),
            }),
            None => Err(PayloadError::MissingField {
                field: keys::OPERATION_ID,
            }),
        }
    }

    pub fn timestamp(&self) -> Result<Option<i64>, PayloadError> {
        match self.fields.get(keys::TIMESTAMP) {
            Some(PayloadValue::Integer(n)) => Ok(Some(*n)),
            Some(other) => Err(PayloadError::UnexpectedType {
                field: keys::TIMESTAMP,
                expected: "integer",
                found: other.type_name(),
            }),
            None => Ok(None),
        }
    }

    /// Optional text field; absent and empty both read as `None`
    pub fn text(&self, field: &'static str) -> Result<Option<&str>, PayloadError> {
        match self.fields.get(field) {
            Some(PayloadValue::Text(s)) if s.is_empty() => Ok(None),
            Some(PayloadValue::Text(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(PayloadError::UnexpectedType {
                field,
                expected: "text",
                found: other.type_name(),
            }),
            None => Ok(None),
        }
    }

    pub fn command(&self) -> Result<Arc<dyn CommandInfo>, PayloadError> {
        match self.fields.get(keys::COMMAND) {
            Some(PayloadValue::Command(cmd)) => Ok(Arc::clone(cmd)),
            Some(other) => Err(PayloadError::UnexpectedType {
                field: keys::COMMAND,
                expected: "command",
                found: other.type_name(),
            }),
            None => Err(PayloadError::MissingField {
                field: keys::COMMAND,
            }),
        }
    }

    pub fn connection(&self) -> Result<Arc<dyn ConnectionInfo>, PayloadError> {
        match self.fields.get(keys::CONNECTION) {
            Some(PayloadValue::Connection(conn)) => Ok(Arc::clone(conn)),
            Some(other) => Err(PayloadError::UnexpectedType {
                field: keys::CONNECTION,
                expected: "connection",
                found: other.type_name(),
            }),
            None => Err(PayloadError::MissingField {
                field: keys::CONNECTION,
            }),
        }
    }

    pub fn error(&self) -> Result<Arc<DriverError>, PayloadError> {
        match self.fields.get(keys::EXCEPTION) {
            Some(PayloadValue::Error(err)) => Ok(Arc::clone(err)),
            Some(PayloadValue::Text(message)) => {
                Ok(Arc::new(DriverError::generic(default_error_type(), message.clone())))
            }
            Some(other) => Err(PayloadError::UnexpectedType {
                field: keys::EXCEPTION,
                expected: "error",
                found: other.type_name(),
            }),
            None => Err(PayloadError::MissingField {
                field: keys::EXCEPTION,
            }),
        }
    }

    /// Decode the JSON form used by replay files.
    ///
    /// Known object-valued fields (`Command`, `Connection`, `Exception`) are
    /// decoded into their snapshot types; other strings and integers are kept
    /// as text and integer values. Anything else is skipped.
    pub fn from_json(value: &Value) -> Result<Self, PayloadError> {
        let object = value.as_object().ok_or(PayloadError::NotAnObject {
            found: json_type_name(value),
        })?;

        let mut payload = Payload::new();
        for (key, field) in object {
            let decoded = match (key.as_str(), field) {
                (keys::OPERATION_ID, Value::String(s)) => match Uuid::parse_str(s) {
                    Ok(uuid) => PayloadValue::Id(uuid),
                    Err(_) => PayloadValue::Text(s.clone()),
                },
                (keys::COMMAND, Value::Object(_)) => {
                    let cmd: CommandSnapshot = decode_field(keys::COMMAND, field)?;
                    cmd.into()
                }
                (keys::CONNECTION, Value::Object(_)) => {
                    let conn: ConnectionSnapshot = decode_field(keys::CONNECTION, field)?;
                    conn.into()
                }
                (keys::EXCEPTION, Value::Object(_)) => {
                    let err: DriverError = decode_field(keys::EXCEPTION, field)?;
                    err.into()
                }
                (_, Value::String(s)) => PayloadValue::Text(s.clone()),
                (_, Value::Number(n)) => match n.as_i64() {
                    Some(i) => PayloadValue::Integer(i),
                    None => continue,
                },
                _ => continue,
            };
            payload.fields.insert(key.clone(), decoded);
        }
        Ok(payload)
    }
}

fn decode_field<T: serde::de::DeserializeOwned>(
    field: &'static str,
    value: &Value,
) -> Result<T, PayloadError> {
    serde_json::from_value(value.clone()).map_err(|e| PayloadError::Unparseable {
        field,
        reason: e.to_string(),
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
