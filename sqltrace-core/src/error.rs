//! Error types for payload decoding, record building and subscription setup.
//!
//! None of these ever reach the producer thread. Every handler path turns
//! them into an [`Anomaly`](crate::diagnostics::Anomaly) and drops the event.

use thiserror::Error;

/// A payload did not carry a field in the shape the event kind requires.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// A required field was not present at all
    #[error("payload is missing required field '{field}'")]
    MissingField { field: &'static str },

    /// A field was present but held a value of the wrong variant
    #[error("payload field '{field}' has unexpected type (expected {expected}, found {found})")]
    UnexpectedType {
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    /// A string field could not be parsed into the expected value
    #[error("payload field '{field}' could not be parsed: {reason}")]
    Unparseable { field: &'static str, reason: String },

    /// The JSON form of a payload was not an object
    #[error("payload must be a JSON object, found {found}")]
    NotAnObject { found: &'static str },
}

/// A connection or command accessor failed to produce a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to read '{field}': {reason}")]
pub struct FieldError {
    pub field: &'static str,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// The builder could not produce one of the fields every record needs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// Neither data source nor database name could be read at Begin
    #[error("no target could be determined for operation {operation_id}")]
    MissingTarget { operation_id: String },
}

/// Setting up the bus subscription failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    /// The source refused the subscription for this channel
    #[error("diagnostic source rejected subscription to channel '{channel}': {reason}")]
    Rejected { channel: String, reason: String },

    /// The source has been shut down and accepts no new subscribers
    #[error("diagnostic source is closed; cannot subscribe to channel '{channel}'")]
    SourceClosed { channel: String },
}
