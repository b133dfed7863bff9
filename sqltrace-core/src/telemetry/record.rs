//! Finished dependency telemetry record.
//!
//! One record per matched begin/completion pair. Field names and string
//! formats are consumed by telemetry backends as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Dependency family reported for every record
pub const SQL_DEPENDENCY_TYPE: &str = "SQL";

/// Property key holding the formatted failure text on Error records
pub const EXCEPTION_PROPERTY: &str = "Exception";

/// Property key holding the transaction name, when the producer supplied one
pub const TRANSACTION_NAME_PROPERTY: &str = "TransactionName";

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert SystemTime to nanoseconds since Unix epoch.
pub(crate) fn system_time_to_nanos(time: &SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_nanos().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_nanos)
    }
}

// ============================================================================
// Records
// ============================================================================

/// Distributed-tracing linkage frozen at Begin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// Description of one outbound database call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyTelemetry {
    /// Lowercase hex of the operation id, no separators
    pub id: String,

    /// `target` for commands; `target | label [| isolation]` otherwise
    pub name: String,

    /// Command text for commands, operation label otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    /// `"<dataSource> | <database>"`
    pub target: String,

    #[serde(rename = "type")]
    pub dependency_type: String,

    /// Wall-clock start, for display
    pub timestamp: DateTime<Utc>,

    /// Start time in nanoseconds since Unix epoch
    pub start_time_unix_nano: u64,

    #[serde(rename = "duration_nanos", with = "duration_nanos")]
    pub duration: Duration,

    pub success: bool,

    /// Decimal code of the first structured error entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_code: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,

    #[serde(default)]
    pub operation_context: OperationContext,
}

impl DependencyTelemetry {
    pub fn exception(&self) -> Option<&str> {
        self.properties.get(EXCEPTION_PROPERTY).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> DependencyTelemetry {
        let start = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        DependencyTelemetry {
            id: "550e8400e29b41d4a716446655440000".into(),
            name: "srv | db".into(),
            data: Some("select 1".into()),
            target: "srv | db".into(),
            dependency_type: SQL_DEPENDENCY_TYPE.into(),
            timestamp: start.into(),
            start_time_unix_nano: system_time_to_nanos(&start),
            duration: Duration::from_micros(1500),
            success: true,
            result_code: None,
            properties: BTreeMap::new(),
            operation_context: OperationContext {
                root_id: Some("root".into()),
                parent_id: None,
            },
        }
    }

    #[test]
    fn test_serialized_shape() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["type"], json!("SQL"));
        assert_eq!(value["duration_nanos"], json!(1_500_000));
        assert_eq!(value["start_time_unix_nano"], json!(1_700_000_000_000_000_000u64));
        assert_eq!(value["operation_context"], json!({ "root_id": "root" }));
        assert!(value.get("result_code").is_none());
        assert!(value.get("properties").is_none());
    }

    #[test]
    fn test_deserialize_from_serialized() {
        let original = sample();
        let text = serde_json::to_string(&original).unwrap();
        let parsed: DependencyTelemetry = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_system_time_before_epoch_is_zero() {
        let before = UNIX_EPOCH - Duration::from_secs(1);
        assert_eq!(system_time_to_nanos(&before), 0);
    }
}
