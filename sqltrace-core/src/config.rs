//! Collector configuration.
//!
//! Every field has a default, so an empty YAML document is a valid config.
//!
//! ```yaml
//! channel: SqlClientDiagnosticListener
//! schemes: [legacy, current]
//! timestamp_ticks_per_second: 10000000
//! capture_baggage: true
//! dependency_type: SQL
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::events::{DriverScheme, EventNameTable};
use crate::telemetry::{TelemetryBuilder, SQL_DEPENDENCY_TYPE};

/// Channel both SqlClient generations publish on
pub const DEFAULT_CHANNEL: &str = "SqlClientDiagnosticListener";

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

fn default_schemes() -> Vec<DriverScheme> {
    DriverScheme::ALL.to_vec()
}

fn default_ticks_per_second() -> u64 {
    1_000_000_000
}

fn default_capture_baggage() -> bool {
    true
}

fn default_dependency_type() -> String {
    SQL_DEPENDENCY_TYPE.to_string()
}

/// Settings for one [`DependencyCollector`](crate::collector::DependencyCollector).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Diagnostic channel to subscribe to
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Driver generations whose event names are recognized
    #[serde(default = "default_schemes")]
    pub schemes: Vec<DriverScheme>,

    /// Frequency of the producer's `Timestamp` counter
    #[serde(default = "default_ticks_per_second")]
    pub timestamp_ticks_per_second: u64,

    /// Copy ambient baggage into record properties
    #[serde(default = "default_capture_baggage")]
    pub capture_baggage: bool,

    /// Value reported in each record's `type`
    #[serde(default = "default_dependency_type")]
    pub dependency_type: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            schemes: default_schemes(),
            timestamp_ticks_per_second: default_ticks_per_second(),
            capture_baggage: default_capture_baggage(),
            dependency_type: default_dependency_type(),
        }
    }
}

impl CollectorConfig {
    /// Load and validate a YAML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read collector config from {}", path.display()))?;
        let config = Self::from_yaml(&content)
            .with_context(|| format!("Invalid collector config in {}", path.display()))?;
        info!(path = %path.display(), channel = %config.channel, "Loaded collector config");
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: CollectorConfig = if content.trim().is_empty() {
            debug!("Empty collector config; using defaults");
            CollectorConfig::default()
        } else {
            serde_yaml_ng::from_str(content).context("Failed to parse collector config YAML")?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel.trim().is_empty() {
            bail!("channel must not be empty");
        }
        if self.schemes.is_empty() {
            bail!("at least one driver scheme must be enabled (legacy, current)");
        }
        if self.timestamp_ticks_per_second == 0 {
            bail!("timestamp_ticks_per_second must be greater than zero");
        }
        if self.dependency_type.trim().is_empty() {
            bail!("dependency_type must not be empty");
        }
        Ok(())
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_schemes(mut self, schemes: &[DriverScheme]) -> Self {
        self.schemes = schemes.to_vec();
        self
    }

    pub fn with_ticks_per_second(mut self, ticks: u64) -> Self {
        self.timestamp_ticks_per_second = ticks;
        self
    }

    pub fn with_baggage(mut self, capture: bool) -> Self {
        self.capture_baggage = capture;
        self
    }

    pub fn name_table(&self) -> EventNameTable {
        EventNameTable::new(&self.schemes)
    }

    pub fn telemetry_builder(&self) -> TelemetryBuilder {
        TelemetryBuilder::new(self.dependency_type.clone(), self.timestamp_ticks_per_second)
    }
}
