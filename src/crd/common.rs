//! Shared types used across the custom resources
//!
//! Interfaces, endpoints, resource references and status conditions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// Well-Known Protocols and Formats
// =============================================================================

/// S3-compatible object storage
pub const PROTOCOL_S3: &str = "s3";
/// Kafka topics
pub const PROTOCOL_KAFKA: &str = "kafka";
/// JDBC access to DB2
pub const PROTOCOL_JDBC_DB2: &str = "jdbc-db2";
/// Arrow Flight service
pub const PROTOCOL_ARROW_FLIGHT: &str = "arrow-flight";

pub const FORMAT_CSV: &str = "csv";
pub const FORMAT_PARQUET: &str = "parquet";
pub const FORMAT_ARROW: &str = "arrow";
pub const FORMAT_TABLE: &str = "table";
pub const FORMAT_JSON: &str = "json";

// =============================================================================
// Owner Labels
// =============================================================================

/// Label carrying the owning application name on generated resources
pub const APPLICATION_NAME_LABEL: &str = "dataflow.io/appName";
/// Label carrying the owning application namespace on generated resources
pub const APPLICATION_NAMESPACE_LABEL: &str = "dataflow.io/appNamespace";

// =============================================================================
// Interface
// =============================================================================

/// Protocol and data format through which a dataset is exposed or consumed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceDetails {
    /// Access protocol (e.g. s3, kafka, jdbc-db2, arrow-flight)
    #[serde(default)]
    pub protocol: String,

    /// Data format (e.g. csv, parquet, arrow, table)
    #[serde(default)]
    pub data_format: String,
}

impl InterfaceDetails {
    pub fn new(protocol: &str, data_format: &str) -> Self {
        Self {
            protocol: protocol.to_string(),
            data_format: data_format.to_string(),
        }
    }
}

impl std::fmt::Display for InterfaceDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.protocol, self.data_format)
    }
}

// =============================================================================
// Action Level
// =============================================================================

/// Granularity of a governance action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ActionLevel {
    /// Applies to the dataset as a whole
    #[default]
    Dataset,
    /// Applies to individual columns
    Column,
}

impl std::fmt::Display for ActionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionLevel::Dataset => write!(f, "dataset"),
            ActionLevel::Column => write!(f, "column"),
        }
    }
}

// =============================================================================
// Endpoint
// =============================================================================

/// Service endpoint exposed by a deployed module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSpec {
    /// Hostname within the cluster network
    #[serde(default)]
    pub hostname: String,

    /// Service port
    #[serde(default)]
    pub port: u16,

    /// Connection scheme (e.g. grpc, http, https)
    #[serde(default)]
    pub scheme: String,
}

// =============================================================================
// Resource Reference
// =============================================================================

/// Reference from an application to the resource generated for it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReference {
    /// Name of the generated resource
    pub name: String,
    /// Namespace of the generated resource
    pub namespace: String,
    /// Kind of the generated resource
    pub kind: String,
    /// Application generation the resource was produced for
    #[serde(default)]
    pub app_version: i64,
}

// =============================================================================
// Conditions
// =============================================================================

/// Condition type reported on an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionType {
    /// Data is ready for use by the workload
    Ready,
    /// Access to one or more datasets was denied by governance
    Deny,
    /// Planning or orchestration failed
    Error,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionType::Ready => write!(f, "Ready"),
            ConditionType::Deny => write!(f, "Deny"),
            ConditionType::Error => write!(f, "Error"),
        }
    }
}

/// Condition status values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    #[default]
    False,
    Unknown,
}

/// Status condition on an application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: ConditionType,
    /// Status: True, False, Unknown
    #[serde(default)]
    pub status: ConditionStatus,
    /// Last transition time
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,
    /// Human-readable message, prefixed by the failing asset where relevant
    #[serde(default)]
    pub message: String,
}

impl Condition {
    pub fn new(r#type: ConditionType) -> Self {
        Self {
            r#type,
            status: ConditionStatus::False,
            last_transition_time: None,
            message: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_display() {
        let iface = InterfaceDetails::new(PROTOCOL_S3, FORMAT_PARQUET);
        assert_eq!(format!("{}", iface), "s3/parquet");
    }

    #[test]
    fn test_interface_equality() {
        assert_eq!(
            InterfaceDetails::new(PROTOCOL_S3, FORMAT_CSV),
            InterfaceDetails::new("s3", "csv")
        );
        assert_ne!(
            InterfaceDetails::new(PROTOCOL_S3, FORMAT_CSV),
            InterfaceDetails::new(PROTOCOL_S3, FORMAT_PARQUET)
        );
    }
}
