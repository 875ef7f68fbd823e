//! DataModule CRD
//!
//! A module is an installable component providing read, copy or write
//! capabilities over declared interfaces, together with the governance
//! actions it can enforce. Modules are data; the controller never calls
//! into them, it only plans their deployment.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{ActionLevel, EndpointSpec, InterfaceDetails};

// =============================================================================
// DataModule CRD
// =============================================================================

/// DataModule describes a deployable unit of the data plane.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "dataflow.io",
    version = "v1alpha1",
    kind = "DataModule",
    plural = "datamodules",
    shortname = "dmod",
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DataModuleSpec {
    /// Helm chart installed by the plan runner
    #[serde(default)]
    pub chart: ChartSpec,

    /// Other components this module requires
    #[serde(default)]
    pub dependencies: Vec<Dependency>,

    /// Capabilities offered by the module
    #[serde(default)]
    pub capabilities: Vec<ModuleCapability>,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Chart and runtime information consumed by the plan runner
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    /// Chart registry reference
    #[serde(default)]
    pub name: String,

    /// Values applied on installation
    #[serde(default)]
    pub values: std::collections::BTreeMap<String, String>,
}

/// Coarse operation a module capability performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityType {
    Read,
    Copy,
    Write,
}

impl std::fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapabilityType::Read => write!(f, "read"),
            CapabilityType::Copy => write!(f, "copy"),
            CapabilityType::Write => write!(f, "write"),
        }
    }
}

/// One capability block of a module
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModuleCapability {
    /// Operation performed by this block
    pub capability: Option<CapabilityType>,

    /// Service interface exposed to consumers (read/write capabilities)
    #[serde(default)]
    pub api: Option<ModuleApi>,

    /// Interfaces the module can move data between
    #[serde(default)]
    pub supported_interfaces: Vec<ModuleInOut>,

    /// Governance actions this capability can enforce
    #[serde(default)]
    pub actions: Vec<ModuleAction>,
}

/// Service interface exposed by a read or write capability
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModuleApi {
    /// Serving protocol
    #[serde(default)]
    pub protocol: String,

    /// Served data format
    #[serde(default)]
    pub data_format: String,

    /// Endpoint details of the deployed service
    #[serde(default)]
    pub endpoint: EndpointSpec,
}

impl ModuleApi {
    /// Interface view of the api block
    pub fn interface(&self) -> InterfaceDetails {
        InterfaceDetails::new(&self.protocol, &self.data_format)
    }
}

/// Source/sink interface pair supported by a capability
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInOut {
    /// Interface the module reads from
    #[serde(default)]
    pub source: Option<InterfaceDetails>,

    /// Interface the module writes to
    #[serde(default)]
    pub sink: Option<InterfaceDetails>,
}

/// Governance action supported by a capability, matched by (id, level)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModuleAction {
    /// Action identifier (e.g. redact, remove-column)
    #[serde(default)]
    pub id: String,

    /// Granularity the action applies at
    #[serde(default)]
    pub level: ActionLevel,
}

/// Kind of dependency declared by a module
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    /// Another module that must be installed alongside
    #[default]
    Module,
    /// An external connector or service
    Connector,
}

/// Dependency declared by a module
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    /// Kind of the dependency
    #[serde(default, rename = "type")]
    pub dep_type: DependencyType,

    /// Name of the required component
    #[serde(default)]
    pub name: String,
}

// =============================================================================
// Implementations
// =============================================================================

impl DataModule {
    /// Get the name of this module
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    /// Capability blocks declared for the given capability type
    pub fn capabilities_of(&self, capability: CapabilityType) -> Vec<&ModuleCapability> {
        self.spec
            .capabilities
            .iter()
            .filter(|cap| cap.capability == Some(capability))
            .collect()
    }

    /// Whether the module declares the given capability at all
    pub fn has_capability(&self, capability: CapabilityType) -> bool {
        !self.capabilities_of(capability).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::common::{FORMAT_PARQUET, PROTOCOL_ARROW_FLIGHT, PROTOCOL_S3};

    fn read_module() -> DataModule {
        let mut module = DataModule::new(
            "module-read-parquet",
            DataModuleSpec {
                chart: ChartSpec::default(),
                dependencies: vec![],
                capabilities: vec![ModuleCapability {
                    capability: Some(CapabilityType::Read),
                    api: Some(ModuleApi {
                        protocol: PROTOCOL_ARROW_FLIGHT.into(),
                        data_format: "arrow".into(),
                        endpoint: EndpointSpec {
                            hostname: String::new(),
                            port: 80,
                            scheme: "grpc".into(),
                        },
                    }),
                    supported_interfaces: vec![ModuleInOut {
                        source: Some(InterfaceDetails::new(PROTOCOL_S3, FORMAT_PARQUET)),
                        sink: None,
                    }],
                    actions: vec![],
                }],
            },
        );
        module.metadata.namespace = Some("dataflow-system".into());
        module
    }

    #[test]
    fn test_capabilities_of() {
        let module = read_module();
        assert!(module.has_capability(CapabilityType::Read));
        assert!(!module.has_capability(CapabilityType::Copy));
        assert_eq!(module.capabilities_of(CapabilityType::Read).len(), 1);
    }

    #[test]
    fn test_api_interface() {
        let module = read_module();
        let caps = module.capabilities_of(CapabilityType::Read);
        let api = caps[0].api.as_ref().unwrap();
        assert_eq!(api.interface(), InterfaceDetails::new("arrow-flight", "arrow"));
    }
}
