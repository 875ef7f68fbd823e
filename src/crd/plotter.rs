//! Plotter CRD
//!
//! The plotter is the complete plan generated for an application: one
//! blueprint per cluster, each a sequence of module invocation steps.
//! The controller writes `.spec.blueprints` and reads back
//! `.status.observedState`; a separate runner executes the plan.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::common::InterfaceDetails;

// =============================================================================
// Plotter CRD
// =============================================================================

/// Plotter holds the blueprints generated for a single application.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "dataflow.io",
    version = "v1alpha1",
    kind = "Plotter",
    plural = "plotters",
    status = "PlotterStatus",
    printcolumn = r#"{"name": "Ready", "type": "string", "jsonPath": ".status.observedState.ready"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct PlotterSpec {
    /// Blueprints keyed by the cluster they run on
    #[serde(default)]
    pub blueprints: BTreeMap<String, BlueprintSpec>,
}

// =============================================================================
// Blueprint
// =============================================================================

/// Per-cluster sequence of module invocations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlueprintSpec {
    /// The data flow executed on this cluster
    #[serde(default)]
    pub flow: DataFlow,
}

/// Ordered steps of a blueprint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataFlow {
    /// Flow name, derived from the owning application
    #[serde(default)]
    pub name: String,

    /// Steps in execution order: copies precede reads
    #[serde(default)]
    pub steps: Vec<FlowStep>,
}

/// One module invocation within a blueprint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlowStep {
    /// Step name, unique within the blueprint
    #[serde(default)]
    pub name: String,

    /// Name of the module template to instantiate
    pub template: String,

    /// Arguments wiring the module to its sources and destinations
    #[serde(default)]
    pub arguments: ModuleArguments,
}

// =============================================================================
// Module Arguments
// =============================================================================

/// Arguments of a module instance. Exactly one of copy/read/write is
/// populated per step; read carries a list so that one deployed module
/// can serve multiple assets. Action lists are passed to the module
/// verbatim and applied in list order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModuleArguments {
    /// Copy arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy: Option<CopyArgs>,

    /// Read arguments, one entry per served asset
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read: Vec<ReadArgs>,

    /// Write arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<WriteArgs>,
}

/// A source or destination data store as seen by a module
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataStore {
    /// Store-specific connection details
    #[serde(default)]
    pub connection: serde_json::Value,

    /// Data format at this store
    #[serde(default)]
    pub format: String,

    /// Path in the secret store to the credentials for this store
    #[serde(default)]
    pub vault_secret_path: String,
}

/// An enforcement action a module must apply, copied from the policy
/// manager decision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepAction {
    /// Action identifier
    #[serde(default)]
    pub id: String,

    /// Granularity the action applies at
    #[serde(default)]
    pub level: String,

    /// Action parameters (e.g. column names)
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

/// Arguments of a copy step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CopyArgs {
    /// Asset being copied
    #[serde(default)]
    pub asset_id: String,

    /// Where the data is copied from
    #[serde(default)]
    pub source: DataStore,

    /// Where the copy is materialized
    #[serde(default)]
    pub destination: DataStore,

    /// Transformations applied while copying
    #[serde(default)]
    pub transformations: Vec<StepAction>,
}

/// Arguments of one asset served by a read step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadArgs {
    /// Asset served to the workload
    #[serde(default)]
    pub asset_id: String,

    /// Where the data is read from
    #[serde(default)]
    pub source: DataStore,

    /// Transformations applied while serving
    #[serde(default)]
    pub transformations: Vec<StepAction>,
}

/// Arguments of a write step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WriteArgs {
    /// Asset being written
    #[serde(default)]
    pub asset_id: String,

    /// Where the data is written to
    #[serde(default)]
    pub destination: DataStore,

    /// Transformations applied while writing
    #[serde(default)]
    pub transformations: Vec<StepAction>,
}

impl DataStore {
    /// Interface view of the store
    pub fn interface_with(&self, protocol: &str) -> InterfaceDetails {
        InterfaceDetails::new(protocol, &self.format)
    }
}

// =============================================================================
// Status
// =============================================================================

/// Status of the Plotter
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlotterStatus {
    /// State observed by the plan runner
    #[serde(default)]
    pub observed_state: ObservedState,
}

/// State of the generated resource as reported by the runner
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObservedState {
    /// Modules have been orchestrated and the data is ready for usage
    #[serde(default)]
    pub ready: bool,

    /// Orchestration error, empty when none occurred
    #[serde(default)]
    pub error: String,

    /// Instructions for the data user, available upon success
    #[serde(default)]
    pub data_access_instructions: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blueprint_equality() {
        let step = FlowStep {
            name: "copy-0".into(),
            template: "implicit-copy-batch".into(),
            arguments: ModuleArguments {
                copy: Some(CopyArgs {
                    asset_id: "s3/allow-dataset".into(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        };
        let a = BlueprintSpec {
            flow: DataFlow {
                name: "notebook-default".into(),
                steps: vec![step.clone()],
            },
        };
        let b = BlueprintSpec {
            flow: DataFlow {
                name: "notebook-default".into(),
                steps: vec![step],
            },
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_arguments_serialization_skips_empty() {
        let args = ModuleArguments {
            read: vec![ReadArgs::default()],
            ..Default::default()
        };
        let json = serde_json::to_value(&args).unwrap();
        assert!(json.get("copy").is_none());
        assert!(json.get("write").is_none());
        assert!(json.get("read").is_some());
    }
}
