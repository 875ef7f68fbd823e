//! DataApplication CRD
//!
//! The user-declared resource coupling a workload with the datasets it
//! consumes and the interface it expects them through. The controller
//! only ever mutates the status subresource.

use chrono::Utc;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::common::{Condition, ConditionStatus, ConditionType, EndpointSpec, InterfaceDetails, ResourceReference};

// =============================================================================
// DataApplication CRD
// =============================================================================

/// DataApplication couples a workload with the datasets it wishes to
/// consume or ingest, subject to governance policies.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "dataflow.io",
    version = "v1alpha1",
    kind = "DataApplication",
    plural = "dataapplications",
    shortname = "dapp",
    status = "DataApplicationStatus",
    printcolumn = r#"{"name": "Ready", "type": "string", "jsonPath": ".status.ready"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DataApplicationSpec {
    /// Workload locator; empty when the application only ingests data
    #[serde(default)]
    pub selector: WorkloadSelector,

    /// Purpose metadata forwarded verbatim to the policy manager
    #[serde(default)]
    pub app_info: AppInfo,

    /// Datasets required by the workload, in processing order
    #[serde(default)]
    pub data: Vec<DataContext>,

    /// Secret holding credentials for an access-controlled catalog
    #[serde(default)]
    pub secret_ref: String,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Locator of the user workload
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSelector {
    /// Name of the cluster running the workload
    #[serde(default)]
    pub cluster_name: String,

    /// Label match for the workload pods
    #[serde(default)]
    pub workload_selector: BTreeMap<String, String>,
}

/// Purpose metadata evaluated by the policy manager
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    /// Intent of the data usage (e.g. fraud-detection)
    #[serde(default)]
    pub intent: String,

    /// Role of the data user (e.g. data-scientist)
    #[serde(default)]
    pub role: String,

    /// Additional free-form properties
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// One dataset requirement within an application
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataContext {
    /// Dataset identifier as known to the data catalog
    pub data_set_id: String,

    /// Interface and copy requirements for this dataset
    #[serde(default)]
    pub requirements: DataRequirements,
}

/// Requirements attached to a single dataset
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataRequirements {
    /// Protocol and format in which the workload consumes the data
    #[serde(default)]
    pub interface: InterfaceDetails,

    /// Copy (materialization) requirements
    #[serde(default)]
    pub copy: CopyRequirements,
}

/// Copy requirements for a dataset
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CopyRequirements {
    /// Explicitly request a materialized copy
    #[serde(default)]
    pub required: bool,

    /// Destination catalog for registering the copy
    #[serde(default)]
    pub catalog: CatalogRequirements,
}

/// Catalog registration requirements for a copied dataset
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRequirements {
    /// Catalog into which the copy is registered; empty to skip registration
    #[serde(default)]
    pub catalog_id: String,
}

// =============================================================================
// Status
// =============================================================================

/// Details of a bucket provisioned to hold a dataset copy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatasetDetails {
    /// Name of the provisioned Dataset resource (same as the bucket name)
    pub dataset_ref: String,

    /// Secret holding the credentials of the selected storage account
    #[serde(default)]
    pub secret_ref: String,

    /// Raw connection details of the copy destination
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Status of the DataApplication
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataApplicationStatus {
    /// Data is ready for consumption by the workload
    #[serde(default)]
    pub ready: bool,

    /// Ready / Deny / Error conditions at fixed indices
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Back-reference to the generated plotter
    #[serde(default)]
    pub generated: Option<ResourceReference>,

    /// Buckets provisioned for dataset copies, keyed by dataset id
    #[serde(default)]
    pub provisioned_storage: BTreeMap<String, DatasetDetails>,

    /// New asset ids of copies registered in a catalog, keyed by dataset id
    #[serde(default)]
    pub cataloged_assets: BTreeMap<String, String>,

    /// Endpoints through which the workload reads each asset
    #[serde(default)]
    pub read_endpoints_map: BTreeMap<String, EndpointSpec>,

    /// Instructions for accessing the data, available once ready
    #[serde(default)]
    pub data_access_instructions: String,

    /// Generation last processed by the controller
    #[serde(default)]
    pub observed_generation: i64,
}

// Fixed positions of the three conditions in the status array.
pub const READY_CONDITION_INDEX: usize = 0;
pub const DENY_CONDITION_INDEX: usize = 1;
pub const ERROR_CONDITION_INDEX: usize = 2;

// =============================================================================
// Implementations
// =============================================================================

impl DataApplication {
    /// Get the name of this application
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    /// Get the namespace of this application
    pub fn namespace_or_default(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    /// Generation of the current spec
    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or(0)
    }

    /// Whether the application declares a workload to serve data to
    pub fn has_workload(&self) -> bool {
        !self.spec.selector.cluster_name.is_empty()
    }

    /// Mutable status, initializing the default on first access
    pub fn status_mut(&mut self) -> &mut DataApplicationStatus {
        self.status.get_or_insert_with(DataApplicationStatus::default)
    }

    /// Validate the submitted object against the taxonomy schema.
    /// Called by the admission webhook on create and update.
    pub fn validate_against_taxonomy(
        &self,
        validator: &crate::taxonomy::TaxonomyValidator,
    ) -> crate::error::Result<()> {
        let instance = serde_json::to_value(self)?;
        validator.check(&instance, "DataApplication")
    }
}

impl DataApplicationStatus {
    /// Reset Ready/Deny/Error conditions to their initial false state
    pub fn reset_conditions(&mut self) {
        self.conditions = vec![
            Condition::new(ConditionType::Ready),
            Condition::new(ConditionType::Deny),
            Condition::new(ConditionType::Error),
        ];
        self.ready = false;
    }

    fn ensure_conditions(&mut self) {
        if self.conditions.len() != 3 {
            self.reset_conditions();
        }
    }

    /// Mark the application ready. Ready and Deny are mutually exclusive.
    pub fn set_ready_condition(&mut self, message: &str) {
        self.ensure_conditions();
        if self.conditions[DENY_CONDITION_INDEX].status == ConditionStatus::True {
            return;
        }
        self.conditions[READY_CONDITION_INDEX].status = ConditionStatus::True;
        self.conditions[READY_CONDITION_INDEX].message = message.to_string();
        self.conditions[READY_CONDITION_INDEX].last_transition_time = Some(Utc::now());
        self.ready = true;
    }

    /// Record a governance denial for the given asset
    pub fn set_deny_condition(&mut self, asset_id: &str, message: &str) {
        self.ensure_conditions();
        self.conditions[DENY_CONDITION_INDEX].status = ConditionStatus::True;
        self.conditions[DENY_CONDITION_INDEX].message +=
            &prefixed_message(asset_id, message);
        self.conditions[DENY_CONDITION_INDEX].last_transition_time = Some(Utc::now());
        self.conditions[READY_CONDITION_INDEX].status = ConditionStatus::False;
        self.ready = false;
    }

    /// Record a planning or orchestration error for the given asset
    pub fn set_error_condition(&mut self, asset_id: &str, message: &str) {
        self.ensure_conditions();
        self.conditions[ERROR_CONDITION_INDEX].status = ConditionStatus::True;
        self.conditions[ERROR_CONDITION_INDEX].message +=
            &prefixed_message(asset_id, message);
        self.conditions[ERROR_CONDITION_INDEX].last_transition_time = Some(Utc::now());
    }

    /// Concatenated messages of all raised Deny/Error conditions
    pub fn error_messages(&self) -> String {
        let mut messages = String::new();
        for index in [DENY_CONDITION_INDEX, ERROR_CONDITION_INDEX] {
            if let Some(cond) = self.conditions.get(index) {
                if cond.status == ConditionStatus::True {
                    messages += &cond.message;
                }
            }
        }
        messages
    }

    /// Whether a Deny or Error condition has been raised
    pub fn error_or_deny(&self) -> bool {
        [DENY_CONDITION_INDEX, ERROR_CONDITION_INDEX].iter().any(|&index| {
            self.conditions
                .get(index)
                .map(|c| c.status == ConditionStatus::True)
                .unwrap_or(false)
        })
    }

    /// Whether the application has reached a state that requires no requeue
    pub fn in_final_state(&self) -> bool {
        self.ready || self.error_or_deny()
    }
}

fn prefixed_message(asset_id: &str, message: &str) -> String {
    if asset_id.is_empty() {
        format!("{message}\n")
    } else {
        format!("{asset_id}: {message}\n")
    }
}
