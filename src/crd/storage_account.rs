//! StorageAccount CRD
//!
//! Storage accounts are candidate destinations for dataset copies. The
//! planner picks the first account whose region is permitted by the
//! governance policies.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// StorageAccount CRD
// =============================================================================

/// StorageAccount describes an object store available for materializing
/// dataset copies.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "dataflow.io",
    version = "v1alpha1",
    kind = "StorageAccount",
    plural = "storageaccounts",
    printcolumn = r#"{"name": "Region", "type": "string", "jsonPath": ".spec.region"}"#,
    printcolumn = r#"{"name": "Endpoint", "type": "string", "jsonPath": ".spec.endpoint"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct StorageAccountSpec {
    /// Region the account resides in
    #[serde(default)]
    pub region: String,

    /// S3 endpoint of the account
    #[serde(default)]
    pub endpoint: String,

    /// Secret holding the account credentials
    #[serde(default)]
    pub secret_ref: String,
}

impl StorageAccount {
    /// Get the name of this storage account
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }
}
