//! Domain Ports - Core trait definitions for the data-flow controller
//!
//! These traits define the boundaries between the planning logic and the
//! external collaborators: data catalog, policy manager, cluster registry,
//! storage provisioner, module registry and the generated plotter resource.
//! Adapters implement these traits; tests inject in-memory fakes.

use crate::crd::{ActionLevel, DataModule, InterfaceDetails, ObservedState, ResourceReference, StorageAccount};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Reserved Action IDs
// =============================================================================

/// Policy decision that requires no enforcement
pub const ACTION_ALLOW: &str = "allow";
/// Policy decision that forbids the operation altogether
pub const ACTION_DENY: &str = "deny";

// =============================================================================
// Namespaced Name
// =============================================================================

/// Name and namespace of an external resource
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespacedName {
    pub name: String,
    pub namespace: String,
}

impl NamespacedName {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

impl std::fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// =============================================================================
// Catalog Types
// =============================================================================

/// Connection details of a dataset, typed by the backing store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", rename_all_fields = "camelCase", tag = "type")]
pub enum Connection {
    S3 {
        endpoint: String,
        bucket: String,
        #[serde(default)]
        object_key: String,
    },
    Kafka {
        topic_name: String,
        bootstrap_servers: String,
        #[serde(default)]
        schema_registry: String,
    },
    Db2 {
        url: String,
        database: String,
        table: String,
        #[serde(default)]
        port: u16,
        #[serde(default)]
        ssl: bool,
    },
    /// Store type unknown to the controller; passed through to the module
    #[serde(untagged)]
    Generic(serde_json::Value),
}

impl Default for Connection {
    fn default() -> Self {
        Connection::Generic(serde_json::Value::Null)
    }
}

/// Tags attached to a dataset and its columns in the catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetMetadata {
    /// Dataset-level tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Per-column tags, keyed by column name
    #[serde(default)]
    pub components_metadata: BTreeMap<String, Vec<String>>,

    /// Named metadata properties
    #[serde(default)]
    pub named_metadata: BTreeMap<String, String>,
}

/// Dataset information returned by the data catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDetails {
    /// Name of the asset
    pub name: String,

    /// Protocol and format the source exposes
    #[serde(default)]
    pub interface: InterfaceDetails,

    /// Geo-location of the asset
    #[serde(default)]
    pub geography: String,

    /// Store-specific connection details
    #[serde(default)]
    pub connection: Connection,

    /// Governance metadata of the asset
    #[serde(default)]
    pub metadata: DatasetMetadata,

    /// Path in the secret store to the dataset credentials
    #[serde(default)]
    pub vault_secret_path: String,
}

// =============================================================================
// Policy Types
// =============================================================================

/// Operation a policy decision is requested for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Read,
    Copy,
    Write,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationType::Read => write!(f, "read"),
            OperationType::Copy => write!(f, "copy"),
            OperationType::Write => write!(f, "write"),
        }
    }
}

/// An enforcement action returned by the policy manager
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementAction {
    /// Action identifier; `allow` and `deny` are reserved, every other id
    /// names a transform the chosen module must support
    pub id: String,

    /// Granularity the action applies at
    #[serde(default)]
    pub level: ActionLevel,

    /// Action parameters (e.g. column names)
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

impl EnforcementAction {
    pub fn allow() -> Self {
        Self {
            id: ACTION_ALLOW.to_string(),
            ..Default::default()
        }
    }

    pub fn deny() -> Self {
        Self {
            id: ACTION_DENY.to_string(),
            ..Default::default()
        }
    }

    /// Whether this action forbids the operation
    pub fn is_deny(&self) -> bool {
        self.id == ACTION_DENY
    }

    /// Whether this action requires a module-side transformation
    pub fn is_transform(&self) -> bool {
        self.id != ACTION_ALLOW && self.id != ACTION_DENY
    }
}

/// Purpose context of a policy request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub role: String,
}

/// Operation context of a policy request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestAction {
    /// Operation the decision is requested for
    pub action_type: OperationType,

    /// Geography where the operation takes place
    #[serde(default)]
    pub processing_location: String,
}

/// Resource context of a policy request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResource {
    /// Dataset identifier
    pub name: String,

    /// Governance metadata of the dataset
    #[serde(default)]
    pub metadata: DatasetMetadata,
}

/// Request for policy decisions on one dataset operation. The resource
/// field is mandatory; the policy manager schema rejects requests
/// without it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecisionsRequest {
    #[serde(default)]
    pub request_context: RequestContext,
    pub action: RequestAction,
    pub resource: RequestResource,
}

// =============================================================================
// Cluster Types
// =============================================================================

/// A cluster available for running module instances
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Cluster name, used as the blueprint key
    pub name: String,

    /// Region the cluster runs in
    #[serde(default)]
    pub region: String,
}

// =============================================================================
// Storage Types
// =============================================================================

/// Bucket to be provisioned for a dataset copy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedBucket {
    /// Bucket name
    pub name: String,

    /// S3 endpoint of the storage account
    #[serde(default)]
    pub endpoint: String,

    /// Secret containing the account credentials
    #[serde(default)]
    pub secret_ref: NamespacedName,
}

/// Provisioning progress reported by the storage backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedStorageStatus {
    /// The bucket exists and is usable
    #[serde(default)]
    pub provisioned: bool,

    /// Error reported by the backend, empty when none
    #[serde(default)]
    pub error_msg: String,
}

// =============================================================================
// Data Catalog Port
// =============================================================================

/// Port for resolving and registering datasets in a data catalog
#[async_trait]
pub trait DataCatalog: Send + Sync {
    /// Resolve a dataset id into its catalog metadata. The credential
    /// path points into the secret store; raw credentials never cross
    /// this boundary.
    async fn dataset_info(&self, dataset_id: &str, credential_path: &str) -> Result<DataDetails>;

    /// Register a materialized copy as a new asset, returning its id
    async fn register_dataset(
        &self,
        catalog_id: &str,
        bucket: &ProvisionedBucket,
        metadata: &DatasetMetadata,
    ) -> Result<String>;
}

// =============================================================================
// Policy Manager Port
// =============================================================================

/// Port for obtaining governance decisions
#[async_trait]
pub trait PolicyManager: Send + Sync {
    /// Enforcement actions for one dataset operation. Order is not
    /// significant; (id, level) pairs are preserved exactly.
    async fn get_policy_decisions(
        &self,
        request: &PolicyDecisionsRequest,
    ) -> Result<Vec<EnforcementAction>>;
}

// =============================================================================
// Cluster Lister Port
// =============================================================================

/// Port for enumerating available clusters
#[async_trait]
pub trait ClusterLister: Send + Sync {
    async fn list_clusters(&self) -> Result<Vec<Cluster>>;
}

// =============================================================================
// Storage Provisioner Port
// =============================================================================

/// Port for managing dynamically allocated buckets
#[async_trait]
pub trait StorageProvisioner: Send + Sync {
    /// Allocate a bucket. Idempotent: an existing matching allocation is
    /// a no-op, a differing one is deleted and recreated.
    async fn create_dataset(
        &self,
        reference: &NamespacedName,
        bucket: &ProvisionedBucket,
        owner: &NamespacedName,
    ) -> Result<()>;

    /// Delete the allocation; the backend honors the persistence label
    /// when deciding whether data is retained
    async fn delete_dataset(&self, reference: &NamespacedName) -> Result<()>;

    /// Report backend provisioning progress
    async fn dataset_status(&self, reference: &NamespacedName) -> Result<ProvisionedStorageStatus>;

    /// Detach (or re-attach) the bucket lifecycle from the application
    async fn set_persistent(&self, reference: &NamespacedName, persistent: bool) -> Result<()>;
}

// =============================================================================
// Registry Ports
// =============================================================================

/// Port for enumerating installed modules
#[async_trait]
pub trait ModuleRegistry: Send + Sync {
    /// Installed modules keyed by name; key order drives selection order
    async fn list_modules(&self) -> Result<BTreeMap<String, DataModule>>;
}

/// Port for enumerating storage accounts available for copies
#[async_trait]
pub trait StorageAccountLister: Send + Sync {
    async fn list_accounts(&self) -> Result<Vec<StorageAccount>>;
}

// =============================================================================
// Plotter Service Port
// =============================================================================

/// Port for managing the generated plotter resource
#[async_trait]
pub trait PlotterService: Send + Sync {
    /// Whether the referenced plotter exists
    async fn exists(&self, reference: &ResourceReference) -> bool;

    /// Create the plotter or update it in place. Implementations diff
    /// against the existing blueprints and no-op on semantic equality.
    async fn create_or_update(
        &self,
        owner: &NamespacedName,
        reference: &ResourceReference,
        blueprints: BTreeMap<String, crate::crd::BlueprintSpec>,
    ) -> Result<()>;

    /// Delete the plotter
    async fn delete(&self, reference: &ResourceReference) -> Result<()>;

    /// State observed by the plan runner
    async fn observed_state(&self, reference: &ResourceReference) -> Result<ObservedState>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type DataCatalogRef = Arc<dyn DataCatalog>;
pub type PolicyManagerRef = Arc<dyn PolicyManager>;
pub type ClusterListerRef = Arc<dyn ClusterLister>;
pub type StorageProvisionerRef = Arc<dyn StorageProvisioner>;
pub type ModuleRegistryRef = Arc<dyn ModuleRegistry>;
pub type StorageAccountListerRef = Arc<dyn StorageAccountLister>;
pub type PlotterServiceRef = Arc<dyn PlotterService>;
