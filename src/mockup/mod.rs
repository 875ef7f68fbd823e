//! In-memory collaborators for tests
//!
//! Mock implementations of every port together with fixture builders
//! for modules, storage accounts and applications. The mock catalog and
//! policy manager derive their behavior from the dataset id, so tests
//! pick scenarios simply by naming datasets.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

use crate::crd::application::{
    CatalogRequirements, CopyRequirements, DataApplicationSpec, DataContext, DataRequirements,
    WorkloadSelector,
};
use crate::crd::{
    ActionLevel, AppInfo, BlueprintSpec, ChartSpec, CapabilityType, DataApplication, DataModule,
    DataModuleSpec, EndpointSpec, InterfaceDetails, ModuleAction, ModuleApi, ModuleCapability,
    ModuleInOut, ObservedState, Plotter, PlotterSpec, PlotterStatus, ResourceReference,
    StorageAccount, StorageAccountSpec, FORMAT_ARROW, FORMAT_CSV, FORMAT_JSON, FORMAT_PARQUET,
    FORMAT_TABLE, PROTOCOL_ARROW_FLIGHT, PROTOCOL_JDBC_DB2, PROTOCOL_KAFKA, PROTOCOL_S3,
};
use crate::domain::ports::{
    Cluster, ClusterLister, Connection, DataCatalog, DataDetails, DatasetMetadata,
    EnforcementAction, ModuleRegistry, NamespacedName, PlotterService, PolicyDecisionsRequest,
    PolicyManager, ProvisionedBucket, ProvisionedStorageStatus, StorageAccountLister,
    StorageProvisioner, OperationType,
};
use crate::error::{Error, Result};

// =============================================================================
// Mock Data Catalog
// =============================================================================

/// Catalog fake: the id prefix picks the backing store, the suffix is
/// free-form and drives the policy fake. `s3-external/` datasets live in
/// a remote geography.
#[derive(Default)]
pub struct MockDataCatalog {
    registered: Mutex<Vec<String>>,
}

impl MockDataCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asset ids registered through this catalog
    pub fn registered(&self) -> Vec<String> {
        self.registered.lock().clone()
    }
}

#[async_trait]
impl DataCatalog for MockDataCatalog {
    async fn dataset_info(&self, dataset_id: &str, _credential_path: &str) -> Result<DataDetails> {
        let (store, rest) = dataset_id.split_once('/').unwrap_or((dataset_id, ""));
        let details = match store {
            "s3" | "s3-csv" | "s3-external" => {
                let format = if rest.contains("csv") || store != "s3" {
                    FORMAT_CSV
                } else {
                    FORMAT_PARQUET
                };
                let geography = if store == "s3-external" {
                    "neverland"
                } else {
                    "theshire"
                };
                DataDetails {
                    name: rest.to_string(),
                    interface: InterfaceDetails::new(PROTOCOL_S3, format),
                    geography: geography.to_string(),
                    connection: Connection::S3 {
                        endpoint: format!("http://s3.{geography}.example.com"),
                        bucket: "source-data".to_string(),
                        object_key: format!("{rest}.{format}"),
                    },
                    metadata: dataset_metadata(rest),
                    vault_secret_path: format!("/v1/secret/{dataset_id}"),
                }
            }
            "db2" => DataDetails {
                name: rest.to_string(),
                interface: InterfaceDetails::new(PROTOCOL_JDBC_DB2, FORMAT_TABLE),
                geography: "theshire".to_string(),
                connection: Connection::Db2 {
                    url: "jdbc:db2://db2.theshire.example.com".to_string(),
                    database: "BLUDB".to_string(),
                    table: rest.to_uppercase(),
                    port: 50000,
                    ssl: true,
                },
                metadata: dataset_metadata(rest),
                vault_secret_path: format!("/v1/secret/{dataset_id}"),
            },
            "kafka" => DataDetails {
                name: rest.to_string(),
                interface: InterfaceDetails::new(PROTOCOL_KAFKA, FORMAT_JSON),
                geography: "theshire".to_string(),
                connection: Connection::Kafka {
                    topic_name: rest.to_string(),
                    bootstrap_servers: "kafka.theshire.example.com:9092".to_string(),
                    schema_registry: String::new(),
                },
                metadata: dataset_metadata(rest),
                vault_secret_path: format!("/v1/secret/{dataset_id}"),
            },
            _ => return Err(Error::InvalidAssetID),
        };
        Ok(details)
    }

    async fn register_dataset(
        &self,
        catalog_id: &str,
        bucket: &ProvisionedBucket,
        _metadata: &DatasetMetadata,
    ) -> Result<String> {
        let new_asset_id = format!("{catalog_id}/{}", bucket.name);
        self.registered.lock().push(new_asset_id.clone());
        Ok(new_asset_id)
    }
}

fn dataset_metadata(name: &str) -> DatasetMetadata {
    let mut metadata = DatasetMetadata::default();
    if name.contains("redact") {
        metadata.tags.push("PI".to_string());
        metadata
            .components_metadata
            .insert("nameOrig".to_string(), vec!["PI".to_string()]);
        metadata
            .components_metadata
            .insert("nameDest".to_string(), vec!["PI".to_string()]);
    }
    metadata
}

// =============================================================================
// Mock Policy Manager
// =============================================================================

/// Regions served by the mock cluster lister
const KNOWN_REGIONS: [&str; 2] = ["theshire", "neverland"];

/// Policy fake keyed by the dataset name:
/// - a name containing `deny-dataset` denies read access;
/// - a name containing `redact` requires column redaction;
/// - `allow-<region>`, for a known region, permits writes only there;
/// - `deny-<region>`, for a known region, forbids writes there.
///
/// The region rules apply only to the known regions, so generic ids
/// like `allow-dataset` carry no write restrictions.
#[derive(Default)]
pub struct MockPolicyManager;

impl MockPolicyManager {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PolicyManager for MockPolicyManager {
    async fn get_policy_decisions(
        &self,
        request: &PolicyDecisionsRequest,
    ) -> Result<Vec<EnforcementAction>> {
        if request.resource.name.is_empty() {
            return Err(Error::InvalidPolicyRequest(
                "the request must carry a resource".to_string(),
            ));
        }
        let name = request.resource.name.as_str();
        let location = request.action.processing_location.as_str();

        let actions = match request.action.action_type {
            OperationType::Read => {
                if name.contains("deny-dataset") {
                    vec![EnforcementAction::deny()]
                } else if name.contains("redact") {
                    vec![redact_action()]
                } else {
                    vec![EnforcementAction::allow()]
                }
            }
            OperationType::Copy => {
                if name.contains("redact") {
                    vec![redact_action()]
                } else {
                    vec![EnforcementAction::allow()]
                }
            }
            OperationType::Write => {
                let asset = name.split('/').last().unwrap_or(name);
                let denied = match asset.split_once('-') {
                    Some(("deny", region)) if KNOWN_REGIONS.contains(&region) => {
                        region == location
                    }
                    Some(("allow", region)) if KNOWN_REGIONS.contains(&region) => {
                        region != location
                    }
                    _ => false,
                };
                if denied {
                    vec![EnforcementAction::deny()]
                } else {
                    vec![EnforcementAction::allow()]
                }
            }
        };
        Ok(actions)
    }
}

fn redact_action() -> EnforcementAction {
    EnforcementAction {
        id: "redact".to_string(),
        level: ActionLevel::Column,
        args: BTreeMap::from([("columns".to_string(), "nameOrig, nameDest".to_string())]),
    }
}

// =============================================================================
// Mock Cluster Lister
// =============================================================================

/// Two-region topology used throughout the tests
#[derive(Default)]
pub struct MockClusterLister;

impl MockClusterLister {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ClusterLister for MockClusterLister {
    async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        Ok(vec![
            Cluster {
                name: "thegreendragon".to_string(),
                region: "theshire".to_string(),
            },
            Cluster {
                name: "thequietman".to_string(),
                region: "neverland".to_string(),
            },
        ])
    }
}

// =============================================================================
// In-Memory Provisioner
// =============================================================================

/// Storage provisioner fake tracking allocations, deletions and
/// persistence flips
#[derive(Default)]
pub struct InMemoryProvisioner {
    datasets: Mutex<BTreeMap<String, ProvisionedBucket>>,
    persistent: Mutex<BTreeSet<String>>,
    deleted: Mutex<Vec<String>>,
}

impl InMemoryProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the currently allocated buckets
    pub fn allocated(&self) -> Vec<String> {
        self.datasets.lock().keys().cloned().collect()
    }

    /// Names of buckets that have been deleted
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    /// Whether the bucket is marked persistent
    pub fn is_persistent(&self, name: &str) -> bool {
        self.persistent.lock().contains(name)
    }
}

#[async_trait]
impl StorageProvisioner for InMemoryProvisioner {
    async fn create_dataset(
        &self,
        reference: &NamespacedName,
        bucket: &ProvisionedBucket,
        _owner: &NamespacedName,
    ) -> Result<()> {
        self.datasets
            .lock()
            .insert(reference.name.clone(), bucket.clone());
        Ok(())
    }

    async fn delete_dataset(&self, reference: &NamespacedName) -> Result<()> {
        if self.datasets.lock().remove(&reference.name).is_none() {
            return Err(Error::ResourceNotFound {
                kind: "Dataset".to_string(),
                name: reference.name.clone(),
            });
        }
        self.deleted.lock().push(reference.name.clone());
        Ok(())
    }

    async fn dataset_status(&self, reference: &NamespacedName) -> Result<ProvisionedStorageStatus> {
        if self.datasets.lock().contains_key(&reference.name) {
            Ok(ProvisionedStorageStatus {
                provisioned: true,
                error_msg: String::new(),
            })
        } else {
            Err(Error::ResourceNotFound {
                kind: "Dataset".to_string(),
                name: reference.name.clone(),
            })
        }
    }

    async fn set_persistent(&self, reference: &NamespacedName, persistent: bool) -> Result<()> {
        if !self.datasets.lock().contains_key(&reference.name) {
            return Err(Error::ResourceNotFound {
                kind: "Dataset".to_string(),
                name: reference.name.clone(),
            });
        }
        if persistent {
            self.persistent.lock().insert(reference.name.clone());
        } else {
            self.persistent.lock().remove(&reference.name);
        }
        Ok(())
    }
}

// =============================================================================
// In-Memory Plotter Service
// =============================================================================

/// Plotter store fake; tests flip the observed state to simulate the
/// plan runner
#[derive(Default)]
pub struct InMemoryPlotterService {
    plotters: Mutex<BTreeMap<String, Plotter>>,
}

impl InMemoryPlotterService {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(reference: &ResourceReference) -> String {
        format!("{}/{}", reference.namespace, reference.name)
    }

    /// Snapshot of a stored plotter
    pub fn get(&self, reference: &ResourceReference) -> Option<Plotter> {
        self.plotters.lock().get(&Self::key(reference)).cloned()
    }

    /// Simulate the plan runner reporting progress
    pub fn set_observed_state(&self, reference: &ResourceReference, state: ObservedState) {
        if let Some(plotter) = self.plotters.lock().get_mut(&Self::key(reference)) {
            plotter.status = Some(PlotterStatus {
                observed_state: state,
            });
        }
    }
}

#[async_trait]
impl PlotterService for InMemoryPlotterService {
    async fn exists(&self, reference: &ResourceReference) -> bool {
        self.plotters.lock().contains_key(&Self::key(reference))
    }

    async fn create_or_update(
        &self,
        owner: &NamespacedName,
        reference: &ResourceReference,
        blueprints: BTreeMap<String, BlueprintSpec>,
    ) -> Result<()> {
        let mut plotters = self.plotters.lock();
        let key = Self::key(reference);
        if let Some(existing) = plotters.get_mut(&key) {
            if existing.spec.blueprints == blueprints {
                return Ok(());
            }
            existing.spec.blueprints = blueprints;
            return Ok(());
        }
        let mut plotter = Plotter::new(&reference.name, PlotterSpec { blueprints });
        plotter.metadata.namespace = Some(reference.namespace.clone());
        plotter.metadata.labels = Some(crate::controller::resources::owner_labels(owner));
        plotters.insert(key, plotter);
        Ok(())
    }

    async fn delete(&self, reference: &ResourceReference) -> Result<()> {
        if self.plotters.lock().remove(&Self::key(reference)).is_none() {
            return Err(Error::ResourceNotFound {
                kind: "Plotter".to_string(),
                name: reference.name.clone(),
            });
        }
        Ok(())
    }

    async fn observed_state(&self, reference: &ResourceReference) -> Result<ObservedState> {
        let plotters = self.plotters.lock();
        let plotter = plotters
            .get(&Self::key(reference))
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Plotter".to_string(),
                name: reference.name.clone(),
            })?;
        Ok(plotter
            .status
            .as_ref()
            .map(|status| status.observed_state.clone())
            .unwrap_or_default())
    }
}

// =============================================================================
// In-Memory Registries
// =============================================================================

/// Module registry fake
#[derive(Default)]
pub struct InMemoryModuleRegistry {
    modules: Mutex<BTreeMap<String, DataModule>>,
}

impl InMemoryModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, module: DataModule) {
        self.modules
            .lock()
            .insert(module.name().to_string(), module);
    }
}

#[async_trait]
impl ModuleRegistry for InMemoryModuleRegistry {
    async fn list_modules(&self) -> Result<BTreeMap<String, DataModule>> {
        Ok(self.modules.lock().clone())
    }
}

/// Storage account lister fake
#[derive(Default)]
pub struct InMemoryAccountLister {
    accounts: Mutex<Vec<StorageAccount>>,
}

impl InMemoryAccountLister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, account: StorageAccount) {
        self.accounts.lock().push(account);
    }
}

#[async_trait]
impl StorageAccountLister for InMemoryAccountLister {
    async fn list_accounts(&self) -> Result<Vec<StorageAccount>> {
        Ok(self.accounts.lock().clone())
    }
}

// =============================================================================
// Fixture Builders
// =============================================================================

/// Read module serving arrow-flight/arrow out of s3/parquet
pub fn module_read_parquet() -> DataModule {
    read_module(
        "module-read-parquet",
        InterfaceDetails::new(PROTOCOL_ARROW_FLIGHT, FORMAT_ARROW),
        InterfaceDetails::new(PROTOCOL_S3, FORMAT_PARQUET),
    )
}

/// Read module serving csv files directly out of object storage
pub fn module_read_csv() -> DataModule {
    read_module(
        "module-read-csv",
        InterfaceDetails::new(PROTOCOL_S3, FORMAT_CSV),
        InterfaceDetails::new(PROTOCOL_S3, FORMAT_CSV),
    )
}

fn read_module(name: &str, api: InterfaceDetails, source: InterfaceDetails) -> DataModule {
    let mut module = DataModule::new(
        name,
        DataModuleSpec {
            chart: ChartSpec {
                name: format!("registry.example.com/charts/{name}"),
                values: BTreeMap::new(),
            },
            dependencies: vec![],
            capabilities: vec![ModuleCapability {
                capability: Some(CapabilityType::Read),
                api: Some(ModuleApi {
                    protocol: api.protocol,
                    data_format: api.data_format,
                    endpoint: EndpointSpec {
                        hostname: String::new(),
                        port: 80,
                        scheme: "grpc".to_string(),
                    },
                }),
                supported_interfaces: vec![ModuleInOut {
                    source: Some(source),
                    sink: None,
                }],
                actions: vec![],
            }],
        },
    );
    module.metadata.namespace = Some("dataflow-system".to_string());
    module
}

/// Copy module moving db2 tables into s3/parquet, able to redact columns
pub fn copy_db2_parquet() -> DataModule {
    copy_module(
        "copy-db2-parquet",
        InterfaceDetails::new(PROTOCOL_JDBC_DB2, FORMAT_TABLE),
        InterfaceDetails::new(PROTOCOL_S3, FORMAT_PARQUET),
        vec![
            ModuleAction {
                id: "redact".to_string(),
                level: ActionLevel::Column,
            },
            ModuleAction {
                id: "remove-column".to_string(),
                level: ActionLevel::Column,
            },
        ],
    )
}

/// Copy module moving db2 tables into s3/parquet without any transforms
pub fn copy_db2_parquet_no_transforms() -> DataModule {
    copy_module(
        "copy-db2-parquet-no-transforms",
        InterfaceDetails::new(PROTOCOL_JDBC_DB2, FORMAT_TABLE),
        InterfaceDetails::new(PROTOCOL_S3, FORMAT_PARQUET),
        vec![],
    )
}

/// Batch copy module for csv and parquet files in object storage
pub fn implicit_copy_batch() -> DataModule {
    let mut module = copy_module(
        "implicit-copy-batch",
        InterfaceDetails::new(PROTOCOL_S3, FORMAT_CSV),
        InterfaceDetails::new(PROTOCOL_S3, FORMAT_CSV),
        vec![ModuleAction {
            id: "redact".to_string(),
            level: ActionLevel::Column,
        }],
    );
    module.spec.capabilities[0]
        .supported_interfaces
        .push(ModuleInOut {
            source: Some(InterfaceDetails::new(PROTOCOL_S3, FORMAT_CSV)),
            sink: Some(InterfaceDetails::new(PROTOCOL_S3, FORMAT_PARQUET)),
        });
    module
}

fn copy_module(
    name: &str,
    source: InterfaceDetails,
    sink: InterfaceDetails,
    actions: Vec<ModuleAction>,
) -> DataModule {
    let mut module = DataModule::new(
        name,
        DataModuleSpec {
            chart: ChartSpec {
                name: format!("registry.example.com/charts/{name}"),
                values: BTreeMap::new(),
            },
            dependencies: vec![],
            capabilities: vec![ModuleCapability {
                capability: Some(CapabilityType::Copy),
                api: None,
                supported_interfaces: vec![ModuleInOut {
                    source: Some(source),
                    sink: Some(sink),
                }],
                actions,
            }],
        },
    );
    module.metadata.namespace = Some("dataflow-system".to_string());
    module
}

/// Storage account in the workload region
pub fn account_theshire() -> StorageAccount {
    account("account-theshire", "theshire", "credentials-theshire")
}

/// Storage account in the remote region
pub fn account_neverland() -> StorageAccount {
    account("account-neverland", "neverland", "credentials-neverland")
}

fn account(name: &str, region: &str, secret: &str) -> StorageAccount {
    let mut account = StorageAccount::new(
        name,
        StorageAccountSpec {
            region: region.to_string(),
            endpoint: format!("http://s3.{region}.example.com"),
            secret_ref: secret.to_string(),
        },
    );
    account.metadata.namespace = Some("dataflow-system".to_string());
    account
}

/// Application reading one dataset through arrow-flight on the workload
/// cluster
pub fn data_usage_application(name: &str, dataset_id: &str) -> DataApplication {
    let mut app = DataApplication::new(
        name,
        DataApplicationSpec {
            selector: WorkloadSelector {
                cluster_name: "thegreendragon".to_string(),
                workload_selector: BTreeMap::from([(
                    "app".to_string(),
                    name.to_string(),
                )]),
            },
            app_info: AppInfo {
                intent: "fraud-detection".to_string(),
                role: "data-scientist".to_string(),
                properties: BTreeMap::new(),
            },
            data: vec![DataContext {
                data_set_id: dataset_id.to_string(),
                requirements: DataRequirements {
                    interface: InterfaceDetails::new(PROTOCOL_ARROW_FLIGHT, FORMAT_ARROW),
                    copy: CopyRequirements::default(),
                },
            }],
            secret_ref: String::new(),
        },
    );
    app.metadata.namespace = Some("default".to_string());
    app.metadata.generation = Some(1);
    app
}

/// Application requesting an explicit csv copy next to its workload
pub fn copy_application_csv(name: &str) -> DataApplication {
    let mut app = data_usage_application(name, "s3/csv-dataset");
    app.spec.data[0].requirements = DataRequirements {
        interface: InterfaceDetails::new(PROTOCOL_S3, FORMAT_CSV),
        copy: CopyRequirements {
            required: true,
            catalog: CatalogRequirements::default(),
        },
    };
    app
}

/// Ingest application: copy only, no workload
pub fn ingest_application(name: &str, dataset_id: &str) -> DataApplication {
    let mut app = data_usage_application(name, dataset_id);
    app.spec.selector = WorkloadSelector::default();
    app.spec.data[0].requirements = DataRequirements {
        interface: InterfaceDetails::new(PROTOCOL_S3, FORMAT_CSV),
        copy: CopyRequirements {
            required: true,
            catalog: CatalogRequirements {
                catalog_id: "ingest-catalog".to_string(),
            },
        },
    };
    app
}
