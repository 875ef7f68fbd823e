//! Per-dataset planning
//!
//! For every dataset the module manager decides whether a copy is
//! required, selects a storage account for the copy under governance,
//! provisions a bucket, and composes the copy + read module chain.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::ControllerConfig;
use crate::crd::{
    CapabilityType, CopyArgs, DataApplication, DataModule, DataStore, InterfaceDetails,
    ModuleArguments, ReadArgs, StepAction, StorageAccount, PROTOCOL_S3,
};
use crate::domain::ports::{
    Cluster, Connection, EnforcementAction, NamespacedName, OperationType, PolicyDecisionsRequest,
    PolicyManagerRef, ProvisionedBucket, RequestAction, RequestContext, RequestResource,
    StorageProvisionerRef,
};
use crate::error::{Error, Result};

use super::selector::{DataInfo, ModuleInstanceSpec, ModuleSelector};

// =============================================================================
// Provisioned Asset Info
// =============================================================================

/// A bucket allocated during planning, together with the destination
/// store the copy materializes into
#[derive(Debug, Clone)]
pub struct NewAssetInfo {
    /// The provisioned bucket
    pub storage: ProvisionedBucket,
    /// Destination store wired into the copy step
    pub details: DataStore,
}

// =============================================================================
// Module Manager
// =============================================================================

/// Selects module instances for the datasets of one application
pub struct ModuleManager {
    /// Installed modules, iterated in name order
    pub modules: BTreeMap<String, DataModule>,
    /// Available clusters
    pub clusters: Vec<Cluster>,
    /// Storage accounts available as copy destinations
    pub accounts: Vec<StorageAccount>,
    /// Policy manager consulted per operation
    pub policy: PolicyManagerRef,
    /// Bucket provisioner
    pub provision: StorageProvisionerRef,
    /// Owning application, used to label provisioned resources
    pub owner: NamespacedName,
    /// Controller configuration
    pub config: ControllerConfig,
    /// Buckets required by the current plan, keyed by dataset id
    pub provisioned_storage: BTreeMap<String, NewAssetInfo>,
}

impl ModuleManager {
    /// Plan the module chain for a single dataset.
    ///
    /// Returns the instances for the copy step (when one is needed), the
    /// read step, and their dependency closures.
    pub async fn select_module_instances(
        &mut self,
        item: &DataInfo,
        app: &DataApplication,
    ) -> Result<Vec<ModuleInstanceSpec>> {
        let asset_id = item.context.data_set_id.clone();
        let processing_geo = self.processing_geography(app);
        debug!(asset = %asset_id, geography = %processing_geo, "planning dataset");

        // Governance decisions for serving the data to the workload
        let read_actions = self
            .policy_decisions(item, app, OperationType::Read, &processing_geo)
            .await?;
        if read_actions.iter().any(EnforcementAction::is_deny) {
            return Err(Error::ReadAccessDenied);
        }
        let read_transforms: Vec<EnforcementAction> = read_actions
            .into_iter()
            .filter(EnforcementAction::is_transform)
            .collect();

        // Ingest mode: no workload, the data is materialized and nothing
        // is served
        if !app.has_workload() {
            if !item.context.requirements.copy.required {
                return Err(Error::Configuration(format!(
                    "dataset {asset_id} declares neither a workload nor a copy requirement"
                )));
            }
            let requested = item.context.requirements.interface.clone();
            let (instances, _) = self
                .plan_copy(item, app, &processing_geo, &requested, &read_transforms)
                .await?;
            return Ok(instances);
        }

        let requested = item.context.requirements.interface.clone();
        let copy_requested = item.context.requirements.copy.required;
        let same_geography = item.data_details.geography == processing_geo;

        // Serve in place when permitted: the source interface is directly
        // consumable, the data does not cross regions, and every
        // transformation can be applied while serving
        if !copy_requested && same_geography {
            let mut selector = ModuleSelector::new(
                CapabilityType::Read,
                Some(item.data_details.interface.clone()),
                Some(requested.clone()),
                read_transforms.clone(),
                &processing_geo,
            );
            if selector.select(&self.modules) {
                let cluster =
                    selector.select_cluster(&item.data_details.geography, &self.clusters)?;
                let args = read_arguments(
                    &asset_id,
                    source_store(item),
                    step_actions(&read_transforms),
                );
                info!(asset = %asset_id, cluster = %cluster, "read in place");
                return Ok(selector.module_instances(args, &asset_id, &cluster));
            }
        }

        // A copy is required. The copy absorbs the read-side transforms;
        // the read module serves the materialized data as-is.
        self.plan_copy_and_read(item, app, &processing_geo, &requested, &read_transforms)
            .await
    }

    /// Plan a copy followed by a read of the materialized data
    async fn plan_copy_and_read(
        &mut self,
        item: &DataInfo,
        app: &DataApplication,
        processing_geo: &str,
        requested: &InterfaceDetails,
        read_transforms: &[EnforcementAction],
    ) -> Result<Vec<ModuleInstanceSpec>> {
        let asset_id = &item.context.data_set_id;

        // Sink candidates come from the read modules able to serve the
        // requested interface out of object storage
        let mut sink_candidates: Vec<InterfaceDetails> = Vec::new();
        for module in self.modules.values() {
            for cap in module.capabilities_of(CapabilityType::Read) {
                let api_matches = cap
                    .api
                    .as_ref()
                    .map(|api| api.interface() == *requested)
                    .unwrap_or(false);
                if !api_matches {
                    continue;
                }
                for inout in &cap.supported_interfaces {
                    if let Some(source) = &inout.source {
                        if source.protocol == PROTOCOL_S3 && !sink_candidates.contains(source) {
                            sink_candidates.push(source.clone());
                        }
                    }
                }
            }
        }
        if sink_candidates.is_empty() {
            return Err(Error::ModuleNotFound {
                capability: CapabilityType::Read.to_string(),
                reason: String::new(),
            });
        }

        let mut last_not_found: Option<Error> = None;
        for sink in sink_candidates {
            // Resolve the read side first; a bucket is provisioned only
            // once the full module chain is known to exist
            let mut read_selector = ModuleSelector::new(
                CapabilityType::Read,
                Some(sink.clone()),
                Some(requested.clone()),
                vec![],
                processing_geo,
            );
            if !read_selector.select(&self.modules) {
                last_not_found = Some(read_selector.not_found());
                continue;
            }
            let read_cluster =
                read_selector.select_cluster(&item.data_details.geography, &self.clusters)?;

            let (copy_instances, destination) = match self
                .plan_copy(item, app, processing_geo, &sink, read_transforms)
                .await
            {
                Ok(planned) => planned,
                Err(err @ Error::ModuleNotFound { .. }) => {
                    last_not_found = Some(err);
                    continue;
                }
                Err(err) => return Err(err),
            };

            // The read consumes the copy destination, not the catalog source
            let read_args = read_arguments(asset_id, destination, vec![]);

            let mut instances = copy_instances;
            instances.extend(read_selector.module_instances(read_args, asset_id, &read_cluster));
            return Ok(instances);
        }

        // No copy module bridges the source to any readable sink
        Err(last_not_found.unwrap_or(Error::ModuleNotFound {
            capability: CapabilityType::Copy.to_string(),
            reason: String::new(),
        }))
    }

    /// Plan the copy step alone: pick a storage account under policy,
    /// provision a bucket and select the copy module
    async fn plan_copy(
        &mut self,
        item: &DataInfo,
        app: &DataApplication,
        processing_geo: &str,
        sink: &InterfaceDetails,
        read_transforms: &[EnforcementAction],
    ) -> Result<(Vec<ModuleInstanceSpec>, DataStore)> {
        let asset_id = &item.context.data_set_id;

        // Governance decisions for the copy operation itself, issued at
        // the geography of the source
        let copy_decisions = self
            .policy_decisions(item, app, OperationType::Copy, &item.data_details.geography)
            .await?;
        if copy_decisions.iter().any(EnforcementAction::is_deny) {
            return Err(Error::CopyNotAllowed);
        }

        let (account, copy_actions) = self.select_storage_account(item, app).await?;
        info!(asset = %asset_id, account = %account.name(), region = %account.spec.region,
            "selected storage account for copy");

        // The copy module enforces the read-side transforms together with
        // the copy- and write-side actions of the chosen region
        let mut actions: Vec<EnforcementAction> = read_transforms.to_vec();
        for action in copy_decisions
            .into_iter()
            .filter(EnforcementAction::is_transform)
            .chain(copy_actions)
        {
            if !actions.contains(&action) {
                actions.push(action);
            }
        }

        let mut selector = ModuleSelector::new(
            CapabilityType::Copy,
            Some(item.data_details.interface.clone()),
            Some(sink.clone()),
            actions.clone(),
            processing_geo,
        );
        if !selector.select(&self.modules) {
            return Err(selector.not_found());
        }
        let cluster = selector.select_cluster(&item.data_details.geography, &self.clusters)?;

        let bucket = self.allocate_bucket(item, app, &account).await?;
        let destination = destination_store(&bucket, &account, sink, &self.config);
        self.provisioned_storage.insert(
            asset_id.clone(),
            NewAssetInfo {
                storage: bucket,
                details: destination.clone(),
            },
        );

        let args = ModuleArguments {
            copy: Some(CopyArgs {
                asset_id: asset_id.clone(),
                source: source_store(item),
                destination: destination.clone(),
                transformations: step_actions(&actions),
            }),
            ..Default::default()
        };
        info!(asset = %asset_id, cluster = %cluster, module = %selector.module().map(DataModule::name).unwrap_or_default(),
            "copy planned");
        Ok((selector.module_instances(args, asset_id, &cluster), destination))
    }

    /// Pick the first storage account whose region is permitted by the
    /// write policies for this dataset
    async fn select_storage_account(
        &self,
        item: &DataInfo,
        app: &DataApplication,
    ) -> Result<(StorageAccount, Vec<EnforcementAction>)> {
        for account in &self.accounts {
            let decisions = self
                .policy_decisions(item, app, OperationType::Write, &account.spec.region)
                .await?;
            if decisions.iter().any(EnforcementAction::is_deny) {
                debug!(account = %account.name(), region = %account.spec.region,
                    "storage region forbidden by policy");
                continue;
            }
            let transforms = decisions
                .into_iter()
                .filter(EnforcementAction::is_transform)
                .collect();
            return Ok((account.clone(), transforms));
        }
        if item.context.requirements.copy.required {
            Err(Error::CopyNotAllowed)
        } else {
            Err(Error::StorageNotAllowed)
        }
    }

    /// Provision the bucket backing a dataset copy
    async fn allocate_bucket(
        &self,
        item: &DataInfo,
        app: &DataApplication,
        account: &StorageAccount,
    ) -> Result<ProvisionedBucket> {
        let name = bucket_name(
            app.namespace_or_default(),
            app.name(),
            &item.context.data_set_id,
        );
        let bucket = ProvisionedBucket {
            name: name.clone(),
            endpoint: account.spec.endpoint.clone(),
            secret_ref: NamespacedName::new(
                &account.spec.secret_ref,
                &self.config.control_plane_namespace,
            ),
        };
        let reference = NamespacedName::new(&name, &self.config.control_plane_namespace);
        self.provision
            .create_dataset(&reference, &bucket, &self.owner)
            .await?;
        Ok(bucket)
    }

    /// Geography where the workload processes the data
    fn processing_geography(&self, app: &DataApplication) -> String {
        if app.has_workload() {
            let workload_cluster = &app.spec.selector.cluster_name;
            if let Some(cluster) = self.clusters.iter().find(|c| &c.name == workload_cluster) {
                return cluster.region.clone();
            }
        }
        self.config.default_region.clone()
    }

    async fn policy_decisions(
        &self,
        item: &DataInfo,
        app: &DataApplication,
        operation: OperationType,
        location: &str,
    ) -> Result<Vec<EnforcementAction>> {
        let request = PolicyDecisionsRequest {
            request_context: RequestContext {
                intent: app.spec.app_info.intent.clone(),
                role: app.spec.app_info.role.clone(),
            },
            action: RequestAction {
                action_type: operation,
                processing_location: location.to_string(),
            },
            resource: RequestResource {
                name: item.context.data_set_id.clone(),
                metadata: item.data_details.metadata.clone(),
            },
        };
        self.policy.get_policy_decisions(&request).await
    }
}

// =============================================================================
// Argument Builders
// =============================================================================

/// Store the data is read or copied from, as described by the catalog
fn source_store(item: &DataInfo) -> DataStore {
    DataStore {
        connection: serde_json::to_value(&item.data_details.connection)
            .unwrap_or(serde_json::Value::Null),
        format: item.data_details.interface.data_format.clone(),
        vault_secret_path: item.vault_secret_path.clone(),
    }
}

/// Store a copy is materialized into
fn destination_store(
    bucket: &ProvisionedBucket,
    account: &StorageAccount,
    sink: &InterfaceDetails,
    config: &ControllerConfig,
) -> DataStore {
    let connection = Connection::S3 {
        endpoint: account.spec.endpoint.clone(),
        bucket: bucket.name.clone(),
        object_key: format!("data.{}", sink.data_format),
    };
    DataStore {
        connection: serde_json::to_value(&connection).unwrap_or(serde_json::Value::Null),
        format: sink.data_format.clone(),
        vault_secret_path: crate::vault::credential_path(
            &config.vault_address,
            &bucket.secret_ref.namespace,
            &bucket.secret_ref.name,
        ),
    }
}

fn read_arguments(asset_id: &str, source: DataStore, transformations: Vec<StepAction>) -> ModuleArguments {
    ModuleArguments {
        read: vec![ReadArgs {
            asset_id: asset_id.to_string(),
            source,
            transformations,
        }],
        ..Default::default()
    }
}

/// Enforcement actions in the form passed to module instances
pub fn step_actions(actions: &[EnforcementAction]) -> Vec<StepAction> {
    actions
        .iter()
        .map(|action| StepAction {
            id: action.id.clone(),
            level: action.level.to_string(),
            args: action.args.clone(),
        })
        .collect()
}

// =============================================================================
// Bucket Naming
// =============================================================================

/// Deterministic bucket name for a dataset copy. Stable across restarts
/// and generations so that provisioning stays idempotent.
pub fn bucket_name(app_namespace: &str, app_name: &str, dataset_id: &str) -> String {
    let digest = Sha256::digest(format!("{app_namespace}/{app_name}/{dataset_id}").as_bytes());
    let suffix: String = digest
        .iter()
        .take(5)
        .map(|byte| format!("{byte:02x}"))
        .collect();
    let prefix: String = app_name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .take(52)
        .collect();
    format!("{}-{}", prefix.trim_matches('-'), suffix)
}
