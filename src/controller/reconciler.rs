//! Application reconciliation
//!
//! Drives the lifecycle of a DataApplication: detects spec changes,
//! invokes the planner, mirrors the plotter's observed state back into
//! the application status and tears down external resources on deletion.
//! The Kubernetes wiring lives in the runtime module; everything here
//! operates on the in-memory object and the collaborator ports.

use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::ControllerConfig;
use crate::crd::application::DatasetDetails;
use crate::crd::{DataApplication, ObservedState, ResourceReference};
use crate::domain::ports::{
    Connection, DataCatalogRef, ClusterListerRef, ModuleRegistryRef, NamespacedName,
    PlotterServiceRef, PolicyManagerRef, ProvisionedBucket, StorageAccountListerRef,
    StorageProvisionerRef,
};
use crate::error::{Error, Result};
use crate::vault;

use super::blueprint::{generate_blueprints, set_read_endpoints};
use super::planner::ModuleManager;
use super::selector::DataInfo;

/// Budget for a single catalog round trip
const CATALOG_TIMEOUT: Duration = Duration::from_secs(60);
/// Requeue interval while the application is not in a final state
const PENDING_REQUEUE: Duration = Duration::from_secs(10);

// =============================================================================
// Reconcile Outcome
// =============================================================================

/// What the control loop should do after a successful reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Wait for the next change event
    Done,
    /// Check back after the given interval
    RequeueAfter(Duration),
}

// =============================================================================
// Application Reconciler
// =============================================================================

/// Reconciles DataApplication resources
pub struct ApplicationReconciler {
    pub config: ControllerConfig,
    pub catalog: DataCatalogRef,
    pub policy: PolicyManagerRef,
    pub clusters: ClusterListerRef,
    pub provision: StorageProvisionerRef,
    pub modules: ModuleRegistryRef,
    pub accounts: StorageAccountListerRef,
    pub plotters: PlotterServiceRef,
}

impl ApplicationReconciler {
    /// Reconcile one application. The caller persists the mutated status
    /// afterwards, whether or not an error is returned.
    pub async fn reconcile(&self, app: &mut DataApplication) -> Result<ReconcileOutcome> {
        let generation = app.generation();
        let status = app.status.clone().unwrap_or_default();

        // Re-plan when the spec changed or the previous attempt did not
        // produce a plotter for this generation
        let generation_complete = match &status.generated {
            Some(generated) => {
                generated.app_version == generation && self.plotters.exists(generated).await
            }
            None => false,
        };

        if !generation_complete || status.observed_generation != generation {
            self.plan(app).await?;
            app.status_mut().observed_generation = generation;
        } else {
            // A plotter for the current generation exists; mirror its
            // observed state. Older plotters never reach this path.
            let generated = status.generated.clone().unwrap_or_default();
            let state = self.plotters.observed_state(&generated).await?;
            self.check_readiness(app, state).await?;
        }

        if app.status.as_ref().map(|s| s.in_final_state()).unwrap_or(false) {
            Ok(ReconcileOutcome::Done)
        } else {
            Ok(ReconcileOutcome::RequeueAfter(PENDING_REQUEUE))
        }
    }

    /// Produce a fresh plan for the current generation
    async fn plan(&self, app: &mut DataApplication) -> Result<()> {
        let generation = app.generation();
        let app_key = NamespacedName::new(app.name(), app.namespace_or_default());
        info!(application = %app_key, generation, "planning data flows");

        {
            let status = app.status_mut();
            status.reset_conditions();
            status.data_access_instructions.clear();
            status.read_endpoints_map.clear();
        }

        // Nothing to orchestrate without datasets
        if app.spec.data.is_empty() {
            self.delete_external_resources(app).await?;
            info!(application = %app_key, "no datasets specified, no plotter will be generated");
            app.status_mut().set_ready_condition("");
            return Ok(());
        }

        let clusters = self.clusters.list_clusters().await?;

        // Resolve every dataset through the catalog
        let mut requirements: Vec<DataInfo> = Vec::new();
        for context in app.spec.data.clone() {
            match self.construct_data_info(app, &context).await {
                Ok(info) => requirements.push(info),
                Err(err) if err.is_retryable() => return Err(err),
                Err(err) => analyze_error(app, &context.data_set_id, &err),
            }
        }
        if app.status_mut().error_or_deny() {
            return Ok(());
        }

        let modules = self.modules.list_modules().await?;
        let accounts = self.accounts.list_accounts().await?;

        let mut manager = ModuleManager {
            modules: modules.clone(),
            clusters,
            accounts,
            policy: self.policy.clone(),
            provision: self.provision.clone(),
            owner: app_key.clone(),
            config: self.config.clone(),
            provisioned_storage: BTreeMap::new(),
        };

        let mut instances = Vec::new();
        for item in &requirements {
            match manager.select_module_instances(item, app).await {
                Ok(per_dataset) => instances.extend(per_dataset),
                Err(err) if err.is_retryable() => return Err(err),
                Err(err) => analyze_error(app, &item.context.data_set_id, &err),
            }
        }

        // Every allocated bucket is recorded before bailing out on
        // per-dataset failures, so teardown and orphan collection can
        // always find it
        {
            let status = app.status_mut();
            for (dataset_id, info) in &manager.provisioned_storage {
                status.provisioned_storage.insert(
                    dataset_id.clone(),
                    DatasetDetails {
                        dataset_ref: info.storage.name.clone(),
                        secret_ref: info.storage.secret_ref.name.clone(),
                        details: serde_json::to_value(&info.details)?,
                    },
                );
            }
        }
        if app.status_mut().error_or_deny() {
            return Ok(());
        }

        // Drop buckets the new plan no longer needs
        let status = app.status_mut();
        let orphaned: Vec<String> = status
            .provisioned_storage
            .keys()
            .filter(|id| !manager.provisioned_storage.contains_key(*id))
            .cloned()
            .collect();
        for dataset_id in orphaned {
            if let Some(details) = status.provisioned_storage.remove(&dataset_id) {
                let reference = self.bucket_reference(&details.dataset_ref);
                if let Err(err) = self.provision.delete_dataset(&reference).await {
                    warn!(bucket = %details.dataset_ref, error = %err, "failed to delete orphaned bucket");
                }
            }
        }

        // All buckets must be provisioned before the plotter is written
        for (dataset_id, details) in app.status.clone().unwrap_or_default().provisioned_storage {
            let reference = self.bucket_reference(&details.dataset_ref);
            let bucket_status = self.provision.dataset_status(&reference).await?;
            if !bucket_status.provisioned {
                info!(asset = %dataset_id, bucket = %details.dataset_ref, "bucket not yet provisioned");
                if !bucket_status.error_msg.is_empty() {
                    return Err(Error::StorageProvisioningFailed(bucket_status.error_msg));
                }
                return Err(Error::StorageAllocationPending(details.dataset_ref));
            }
        }

        let blueprints = generate_blueprints(&instances, app);
        {
            let app_snapshot = app.clone();
            set_read_endpoints(
                app.status_mut(),
                &blueprints,
                &modules,
                &app_snapshot,
                &self.config.control_plane_namespace,
            );
        }

        let reference = self.plotter_reference(app);
        self.plotters
            .create_or_update(&app_key, &reference, blueprints)
            .await?;
        info!(application = %app_key, plotter = %reference.name, "created plotter successfully");
        app.status_mut().generated = Some(reference);
        Ok(())
    }

    /// Mirror the plotter's observed state into the application status
    async fn check_readiness(&self, app: &mut DataApplication, state: ObservedState) -> Result<()> {
        {
            let status = app.status_mut();
            status.reset_conditions();
            status.data_access_instructions.clear();
        }

        if !state.error.is_empty() {
            app.status_mut().set_error_condition("", &state.error);
            return Ok(());
        }
        if !state.ready {
            return Ok(());
        }

        // The plan is running; register materialized copies where requested
        for context in app.spec.data.clone() {
            let catalog_id = context.requirements.copy.catalog.catalog_id.clone();
            if catalog_id.is_empty() {
                continue;
            }
            let dataset_id = context.data_set_id.clone();
            if app
                .status
                .as_ref()
                .map(|s| s.cataloged_assets.contains_key(&dataset_id))
                .unwrap_or(false)
            {
                continue;
            }
            let Some(details) = app
                .status
                .as_ref()
                .and_then(|s| s.provisioned_storage.get(&dataset_id).cloned())
            else {
                return Err(Error::Internal(format!(
                    "no copy has been created for the asset {dataset_id} required to be registered"
                )));
            };

            let reference = self.bucket_reference(&details.dataset_ref);
            self.provision.set_persistent(&reference, true).await?;

            let bucket = bucket_from_details(&details, &self.config.control_plane_namespace);
            match self
                .catalog
                .register_dataset(&catalog_id, &bucket, &Default::default())
                .await
            {
                Ok(new_asset_id) => {
                    info!(asset = %dataset_id, new_asset = %new_asset_id, "registered copy in catalog");
                    app.status_mut()
                        .cataloged_assets
                        .insert(dataset_id, new_asset_id);
                }
                Err(err) => {
                    // A new attempt is made on the next requeue
                    warn!(asset = %dataset_id, error = %err, "error while registering an asset");
                    return Ok(());
                }
            }
        }

        let status = app.status_mut();
        status.set_ready_condition("");
        status.data_access_instructions = state.data_access_instructions;
        Ok(())
    }

    /// Tear down everything the controller allocated for the application.
    /// Buckets marked persistent survive; only their tombstones go away.
    pub async fn delete_external_resources(&self, app: &mut DataApplication) -> Result<()> {
        let mut deleted = Vec::new();
        let mut failures = Vec::new();
        let entries = app.status.clone().unwrap_or_default().provisioned_storage;
        for (dataset_id, details) in entries {
            let reference = self.bucket_reference(&details.dataset_ref);
            match self.provision.delete_dataset(&reference).await {
                Ok(()) => deleted.push(dataset_id),
                Err(err) => failures.push(err.to_string()),
            }
        }
        {
            let status = app.status_mut();
            for dataset_id in deleted {
                status.provisioned_storage.remove(&dataset_id);
            }
        }
        if !failures.is_empty() {
            return Err(Error::Internal(failures.join("; ")));
        }

        let Some(generated) = app.status.as_ref().and_then(|s| s.generated.clone()) else {
            return Ok(());
        };
        info!(plotter = %generated.name, "deleting the generated plotter");
        self.plotters.delete(&generated).await?;
        app.status_mut().generated = None;
        Ok(())
    }

    /// Fetch catalog information for one dataset
    async fn construct_data_info(
        &self,
        app: &DataApplication,
        context: &crate::crd::application::DataContext,
    ) -> Result<DataInfo> {
        let credential_path = if app.spec.secret_ref.is_empty() {
            String::new()
        } else {
            vault::credential_path(
                &self.config.vault_address,
                app.namespace_or_default(),
                &app.spec.secret_ref,
            )
        };

        let details = tokio::time::timeout(
            CATALOG_TIMEOUT,
            self.catalog.dataset_info(&context.data_set_id, &credential_path),
        )
        .await
        .map_err(|_| Error::Internal(format!("catalog request for {} timed out", context.data_set_id)))??;

        Ok(DataInfo {
            vault_secret_path: details.vault_secret_path.clone(),
            data_details: details,
            context: context.clone(),
        })
    }

    /// Reference of the plotter generated for an application
    pub fn plotter_reference(&self, app: &DataApplication) -> ResourceReference {
        ResourceReference {
            name: format!("{}-{}", app.name(), app.namespace_or_default()),
            namespace: self.config.control_plane_namespace.clone(),
            kind: "Plotter".to_string(),
            app_version: app.generation(),
        }
    }

    fn bucket_reference(&self, name: &str) -> NamespacedName {
        NamespacedName::new(name, &self.config.control_plane_namespace)
    }
}

// =============================================================================
// Error Analysis
// =============================================================================

/// Record a per-dataset failure as a condition. Denials raise the Deny
/// condition, everything else raises Error; planning continues with the
/// remaining datasets either way.
pub fn analyze_error(app: &mut DataApplication, asset_id: &str, err: &Error) {
    let message = err.to_string();
    if err.is_deny() {
        app.status_mut().set_deny_condition(asset_id, &message);
    } else {
        app.status_mut().set_error_condition(asset_id, &message);
    }
}

/// Rebuild the provisioned bucket from the recorded status entry
fn bucket_from_details(details: &DatasetDetails, namespace: &str) -> ProvisionedBucket {
    let endpoint = serde_json::from_value::<crate::crd::DataStore>(details.details.clone())
        .ok()
        .and_then(|store| match serde_json::from_value::<Connection>(store.connection) {
            Ok(Connection::S3 { endpoint, .. }) => Some(endpoint),
            _ => None,
        })
        .unwrap_or_default();
    ProvisionedBucket {
        name: details.dataset_ref.clone(),
        endpoint,
        secret_ref: NamespacedName::new(&details.secret_ref, namespace),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_error_splits_deny_from_error() {
        let mut app = DataApplication::new("notebook", Default::default());
        app.status_mut().reset_conditions();

        analyze_error(&mut app, "s3/deny-dataset", &Error::ReadAccessDenied);
        analyze_error(
            &mut app,
            "db2/allow-dataset",
            &Error::ModuleNotFound {
                capability: "read".into(),
                reason: String::new(),
            },
        );

        let status = app.status.unwrap();
        let messages = status.error_messages();
        assert!(messages.contains("read access denied"));
        assert!(messages.contains("module not found"));
        assert!(!status.ready);
    }

    #[test]
    fn test_bucket_from_details_extracts_endpoint() {
        let details = DatasetDetails {
            dataset_ref: "notebook-0a1b2c3d4e".into(),
            secret_ref: "credentials-theshire".into(),
            details: serde_json::json!({
                "connection": {
                    "type": "s3",
                    "endpoint": "http://s3.theshire.example.com",
                    "bucket": "notebook-0a1b2c3d4e",
                    "objectKey": "data.parquet"
                },
                "format": "parquet",
                "vaultSecretPath": ""
            }),
        };
        let bucket = bucket_from_details(&details, "dataflow-system");
        assert_eq!(bucket.endpoint, "http://s3.theshire.example.com");
        assert_eq!(bucket.name, "notebook-0a1b2c3d4e");
        assert_eq!(bucket.secret_ref.namespace, "dataflow-system");
    }
}
