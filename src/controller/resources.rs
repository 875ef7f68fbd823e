//! Kubernetes-backed collaborator implementations
//!
//! The plotter service, module registry and storage-account lister
//! backed by the cluster API. In-memory counterparts for tests live in
//! the mockup module.

use async_trait::async_trait;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::debug;

use crate::crd::{
    BlueprintSpec, DataModule, ObservedState, Plotter, PlotterSpec, ResourceReference,
    StorageAccount, APPLICATION_NAMESPACE_LABEL, APPLICATION_NAME_LABEL,
};
use crate::domain::ports::{
    ModuleRegistry, NamespacedName, PlotterService, StorageAccountLister,
};
use crate::error::Result;

// =============================================================================
// Owner Labels
// =============================================================================

/// Labels linking a generated resource back to its application
pub fn owner_labels(owner: &NamespacedName) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APPLICATION_NAME_LABEL.to_string(), owner.name.clone()),
        (
            APPLICATION_NAMESPACE_LABEL.to_string(),
            owner.namespace.clone(),
        ),
    ])
}

// =============================================================================
// Plotter Service
// =============================================================================

/// Manages the Plotter generated for each application
pub struct KubePlotterService {
    client: Client,
}

impl KubePlotterService {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Plotter> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl PlotterService for KubePlotterService {
    async fn exists(&self, reference: &ResourceReference) -> bool {
        if reference.namespace.is_empty() {
            return false;
        }
        self.api(&reference.namespace)
            .get_opt(&reference.name)
            .await
            .map(|found| found.is_some())
            .unwrap_or(false)
    }

    async fn create_or_update(
        &self,
        owner: &NamespacedName,
        reference: &ResourceReference,
        blueprints: BTreeMap<String, BlueprintSpec>,
    ) -> Result<()> {
        let api = self.api(&reference.namespace);
        if let Some(existing) = api.get_opt(&reference.name).await? {
            if existing.spec.blueprints == blueprints {
                debug!(plotter = %reference.name, "plotter is up to date");
                return Ok(());
            }
            let patch = serde_json::json!({
                "metadata": { "labels": owner_labels(owner) },
                "spec": { "blueprints": blueprints },
            });
            api.patch(
                &reference.name,
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
            return Ok(());
        }

        let mut plotter = Plotter::new(&reference.name, PlotterSpec { blueprints });
        plotter.metadata.namespace = Some(reference.namespace.clone());
        plotter.metadata.labels = Some(owner_labels(owner));
        api.create(&PostParams::default(), &plotter).await?;
        Ok(())
    }

    async fn delete(&self, reference: &ResourceReference) -> Result<()> {
        self.api(&reference.namespace)
            .delete(&reference.name, &Default::default())
            .await?;
        Ok(())
    }

    async fn observed_state(&self, reference: &ResourceReference) -> Result<ObservedState> {
        if reference.namespace.is_empty() {
            return Ok(ObservedState::default());
        }
        let plotter = self.api(&reference.namespace).get(&reference.name).await?;
        Ok(plotter
            .status
            .map(|status| status.observed_state)
            .unwrap_or_default())
    }
}

// =============================================================================
// Module Registry
// =============================================================================

/// Lists the DataModules installed in the control-plane namespace
pub struct KubeModuleRegistry {
    api: Api<DataModule>,
}

impl KubeModuleRegistry {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl ModuleRegistry for KubeModuleRegistry {
    async fn list_modules(&self) -> Result<BTreeMap<String, DataModule>> {
        let mut modules = BTreeMap::new();
        for module in self.api.list(&ListParams::default()).await? {
            modules.insert(module.name().to_string(), module);
        }
        debug!(count = modules.len(), "listed installed modules");
        Ok(modules)
    }
}

// =============================================================================
// Storage Account Lister
// =============================================================================

/// Lists the storage accounts available for dataset copies
pub struct KubeStorageAccountLister {
    api: Api<StorageAccount>,
}

impl KubeStorageAccountLister {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl StorageAccountLister for KubeStorageAccountLister {
    async fn list_accounts(&self) -> Result<Vec<StorageAccount>> {
        let accounts = self.api.list(&ListParams::default()).await?;
        Ok(accounts.items)
    }
}
