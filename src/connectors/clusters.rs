//! Cluster registry connector
//!
//! Enumerates the clusters available for placing module instances. The
//! cluster inventory is maintained as a ConfigMap in the control-plane
//! namespace mapping cluster name to region.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::Api;
use kube::Client;
use tracing::debug;

use crate::domain::ports::{Cluster, ClusterLister};
use crate::error::Result;

/// Cluster lister reading the inventory ConfigMap
pub struct ConfigMapClusterLister {
    api: Api<ConfigMap>,
    name: String,
}

impl ConfigMapClusterLister {
    pub fn new(client: Client, namespace: &str, name: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ClusterLister for ConfigMapClusterLister {
    async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        let config_map = self.api.get(&self.name).await?;
        let clusters: Vec<Cluster> = config_map
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(name, region)| Cluster { name, region })
            .collect();
        debug!(count = clusters.len(), "listed clusters");
        Ok(clusters)
    }
}
