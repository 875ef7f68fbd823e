//! Dynamically allocated bucket management
//!
//! Buckets backing dataset copies are managed through external `Dataset`
//! resources, accessed dynamically. Convention: the Dataset resource has
//! the same name as the provisioned bucket. Supported operations:
//! allocating a bucket, checking allocation status, deleting a temporary
//! bucket, and marking a bucket persistent so it survives application
//! deletion.

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use tracing::{debug, info};

use crate::domain::ports::{
    NamespacedName, ProvisionedBucket, ProvisionedStorageStatus, StorageProvisioner,
};
use crate::error::Result;

/// Group/version/kind of the external Dataset resource
const DATASET_GROUP: &str = "datashim.io";
const DATASET_VERSION: &str = "v1alpha1";
const DATASET_KIND: &str = "Dataset";

/// Label linking a Dataset to the owning application
const OWNER_LABEL: &str = "dataflow.io/owner";
/// Label deciding whether the bucket data is removed with the Dataset
const REMOVE_ON_DELETE_LABEL: &str = "remove-on-delete";

// =============================================================================
// Dataset Provisioner
// =============================================================================

/// Storage provisioner backed by Dataset resources
pub struct DatasetProvisioner {
    client: Client,
    resource: ApiResource,
}

impl DatasetProvisioner {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk(DATASET_GROUP, DATASET_VERSION, DATASET_KIND);
        Self {
            client,
            resource: ApiResource::from_gvk(&gvk),
        }
    }

    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.resource)
    }

    fn new_dataset(
        &self,
        reference: &NamespacedName,
        bucket: &ProvisionedBucket,
        owner: &NamespacedName,
    ) -> DynamicObject {
        let mut dataset = DynamicObject::new(&reference.name, &self.resource).within(&reference.namespace);
        dataset.metadata.labels = Some(
            [
                (
                    OWNER_LABEL.to_string(),
                    format!("{}.{}", owner.namespace, owner.name),
                ),
                (REMOVE_ON_DELETE_LABEL.to_string(), "true".to_string()),
            ]
            .into(),
        );
        dataset.data = json!({
            "spec": {
                "local": {
                    "type": "COS",
                    "bucket": bucket.name,
                    "endpoint": bucket.endpoint,
                    "secret-name": bucket.secret_ref.name,
                    "secret-namespace": bucket.secret_ref.namespace,
                    "provision": "true",
                }
            }
        });
        dataset
    }
}

/// Whether an existing Dataset already describes the required bucket
fn matches_bucket(existing: &DynamicObject, bucket: &ProvisionedBucket) -> bool {
    let local = &existing.data["spec"]["local"];
    local["bucket"].as_str() == Some(&bucket.name)
        && local["endpoint"].as_str() == Some(&bucket.endpoint)
        && local["secret-name"].as_str() == Some(&bucket.secret_ref.name)
        && local["secret-namespace"].as_str() == Some(&bucket.secret_ref.namespace)
}

#[async_trait]
impl StorageProvisioner for DatasetProvisioner {
    async fn create_dataset(
        &self,
        reference: &NamespacedName,
        bucket: &ProvisionedBucket,
        owner: &NamespacedName,
    ) -> Result<()> {
        let api = self.api(&reference.namespace);
        if let Some(existing) = api.get_opt(&reference.name).await? {
            if matches_bucket(&existing, bucket) {
                debug!(dataset = %reference, "allocation is up to date");
                return Ok(());
            }
            // The requirements changed; recreate the allocation
            self.delete_dataset(reference).await?;
        }
        info!(dataset = %reference, bucket = %bucket.name, "allocating bucket");
        let dataset = self.new_dataset(reference, bucket, owner);
        api.create(&PostParams::default(), &dataset).await?;
        Ok(())
    }

    async fn delete_dataset(&self, reference: &NamespacedName) -> Result<()> {
        info!(dataset = %reference, "deleting bucket allocation");
        self.api(&reference.namespace)
            .delete(&reference.name, &Default::default())
            .await?;
        Ok(())
    }

    async fn dataset_status(&self, reference: &NamespacedName) -> Result<ProvisionedStorageStatus> {
        let dataset = self.api(&reference.namespace).get(&reference.name).await?;
        let provision = &dataset.data["status"]["provision"];
        Ok(ProvisionedStorageStatus {
            provisioned: provision["status"].as_str() == Some("OK"),
            error_msg: provision["info"].as_str().unwrap_or_default().to_string(),
        })
    }

    async fn set_persistent(&self, reference: &NamespacedName, persistent: bool) -> Result<()> {
        let remove_on_delete = if persistent { "false" } else { "true" };
        info!(dataset = %reference, persistent, "updating bucket persistence");
        let patch = json!({
            "metadata": { "labels": { REMOVE_ON_DELETE_LABEL: remove_on_delete } }
        });
        self.api(&reference.namespace)
            .patch(
                &reference.name,
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket() -> ProvisionedBucket {
        ProvisionedBucket {
            name: "notebook-0a1b2c3d4e".into(),
            endpoint: "http://s3.theshire.example.com".into(),
            secret_ref: NamespacedName::new("credentials-theshire", "dataflow-system"),
        }
    }

    #[test]
    fn test_matches_bucket() {
        let mut existing = DynamicObject::new(
            "notebook-0a1b2c3d4e",
            &ApiResource::from_gvk(&GroupVersionKind::gvk(
                DATASET_GROUP,
                DATASET_VERSION,
                DATASET_KIND,
            )),
        );
        existing.data = json!({
            "spec": {
                "local": {
                    "type": "COS",
                    "bucket": "notebook-0a1b2c3d4e",
                    "endpoint": "http://s3.theshire.example.com",
                    "secret-name": "credentials-theshire",
                    "secret-namespace": "dataflow-system",
                    "provision": "true",
                }
            }
        });
        assert!(matches_bucket(&existing, &bucket()));

        let mut other = bucket();
        other.endpoint = "http://s3.neverland.example.com".into();
        assert!(!matches_bucket(&existing, &other));
    }
}
