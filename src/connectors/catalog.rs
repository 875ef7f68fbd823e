//! Data catalog connector
//!
//! HTTP client resolving dataset ids into typed metadata. The backend's
//! store-type tag is translated into a typed connection variant; unknown
//! store types are passed through opaquely. An unknown-asset response is
//! distinguished from transport errors: the former is terminal for the
//! data context, the latter are retried.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::ports::{
    Connection, DataCatalog, DataDetails, DatasetMetadata, ProvisionedBucket,
};
use crate::crd::InterfaceDetails;
use crate::error::{Error, Result};

/// Budget for one catalog round trip
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// Wire Format
// =============================================================================

/// Catalog response for a dataset query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogDatasetResponse {
    name: String,
    #[serde(default)]
    protocol: String,
    #[serde(default)]
    data_format: String,
    #[serde(default)]
    geography: String,
    #[serde(default)]
    data_store: serde_json::Value,
    #[serde(default)]
    metadata: DatasetMetadata,
    #[serde(default)]
    credentials_info: CredentialsInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsInfo {
    #[serde(default)]
    vault_secret_path: String,
}

/// Registration request for a materialized copy
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterAssetRequest<'a> {
    destination_catalog_id: &'a str,
    endpoint: &'a str,
    bucket: &'a str,
    metadata: &'a DatasetMetadata,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterAssetResponse {
    asset_id: String,
}

// =============================================================================
// HTTP Data Catalog
// =============================================================================

/// Data catalog client over HTTP
pub struct HttpDataCatalog {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDataCatalog {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl DataCatalog for HttpDataCatalog {
    async fn dataset_info(&self, dataset_id: &str, credential_path: &str) -> Result<DataDetails> {
        debug!(dataset = %dataset_id, "querying the data catalog");
        let mut request = self
            .client
            .get(format!("{}/assets/{}", self.base_url, dataset_id));
        if !credential_path.is_empty() {
            request = request.header("X-Credential-Path", credential_path);
        }
        let response = request.send().await?;

        // The backend reports an unknown id as a client error, which is
        // terminal for this data context
        if matches!(
            response.status(),
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST
        ) {
            return Err(Error::InvalidAssetID);
        }
        let payload: CatalogDatasetResponse = response.error_for_status()?.json().await?;
        dataset_to_data_details(payload)
    }

    async fn register_dataset(
        &self,
        catalog_id: &str,
        bucket: &ProvisionedBucket,
        metadata: &DatasetMetadata,
    ) -> Result<String> {
        info!(catalog = %catalog_id, bucket = %bucket.name, "registering dataset copy");
        let request = RegisterAssetRequest {
            destination_catalog_id: catalog_id,
            endpoint: &bucket.endpoint,
            bucket: &bucket.name,
            metadata,
        };
        let response = self
            .client
            .post(format!("{}/assets", self.base_url))
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::AssetRegistration(format!(
                "register dataset info in {} failed: {}",
                catalog_id,
                response.status()
            )));
        }
        let payload: RegisterAssetResponse = response.json().await?;
        Ok(payload.asset_id)
    }
}

// =============================================================================
// Translation
// =============================================================================

/// Translate a catalog payload into typed dataset details
fn dataset_to_data_details(payload: CatalogDatasetResponse) -> Result<DataDetails> {
    let connection = connection_from_store(&payload.data_store);
    Ok(DataDetails {
        name: payload.name,
        interface: InterfaceDetails::new(&payload.protocol, &payload.data_format),
        geography: payload.geography,
        connection,
        metadata: payload.metadata,
        vault_secret_path: payload.credentials_info.vault_secret_path,
    })
}

/// Turn the store blob into a typed connection, falling back to the raw
/// value for store types the controller does not know
fn connection_from_store(store: &serde_json::Value) -> Connection {
    serde_json::from_value(store.clone()).unwrap_or_else(|_| Connection::Generic(store.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_s3_store_translated() {
        let payload: CatalogDatasetResponse = serde_json::from_value(json!({
            "name": "transactions",
            "protocol": "s3",
            "dataFormat": "parquet",
            "geography": "theshire",
            "dataStore": {
                "type": "s3",
                "endpoint": "http://s3.theshire.example.com",
                "bucket": "raw-data",
                "objectKey": "transactions.parquet"
            },
            "credentialsInfo": {"vaultSecretPath": "/v1/secret/transactions"}
        }))
        .unwrap();
        let details = dataset_to_data_details(payload).unwrap();
        assert_eq!(details.interface, InterfaceDetails::new("s3", "parquet"));
        assert_eq!(details.geography, "theshire");
        assert_eq!(details.vault_secret_path, "/v1/secret/transactions");
        assert!(matches!(details.connection, Connection::S3 { .. }));
    }

    #[test]
    fn test_db2_store_translated() {
        let store = json!({
            "type": "db2",
            "url": "jdbc:db2://db2.example.com:50000",
            "database": "BLUDB",
            "table": "ACCOUNTS",
            "port": 50000,
            "ssl": true
        });
        match connection_from_store(&store) {
            Connection::Db2 { database, table, .. } => {
                assert_eq!(database, "BLUDB");
                assert_eq!(table, "ACCOUNTS");
            }
            other => panic!("expected a db2 connection, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_store_kept_opaque() {
        let store = json!({"type": "cassandra", "hosts": ["c1", "c2"]});
        assert_eq!(
            connection_from_store(&store),
            Connection::Generic(store.clone())
        );
    }
}
