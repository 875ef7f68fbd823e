//! Error types for the data-flow operator
//!
//! Provides structured error types for the reconciler, planner, module
//! selection, connectors and storage provisioning, together with the
//! requeue policy applied by the controller runtime.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    // =========================================================================
    // Catalog Errors
    // =========================================================================
    #[error("invalid asset ID")]
    InvalidAssetID,

    #[error("Catalog connection error: {0}")]
    CatalogConnection(#[from] reqwest::Error),

    #[error("Asset registration failed: {0}")]
    AssetRegistration(String),

    // =========================================================================
    // Governance Errors
    // =========================================================================
    #[error("read access denied")]
    ReadAccessDenied,

    #[error("copy of the data is denied")]
    CopyNotAllowed,

    #[error("write access denied")]
    WriteNotAllowed,

    #[error("no storage account is allowed by the governance policies")]
    StorageNotAllowed,

    #[error("Policy manager request is invalid: {0}")]
    InvalidPolicyRequest(String),

    // =========================================================================
    // Planning Errors
    // =========================================================================
    #[error("{capability}: module not found. {reason}")]
    ModuleNotFound { capability: String, reason: String },

    #[error("invalid cluster configuration: no clusters have been found for running {module} in {region}")]
    InvalidClusterConfiguration { module: String, region: String },

    // =========================================================================
    // Storage Provisioning Errors
    // =========================================================================
    #[error("Storage provisioning failed: {0}")]
    StorageProvisioningFailed(String),

    #[error("Storage allocation is in progress for {0}")]
    StorageAllocationPending(String),

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Taxonomy validation failed: {0}")]
    TaxonomyValidation(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_) | Error::CatalogConnection(_) | Error::AssetRegistration(_) => {
                ErrorAction::RequeueWithBackoff
            }

            // Bucket allocation still in progress - short retry
            Error::StorageAllocationPending(_) | Error::StorageProvisioningFailed(_) => {
                ErrorAction::RequeueAfter(Duration::from_secs(2))
            }

            // Governance and planning failures are terminal until the spec
            // or the policies change
            Error::InvalidAssetID
            | Error::ReadAccessDenied
            | Error::CopyNotAllowed
            | Error::WriteNotAllowed
            | Error::StorageNotAllowed
            | Error::ModuleNotFound { .. }
            | Error::InvalidClusterConfiguration { .. }
            | Error::Configuration(_)
            | Error::InvalidPolicyRequest(_)
            | Error::TaxonomyValidation(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error denotes a governance denial rather than a
    /// failure. An unknown asset id is a failure, not a denial.
    pub fn is_deny(&self) -> bool {
        matches!(
            self,
            Error::ReadAccessDenied | Error::CopyNotAllowed | Error::WriteNotAllowed
        )
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
