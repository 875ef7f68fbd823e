//! Controller configuration
//!
//! All process-wide settings are gathered here and injected into the
//! components that need them. There is no ambient global state.

/// Configuration for the data-flow controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Controller name, used to derive the finalizer name
    pub controller_name: String,
    /// Namespace holding plotters, modules, storage accounts and buckets
    pub control_plane_namespace: String,
    /// Base address of the secret store (credentials are passed by path only)
    pub vault_address: String,
    /// Region assumed for processing when the application declares no workload
    pub default_region: String,
    /// Path to the compiled taxonomy schema used for admission validation
    pub taxonomy_schema_path: String,
}

impl ControllerConfig {
    /// Finalizer attached to every reconciled application
    pub fn finalizer_name(&self) -> String {
        format!("{}.finalizer", self.controller_name)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            controller_name: "dataflow-controller".to_string(),
            control_plane_namespace: "dataflow-system".to_string(),
            vault_address: "http://vault.dataflow-system:8200".to_string(),
            default_region: "theshire".to_string(),
            taxonomy_schema_path: "/etc/taxonomy/application.values.schema.json".to_string(),
        }
    }
}
