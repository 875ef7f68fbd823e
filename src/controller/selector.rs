//! Module selection and placement
//!
//! Finds a module (plus its transitive dependencies) satisfying a
//! capability, interface and governance-action requirement, and assigns
//! the selected module to a cluster according to the geography rules.

use std::collections::BTreeMap;

use crate::crd::application::DataContext;
use crate::crd::{CapabilityType, DataModule, DependencyType, InterfaceDetails, ModuleArguments};
use crate::domain::ports::{Cluster, DataDetails, EnforcementAction};
use crate::error::{Error, Result};

// =============================================================================
// Data Info
// =============================================================================

/// Everything known about one dataset requirement: the application's
/// data context together with the catalog response.
#[derive(Debug, Clone)]
pub struct DataInfo {
    /// Source details returned by the data catalog
    pub data_details: DataDetails,
    /// Path to the secret holding the dataset credentials
    pub vault_secret_path: String,
    /// The data context from the application spec
    pub context: DataContext,
}

// =============================================================================
// Module Instance Spec
// =============================================================================

/// A module placed on a cluster with concrete arguments
#[derive(Debug, Clone)]
pub struct ModuleInstanceSpec {
    /// The selected module
    pub module: DataModule,
    /// Arguments wiring the instance
    pub args: ModuleArguments,
    /// Asset the instance serves
    pub asset_id: String,
    /// Cluster the instance runs on
    pub cluster_name: String,
}

// =============================================================================
// Module Selector
// =============================================================================

/// Finds a module that fits a single capability requirement.
/// Modules are examined in name order; the first match wins.
#[derive(Debug, Clone)]
pub struct ModuleSelector {
    /// Requested capability
    pub capability: CapabilityType,
    /// Interface the data currently has (None to skip the source check)
    pub source: Option<InterfaceDetails>,
    /// Interface the data must end up with
    pub destination: Option<InterfaceDetails>,
    /// Actions the module must enforce
    pub actions: Vec<EnforcementAction>,
    /// Processing geography of the workload
    pub geo: String,

    module: Option<DataModule>,
    dependencies: Vec<DataModule>,
    message: String,
}

impl ModuleSelector {
    pub fn new(
        capability: CapabilityType,
        source: Option<InterfaceDetails>,
        destination: Option<InterfaceDetails>,
        actions: Vec<EnforcementAction>,
        geo: &str,
    ) -> Self {
        Self {
            capability,
            source,
            destination,
            actions,
            geo: geo.to_string(),
            module: None,
            dependencies: Vec::new(),
            message: String::new(),
        }
    }

    /// The selected module, if any
    pub fn module(&self) -> Option<&DataModule> {
        self.module.as_ref()
    }

    /// Dependencies of the selected module
    pub fn dependencies(&self) -> &[DataModule] {
        &self.dependencies
    }

    /// Failure message collected during selection
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Error corresponding to a failed selection
    pub fn not_found(&self) -> Error {
        Error::ModuleNotFound {
            capability: self.capability.to_string(),
            reason: self.message.clone(),
        }
    }

    /// Find the first module satisfying the requirements
    pub fn select(&mut self, modules: &BTreeMap<String, DataModule>) -> bool {
        self.message.clear();
        for module in modules.values() {
            if !self.supports_interface(module) {
                continue;
            }
            if !self.supports_actions(module) {
                continue;
            }
            if !self.supports_dependencies(module, modules) {
                continue;
            }
            return true;
        }
        false
    }

    /// Whether the module satisfies the interface requirements
    fn supports_interface(&self, module: &DataModule) -> bool {
        for cap in module.capabilities_of(self.capability) {
            match self.capability {
                CapabilityType::Read | CapabilityType::Write => {
                    let api_matches = match (&cap.api, &self.destination) {
                        (Some(api), Some(dest)) => api.interface() == *dest,
                        _ => false,
                    };
                    if !api_matches {
                        continue;
                    }
                    // The api is the serving side; when a source is
                    // requested it must appear among the interfaces the
                    // module can consume.
                    let source_matches = match &self.source {
                        Some(src) => cap
                            .supported_interfaces
                            .iter()
                            .any(|inout| inout.source.as_ref() == Some(src)),
                        None => true,
                    };
                    if source_matches {
                        return true;
                    }
                }
                CapabilityType::Copy => {
                    let found = cap.supported_interfaces.iter().any(|inout| {
                        inout.source.as_ref() == self.source.as_ref()
                            && inout.sink.as_ref() == self.destination.as_ref()
                    });
                    if found {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Whether the module supports every required governance action.
    /// All actions must be covered by this one module.
    fn supports_actions(&self, module: &DataModule) -> bool {
        self.actions.iter().all(|action| {
            module.capabilities_of(self.capability).iter().any(|cap| {
                cap.actions
                    .iter()
                    .any(|supported| supported.id == action.id && supported.level == action.level)
            })
        })
    }

    /// Whether every transitive module dependency is installed. On
    /// success the module and its dependency closure are recorded.
    fn supports_dependencies(
        &mut self,
        module: &DataModule,
        modules: &BTreeMap<String, DataModule>,
    ) -> bool {
        let (found, missing) = check_dependencies(module, modules);
        if !missing.is_empty() {
            self.message += &format!(
                "{} has missing dependencies: {}\n",
                module.name(),
                missing.join(", ")
            );
            return false;
        }
        self.module = Some(module.clone());
        self.dependencies = found
            .iter()
            .filter_map(|name| modules.get(name).cloned())
            .collect();
        true
    }

    /// Choose the cluster the selected module runs on.
    ///
    /// Read and write run at the processing geography. Copy runs near
    /// the data when transformations are required, and at the processing
    /// geography otherwise.
    pub fn select_cluster(&self, source_geography: &str, clusters: &[Cluster]) -> Result<String> {
        let mut geo = source_geography;
        match self.capability {
            CapabilityType::Read | CapabilityType::Write => geo = &self.geo,
            CapabilityType::Copy if self.actions.is_empty() => geo = &self.geo,
            CapabilityType::Copy => {}
        }
        clusters
            .iter()
            .find(|cluster| cluster.region == geo)
            .map(|cluster| cluster.name.clone())
            .ok_or_else(|| Error::InvalidClusterConfiguration {
                module: self
                    .module
                    .as_ref()
                    .map(|m| m.name().to_string())
                    .unwrap_or_default(),
                region: geo.to_string(),
            })
    }

    /// Module instances for the selected module and its dependencies
    pub fn module_instances(
        &self,
        args: ModuleArguments,
        asset_id: &str,
        cluster: &str,
    ) -> Vec<ModuleInstanceSpec> {
        let mut instances = Vec::new();
        if let Some(module) = &self.module {
            instances.push(ModuleInstanceSpec {
                module: module.clone(),
                args: args.clone(),
                asset_id: asset_id.to_string(),
                cluster_name: cluster.to_string(),
            });
        }
        for dep in &self.dependencies {
            instances.push(ModuleInstanceSpec {
                module: dep.clone(),
                args: args.clone(),
                asset_id: asset_id.to_string(),
                cluster_name: cluster.to_string(),
            });
        }
        instances
    }
}

/// Resolve the transitive module dependencies of a module.
/// Returns the resolved names and the missing names, verbatim.
pub fn check_dependencies(
    module: &DataModule,
    modules: &BTreeMap<String, DataModule>,
) -> (Vec<String>, Vec<String>) {
    let mut found = Vec::new();
    let mut missing = Vec::new();

    for dependency in &module.spec.dependencies {
        if dependency.dep_type != DependencyType::Module {
            continue;
        }
        match modules.get(&dependency.name) {
            None => missing.push(dependency.name.clone()),
            Some(dep) => {
                found.push(dependency.name.clone());
                let (sub_found, sub_missing) = check_dependencies(dep, modules);
                found.extend(sub_found);
                missing.extend(sub_missing);
            }
        }
    }
    (found, missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        ActionLevel, ChartSpec, DataModuleSpec, Dependency, EndpointSpec, ModuleAction,
        ModuleApi, ModuleCapability, ModuleInOut,
    };

    fn read_parquet_module() -> DataModule {
        DataModule::new(
            "module-read-parquet",
            DataModuleSpec {
                chart: ChartSpec::default(),
                dependencies: vec![],
                capabilities: vec![ModuleCapability {
                    capability: Some(CapabilityType::Read),
                    api: Some(ModuleApi {
                        protocol: "arrow-flight".into(),
                        data_format: "arrow".into(),
                        endpoint: EndpointSpec {
                            hostname: String::new(),
                            port: 80,
                            scheme: "grpc".into(),
                        },
                    }),
                    supported_interfaces: vec![ModuleInOut {
                        source: Some(InterfaceDetails::new("s3", "parquet")),
                        sink: None,
                    }],
                    actions: vec![],
                }],
            },
        )
    }

    fn copy_db2_module() -> DataModule {
        DataModule::new(
            "copy-db2-parquet",
            DataModuleSpec {
                chart: ChartSpec::default(),
                dependencies: vec![],
                capabilities: vec![ModuleCapability {
                    capability: Some(CapabilityType::Copy),
                    api: None,
                    supported_interfaces: vec![ModuleInOut {
                        source: Some(InterfaceDetails::new("jdbc-db2", "table")),
                        sink: Some(InterfaceDetails::new("s3", "parquet")),
                    }],
                    actions: vec![ModuleAction {
                        id: "redact".into(),
                        level: ActionLevel::Column,
                    }],
                }],
            },
        )
    }

    fn registry() -> BTreeMap<String, DataModule> {
        let mut modules = BTreeMap::new();
        modules.insert("module-read-parquet".to_string(), read_parquet_module());
        modules.insert("copy-db2-parquet".to_string(), copy_db2_module());
        modules
    }

    fn redact() -> EnforcementAction {
        EnforcementAction {
            id: "redact".into(),
            level: ActionLevel::Column,
            args: Default::default(),
        }
    }

    #[test]
    fn test_select_read_by_api() {
        let mut selector = ModuleSelector::new(
            CapabilityType::Read,
            Some(InterfaceDetails::new("s3", "parquet")),
            Some(InterfaceDetails::new("arrow-flight", "arrow")),
            vec![],
            "theshire",
        );
        assert!(selector.select(&registry()));
        assert_eq!(selector.module().unwrap().name(), "module-read-parquet");
    }

    #[test]
    fn test_read_rejects_unsupported_source() {
        let mut selector = ModuleSelector::new(
            CapabilityType::Read,
            Some(InterfaceDetails::new("kafka", "json")),
            Some(InterfaceDetails::new("arrow-flight", "arrow")),
            vec![],
            "theshire",
        );
        assert!(!selector.select(&registry()));
    }

    #[test]
    fn test_no_read_module_for_api() {
        let mut selector = ModuleSelector::new(
            CapabilityType::Read,
            None,
            Some(InterfaceDetails::new("jdbc-db2", "table")),
            vec![],
            "theshire",
        );
        assert!(!selector.select(&registry()));
        let err = selector.not_found();
        assert!(err.to_string().contains("read"));
        assert!(err.to_string().contains("module not found"));
    }

    #[test]
    fn test_select_copy_with_action() {
        let mut selector = ModuleSelector::new(
            CapabilityType::Copy,
            Some(InterfaceDetails::new("jdbc-db2", "table")),
            Some(InterfaceDetails::new("s3", "parquet")),
            vec![redact()],
            "theshire",
        );
        assert!(selector.select(&registry()));
        assert_eq!(selector.module().unwrap().name(), "copy-db2-parquet");
    }

    #[test]
    fn test_action_level_must_match() {
        let action = EnforcementAction {
            id: "redact".into(),
            level: ActionLevel::Dataset,
            args: Default::default(),
        };
        let mut selector = ModuleSelector::new(
            CapabilityType::Copy,
            Some(InterfaceDetails::new("jdbc-db2", "table")),
            Some(InterfaceDetails::new("s3", "parquet")),
            vec![action],
            "theshire",
        );
        assert!(!selector.select(&registry()));
    }

    #[test]
    fn test_missing_dependency_reported() {
        let mut modules = registry();
        let mut module = read_parquet_module();
        module.spec.dependencies.push(Dependency {
            dep_type: DependencyType::Module,
            name: "module-sidecar".into(),
        });
        modules.insert("module-read-parquet".to_string(), module);

        let mut selector = ModuleSelector::new(
            CapabilityType::Read,
            Some(InterfaceDetails::new("s3", "parquet")),
            Some(InterfaceDetails::new("arrow-flight", "arrow")),
            vec![],
            "theshire",
        );
        assert!(!selector.select(&modules));
        assert!(selector.message().contains("module-sidecar"));
    }

    #[test]
    fn test_dependency_closure_resolved() {
        let mut modules = registry();
        let mut module = read_parquet_module();
        module.spec.dependencies.push(Dependency {
            dep_type: DependencyType::Module,
            name: "copy-db2-parquet".into(),
        });
        modules.insert("module-read-parquet".to_string(), module);

        let mut selector = ModuleSelector::new(
            CapabilityType::Read,
            Some(InterfaceDetails::new("s3", "parquet")),
            Some(InterfaceDetails::new("arrow-flight", "arrow")),
            vec![],
            "theshire",
        );
        assert!(selector.select(&modules));
        assert_eq!(selector.dependencies().len(), 1);
        let instances = selector.module_instances(ModuleArguments::default(), "s3/allow", "thegreendragon");
        assert_eq!(instances.len(), 2);
    }

    fn clusters() -> Vec<Cluster> {
        vec![
            Cluster {
                name: "thegreendragon".into(),
                region: "theshire".into(),
            },
            Cluster {
                name: "thequietman".into(),
                region: "neverland".into(),
            },
        ]
    }

    #[test]
    fn test_read_placed_at_processing_location() {
        let mut selector = ModuleSelector::new(
            CapabilityType::Read,
            Some(InterfaceDetails::new("s3", "parquet")),
            Some(InterfaceDetails::new("arrow-flight", "arrow")),
            vec![],
            "theshire",
        );
        selector.select(&registry());
        let cluster = selector.select_cluster("neverland", &clusters()).unwrap();
        assert_eq!(cluster, "thegreendragon");
    }

    #[test]
    fn test_transforming_copy_placed_at_source() {
        let mut selector = ModuleSelector::new(
            CapabilityType::Copy,
            Some(InterfaceDetails::new("jdbc-db2", "table")),
            Some(InterfaceDetails::new("s3", "parquet")),
            vec![redact()],
            "theshire",
        );
        selector.select(&registry());
        let cluster = selector.select_cluster("neverland", &clusters()).unwrap();
        assert_eq!(cluster, "thequietman");
    }

    #[test]
    fn test_plain_copy_placed_at_processing_location() {
        let mut selector = ModuleSelector::new(
            CapabilityType::Copy,
            Some(InterfaceDetails::new("jdbc-db2", "table")),
            Some(InterfaceDetails::new("s3", "parquet")),
            vec![],
            "theshire",
        );
        selector.select(&registry());
        let cluster = selector.select_cluster("neverland", &clusters()).unwrap();
        assert_eq!(cluster, "thegreendragon");
    }

    #[test]
    fn test_no_cluster_for_region() {
        let mut selector = ModuleSelector::new(
            CapabilityType::Read,
            Some(InterfaceDetails::new("s3", "parquet")),
            Some(InterfaceDetails::new("arrow-flight", "arrow")),
            vec![],
            "mordor",
        );
        selector.select(&registry());
        let err = selector.select_cluster("theshire", &clusters()).unwrap_err();
        assert!(matches!(err, Error::InvalidClusterConfiguration { .. }));
        assert!(err.to_string().contains("mordor"));
    }
}
