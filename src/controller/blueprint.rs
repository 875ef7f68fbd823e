//! Blueprint generation
//!
//! Groups planned module instances into per-cluster blueprints, merges
//! read instances that share a module, and computes the endpoints
//! through which the workload reads each asset.

use std::collections::BTreeMap;

use crate::crd::{
    BlueprintSpec, CapabilityType, DataApplication, DataApplicationStatus, DataFlow, DataModule,
    EndpointSpec, FlowStep,
};

use super::selector::ModuleInstanceSpec;

// =============================================================================
// Naming
// =============================================================================

const DNS1123_NAME_LIMIT: usize = 63;

/// Helm release name of a module instance, unique per application
pub fn release_name(app_name: &str, app_namespace: &str, template: &str) -> String {
    let mut name = format!("{app_name}-{app_namespace}-{template}")
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>();
    name.truncate(DNS1123_NAME_LIMIT);
    name.trim_matches('-').to_string()
}

/// In-cluster FQDN of a deployed module service
pub fn module_endpoint_fqdn(release: &str, namespace: &str) -> String {
    format!("{release}.{namespace}")
}

// =============================================================================
// Blueprint Generation
// =============================================================================

/// Group module instances by cluster into blueprints.
///
/// Within a blueprint, copy and write steps precede read steps. Read
/// instances sharing a module merge into a single step carrying one
/// read argument per asset; copy steps never merge.
pub fn generate_blueprints(
    instances: &[ModuleInstanceSpec],
    app: &DataApplication,
) -> BTreeMap<String, BlueprintSpec> {
    let flow_name = format!("{}-{}", app.name(), app.namespace_or_default());

    let mut per_cluster: BTreeMap<String, Vec<&ModuleInstanceSpec>> = BTreeMap::new();
    for instance in instances {
        per_cluster
            .entry(instance.cluster_name.clone())
            .or_default()
            .push(instance);
    }

    let mut blueprints = BTreeMap::new();
    for (cluster, cluster_instances) in per_cluster {
        let mut steps: Vec<FlowStep> = Vec::new();

        // Copies and writes first, one step per instance
        for instance in cluster_instances
            .iter()
            .filter(|i| i.args.copy.is_some() || i.args.write.is_some())
        {
            steps.push(FlowStep {
                name: format!("{}-{}", instance.module.name(), steps.len()),
                template: instance.module.name().to_string(),
                arguments: instance.args.clone(),
            });
        }

        // Reads second, merged by module
        for instance in cluster_instances.iter().filter(|i| !i.args.read.is_empty()) {
            let template = instance.module.name().to_string();
            match steps
                .iter_mut()
                .find(|step| step.template == template && !step.arguments.read.is_empty())
            {
                Some(step) => step
                    .arguments
                    .read
                    .extend(instance.args.read.iter().cloned()),
                None => steps.push(FlowStep {
                    name: format!("{}-{}", template, steps.len()),
                    template,
                    arguments: instance.args.clone(),
                }),
            }
        }

        blueprints.insert(
            cluster,
            BlueprintSpec {
                flow: DataFlow {
                    name: flow_name.clone(),
                    steps,
                },
            },
        );
    }
    blueprints
}

// =============================================================================
// Read Endpoints
// =============================================================================

/// Populate the application's read-endpoints map from the generated
/// blueprints.
///
/// For every read step, the endpoint host is derived from the release
/// name in the control-plane namespace; port and scheme come from the
/// capability block whose api matches the interface the application
/// requested for the asset.
pub fn set_read_endpoints(
    status: &mut DataApplicationStatus,
    blueprints: &BTreeMap<String, BlueprintSpec>,
    modules: &BTreeMap<String, DataModule>,
    app: &DataApplication,
    control_plane_namespace: &str,
) {
    for blueprint in blueprints.values() {
        let mut found_read = false;
        for step in &blueprint.flow.steps {
            if step.arguments.read.is_empty() {
                continue;
            }
            found_read = true;
            let Some(module) = modules.get(&step.template) else {
                continue;
            };
            let release = release_name(app.name(), app.namespace_or_default(), &step.template);
            let fqdn = module_endpoint_fqdn(&release, control_plane_namespace);

            for read_args in &step.arguments.read {
                let Some(endpoint) =
                    endpoint_for_asset(module, app, &read_args.asset_id)
                else {
                    continue;
                };
                status.read_endpoints_map.insert(
                    read_args.asset_id.clone(),
                    EndpointSpec {
                        hostname: fqdn.clone(),
                        port: endpoint.port,
                        scheme: endpoint.scheme.clone(),
                    },
                );
            }
        }
        // Reads are served from a single cluster
        if found_read {
            return;
        }
    }
}

/// Endpoint of the capability block serving the asset's requested
/// interface; falls back to the first read block
fn endpoint_for_asset<'a>(
    module: &'a DataModule,
    app: &DataApplication,
    asset_id: &str,
) -> Option<&'a EndpointSpec> {
    let requested = app
        .spec
        .data
        .iter()
        .find(|d| d.data_set_id == asset_id)
        .map(|d| d.requirements.interface.clone());

    let read_caps = module.capabilities_of(CapabilityType::Read);
    if let Some(requested) = requested {
        for cap in &read_caps {
            if let Some(api) = &cap.api {
                if api.interface() == requested {
                    return Some(&api.endpoint);
                }
            }
        }
    }
    read_caps
        .first()
        .and_then(|cap| cap.api.as_ref())
        .map(|api| &api.endpoint)
}
