//! Reconciliation scenarios
//!
//! Runs the application reconciler against in-memory collaborators,
//! covering the planning, governance, placement, storage and lifecycle
//! behavior end to end.

use std::sync::Arc;
use std::time::Duration;

use dataflow_operator::controller::{ApplicationReconciler, ReconcileOutcome};
use dataflow_operator::crd::application::{
    DataContext, DataRequirements, DENY_CONDITION_INDEX, ERROR_CONDITION_INDEX,
};
use dataflow_operator::crd::{
    ConditionStatus, DataApplicationStatus, InterfaceDetails, ObservedState, ResourceReference,
};
use dataflow_operator::mockup::{
    account_neverland, account_theshire, copy_application_csv, copy_db2_parquet,
    copy_db2_parquet_no_transforms, data_usage_application, implicit_copy_batch,
    ingest_application, module_read_csv, module_read_parquet, InMemoryAccountLister,
    InMemoryModuleRegistry, InMemoryPlotterService, InMemoryProvisioner, MockClusterLister,
    MockDataCatalog, MockPolicyManager,
};
use dataflow_operator::{ControllerConfig, DataApplication, PlotterService};

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    catalog: Arc<MockDataCatalog>,
    provision: Arc<InMemoryProvisioner>,
    plotters: Arc<InMemoryPlotterService>,
    modules: Arc<InMemoryModuleRegistry>,
    accounts: Arc<InMemoryAccountLister>,
    reconciler: ApplicationReconciler,
}

fn harness() -> Harness {
    let catalog = Arc::new(MockDataCatalog::new());
    let provision = Arc::new(InMemoryProvisioner::new());
    let plotters = Arc::new(InMemoryPlotterService::new());
    let modules = Arc::new(InMemoryModuleRegistry::new());
    let accounts = Arc::new(InMemoryAccountLister::new());

    let reconciler = ApplicationReconciler {
        config: ControllerConfig {
            controller_name: "TestReconciler".to_string(),
            ..Default::default()
        },
        catalog: catalog.clone(),
        policy: Arc::new(MockPolicyManager::new()),
        clusters: Arc::new(MockClusterLister::new()),
        provision: provision.clone(),
        modules: modules.clone(),
        accounts: accounts.clone(),
        plotters: plotters.clone(),
    };

    Harness {
        catalog,
        provision,
        plotters,
        modules,
        accounts,
        reconciler,
    }
}

fn error_messages(app: &DataApplication) -> String {
    app.status
        .as_ref()
        .map(DataApplicationStatus::error_messages)
        .unwrap_or_default()
}

fn generated(app: &DataApplication) -> Option<ResourceReference> {
    app.status.as_ref().and_then(|s| s.generated.clone())
}

// =============================================================================
// Planning Scenarios
// =============================================================================

/// An explicit csv copy next to the workload yields one blueprint with a
/// copy step feeding a read step.
#[tokio::test]
async fn test_csv_copy_and_read() {
    let h = harness();
    h.modules.install(implicit_copy_batch());
    h.modules.install(module_read_csv());
    h.accounts.add(account_theshire());

    let mut app = copy_application_csv("notebook");
    let outcome = h.reconciler.reconcile(&mut app).await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::RequeueAfter(Duration::from_secs(10))
    );

    let reference = generated(&app).expect("a plotter should have been generated");
    assert_eq!(reference.name, "notebook-default");
    assert_eq!(reference.namespace, "dataflow-system");

    let plotter = h.plotters.get(&reference).unwrap();
    let blueprint = &plotter.spec.blueprints["thegreendragon"];
    assert_eq!(blueprint.flow.steps.len(), 2);

    let copy_step = &blueprint.flow.steps[0];
    assert_eq!(copy_step.template, "implicit-copy-batch");
    let copy = copy_step.arguments.copy.as_ref().unwrap();
    assert_eq!(copy.source.format, "csv");
    assert_eq!(copy.destination.format, "csv");

    let read_step = &blueprint.flow.steps[1];
    assert_eq!(read_step.arguments.read[0].source.format, copy.destination.format);
}

/// A read denial raises the Deny condition and suppresses the plotter.
#[tokio::test]
async fn test_deny_on_read() {
    let h = harness();
    let mut app = data_usage_application("read-test", "s3/deny-dataset");
    app.spec.data[0].requirements.interface = InterfaceDetails::new("s3", "parquet");

    let outcome = h.reconciler.reconcile(&mut app).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Done);

    let status = app.status.as_ref().unwrap();
    assert!(status.error_or_deny());
    assert!(!status.ready);
    assert!(error_messages(&app).contains("read access denied"));
    assert!(generated(&app).is_none());
}

/// An unknown dataset id raises the Error condition, not Deny.
#[tokio::test]
async fn test_unknown_asset_raises_error_condition() {
    let h = harness();
    let mut app = data_usage_application("read-test", "unknown/missing-dataset");

    let outcome = h.reconciler.reconcile(&mut app).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Done);

    let status = app.status.as_ref().unwrap();
    assert_eq!(
        status.conditions[ERROR_CONDITION_INDEX].status,
        ConditionStatus::True
    );
    assert_eq!(
        status.conditions[DENY_CONDITION_INDEX].status,
        ConditionStatus::False
    );
    assert!(error_messages(&app).contains("invalid asset ID"));
    assert!(generated(&app).is_none());
}

/// No module serves the requested interface at all.
#[tokio::test]
async fn test_no_read_path() {
    let h = harness();
    h.modules.install(module_read_parquet());

    let mut app = data_usage_application("read-test", "db2/allow-dataset");
    app.spec.data[0].requirements.interface = InterfaceDetails::new("jdbc-db2", "table");

    h.reconciler.reconcile(&mut app).await.unwrap();

    let messages = error_messages(&app);
    assert!(messages.contains("module not found"));
    assert!(messages.contains("read"));
    assert!(generated(&app).is_none());
}

/// A copy is needed but no installed module bridges the source store.
#[tokio::test]
async fn test_wrong_copy_module() {
    let h = harness();
    h.modules.install(module_read_parquet());
    h.modules.install(copy_db2_parquet());
    h.accounts.add(account_theshire());

    let mut app = data_usage_application("read-test", "s3/allow-dataset");
    app.spec.data.push(DataContext {
        data_set_id: "kafka/allow-dataset".to_string(),
        requirements: DataRequirements {
            interface: InterfaceDetails::new("arrow-flight", "arrow"),
            ..Default::default()
        },
    });

    h.reconciler.reconcile(&mut app).await.unwrap();

    let messages = error_messages(&app);
    assert!(messages.contains("module not found"));
    assert!(messages.contains("copy"));
}

/// The only copy module cannot enforce the required redaction.
#[tokio::test]
async fn test_copy_module_without_action_support() {
    let h = harness();
    h.modules.install(module_read_parquet());
    h.modules.install(copy_db2_parquet_no_transforms());
    h.accounts.add(account_theshire());

    let mut app = data_usage_application("read-test", "db2/redact-dataset");
    h.reconciler.reconcile(&mut app).await.unwrap();

    assert!(error_messages(&app).contains("module not found"));
    assert!(generated(&app).is_none());
}

/// Two datasets in one region: the redacted one is copied, both are
/// served by a single read step.
#[tokio::test]
async fn test_multiple_datasets_share_read_step() {
    let h = harness();
    h.modules.install(module_read_parquet());
    h.modules.install(copy_db2_parquet());
    h.accounts.add(account_theshire());

    let mut app = data_usage_application("read-test", "s3/allow-dataset");
    app.spec.data.push(DataContext {
        data_set_id: "db2/redact-dataset".to_string(),
        requirements: DataRequirements {
            interface: InterfaceDetails::new("arrow-flight", "arrow"),
            ..Default::default()
        },
    });

    h.reconciler.reconcile(&mut app).await.unwrap();

    // A bucket was provisioned exactly for the copied dataset
    let status = app.status.as_ref().unwrap();
    assert!(!status.provisioned_storage["db2/redact-dataset"]
        .dataset_ref
        .is_empty());
    assert!(!status.provisioned_storage.contains_key("s3/allow-dataset"));

    let plotter = h.plotters.get(&generated(&app).unwrap()).unwrap();
    assert_eq!(plotter.spec.blueprints.len(), 1);
    let blueprint = &plotter.spec.blueprints["thegreendragon"];

    let read_steps: Vec<_> = blueprint
        .flow
        .steps
        .iter()
        .filter(|step| !step.arguments.read.is_empty())
        .collect();
    assert_eq!(read_steps.len(), 1, "a single read module should be instantiated");
    assert_eq!(read_steps[0].arguments.read.len(), 2);

    // Every policy action lands on exactly one step: the copy absorbs
    // the redaction, the read serves as-is
    let copy_steps: Vec<_> = blueprint
        .flow
        .steps
        .iter()
        .filter(|step| step.arguments.copy.is_some())
        .collect();
    assert_eq!(copy_steps.len(), 1);
    let transformations = &copy_steps[0].arguments.copy.as_ref().unwrap().transformations;
    assert_eq!(transformations.len(), 1);
    assert_eq!(transformations[0].id, "redact");
    for read in &read_steps[0].arguments.read {
        assert!(read.transformations.is_empty());
    }

    // The read consumes the copy destination, not the catalog source
    let copied = read_steps[0]
        .arguments
        .read
        .iter()
        .find(|r| r.asset_id == "db2/redact-dataset")
        .unwrap();
    let destination = &copy_steps[0].arguments.copy.as_ref().unwrap().destination;
    assert_eq!(copied.source, *destination);

    // Read endpoints are published per asset
    assert_eq!(status.read_endpoints_map.len(), 2);
    let endpoint = &status.read_endpoints_map["s3/allow-dataset"];
    assert_eq!(endpoint.scheme, "grpc");
    assert!(endpoint.hostname.contains("module-read-parquet"));
}

/// Data from another region that must be redacted: the copy runs near
/// the data, the read near the workload.
#[tokio::test]
async fn test_cross_region_copy() {
    let h = harness();
    h.modules.install(module_read_parquet());
    h.modules.install(implicit_copy_batch());
    h.accounts.add(account_theshire());

    let mut app = data_usage_application("read-test", "s3-external/redact-dataset");
    h.reconciler.reconcile(&mut app).await.unwrap();

    let status = app.status.as_ref().unwrap();
    assert!(!status.provisioned_storage["s3-external/redact-dataset"]
        .dataset_ref
        .is_empty());

    let plotter = h.plotters.get(&generated(&app).unwrap()).unwrap();
    assert_eq!(plotter.spec.blueprints.len(), 2);
    assert!(plotter.spec.blueprints["thequietman"]
        .flow
        .steps
        .iter()
        .all(|step| step.arguments.copy.is_some()));
    assert!(plotter.spec.blueprints["thegreendragon"]
        .flow
        .steps
        .iter()
        .all(|step| !step.arguments.read.is_empty()));
}

/// Ingest: the copy lands in the storage account permitted by policy.
#[tokio::test]
async fn test_ingest_selects_allowed_account() {
    let h = harness();
    h.modules.install(implicit_copy_batch());
    h.accounts.add(account_neverland());
    h.accounts.add(account_theshire());

    let mut app = ingest_application("ingest", "s3-external/allow-theshire");
    h.reconciler.reconcile(&mut app).await.unwrap();

    let status = app.status.as_ref().unwrap();
    let details = &status.provisioned_storage["s3-external/allow-theshire"];
    assert!(!details.dataset_ref.is_empty());
    assert_eq!(details.secret_ref, "credentials-theshire");

    let plotter = h.plotters.get(&generated(&app).unwrap()).unwrap();
    assert_eq!(plotter.spec.blueprints.len(), 1);
    assert_eq!(plotter.spec.blueprints["thegreendragon"].flow.steps.len(), 1);
}

/// Ingest into a region forbidden by policy: no bucket, no plotter.
#[tokio::test]
async fn test_ingest_not_allowed() {
    let h = harness();
    h.modules.install(implicit_copy_batch());
    h.accounts.add(account_theshire());

    let mut app = ingest_application("ingest", "s3-external/deny-theshire");
    h.reconciler.reconcile(&mut app).await.unwrap();

    let status = app.status.as_ref().unwrap();
    assert!(status.provisioned_storage.is_empty());
    assert!(h.provision.allocated().is_empty());
    assert!(!error_messages(&app).is_empty());
    assert!(generated(&app).is_none());
}

/// An application without datasets is trivially ready.
#[tokio::test]
async fn test_empty_data() {
    let h = harness();
    let mut app = copy_application_csv("notebook");
    app.spec.data.clear();

    let outcome = h.reconciler.reconcile(&mut app).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Done);

    let status = app.status.as_ref().unwrap();
    assert!(status.ready);
    assert!(error_messages(&app).is_empty());
    assert!(generated(&app).is_none());
}

// =============================================================================
// Plotter Status Propagation
// =============================================================================

/// The plotter's observed state propagates into the application status.
#[tokio::test]
async fn test_plotter_state_propagates() {
    let h = harness();
    h.modules.install(module_read_parquet());

    let mut app = data_usage_application("read-test", "s3/allow-dataset");
    h.reconciler.reconcile(&mut app).await.unwrap();
    let reference = generated(&app).unwrap();
    assert_eq!(reference.app_version, app.generation());

    // The runner reports an orchestration failure
    let error_msg = "failure to orchestrate modules";
    h.plotters.set_observed_state(
        &reference,
        ObservedState {
            ready: false,
            error: error_msg.to_string(),
            data_access_instructions: String::new(),
        },
    );
    h.reconciler.reconcile(&mut app).await.unwrap();
    assert!(error_messages(&app).contains(error_msg));
    assert!(!app.status.as_ref().unwrap().ready);

    // The runner recovers
    h.plotters.set_observed_state(
        &reference,
        ObservedState {
            ready: true,
            error: String::new(),
            data_access_instructions: "connect via arrow-flight".to_string(),
        },
    );
    let outcome = h.reconciler.reconcile(&mut app).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Done);
    let status = app.status.as_ref().unwrap();
    assert!(status.ready);
    assert_eq!(status.data_access_instructions, "connect via arrow-flight");
}

/// A plotter generated for an older spec version is ignored; the spec
/// bump forces a re-plan.
#[tokio::test]
async fn test_stale_plotter_is_ignored() {
    let h = harness();

    let mut app = copy_application_csv("notebook");
    app.metadata.generation = Some(2);
    let stale = ResourceReference {
        name: "notebook-default".to_string(),
        namespace: "dataflow-system".to_string(),
        kind: "Plotter".to_string(),
        app_version: 1,
    };
    // The old plotter reports ready, but it belongs to generation 1
    h.plotters
        .create_or_update(
            &dataflow_operator::domain::ports::NamespacedName::new("notebook", "default"),
            &stale,
            Default::default(),
        )
        .await
        .unwrap();
    h.plotters.set_observed_state(
        &stale,
        ObservedState {
            ready: true,
            ..Default::default()
        },
    );
    app.status = Some(DataApplicationStatus {
        ready: true,
        observed_generation: 1,
        generated: Some(stale),
        ..Default::default()
    });

    // No modules are installed, so the re-plan must fail rather than
    // echo the stale readiness
    h.reconciler.reconcile(&mut app).await.unwrap();
    let status = app.status.as_ref().unwrap();
    assert!(!status.ready);
    assert!(!error_messages(&app).is_empty());
    assert_eq!(status.observed_generation, 2);
}

// =============================================================================
// Storage Lifecycle
// =============================================================================

/// A re-plan that drops a dataset deletes its bucket and status entry.
#[tokio::test]
async fn test_orphan_bucket_collected() {
    let h = harness();
    h.modules.install(module_read_parquet());
    h.modules.install(copy_db2_parquet());
    h.accounts.add(account_theshire());

    let mut app = data_usage_application("read-test", "db2/redact-dataset");
    h.reconciler.reconcile(&mut app).await.unwrap();
    let bucket = app.status.as_ref().unwrap().provisioned_storage["db2/redact-dataset"]
        .dataset_ref
        .clone();
    assert!(h.provision.allocated().contains(&bucket));

    // The user replaces the copied dataset with one served in place
    app.spec.data[0].data_set_id = "s3/allow-dataset".to_string();
    app.metadata.generation = Some(2);
    h.reconciler.reconcile(&mut app).await.unwrap();

    let status = app.status.as_ref().unwrap();
    assert!(status.provisioned_storage.is_empty());
    assert!(h.provision.deleted().contains(&bucket));
}

/// A bucket allocated for a dataset that planned successfully stays
/// tracked in the status even when another dataset fails and no plotter
/// is written, so teardown can still reclaim it.
#[tokio::test]
async fn test_partial_failure_keeps_bucket_tracked() {
    let h = harness();
    h.modules.install(module_read_parquet());
    h.modules.install(copy_db2_parquet());
    h.accounts.add(account_theshire());

    let mut app = data_usage_application("read-test", "db2/redact-dataset");
    app.spec.data.push(DataContext {
        data_set_id: "kafka/allow-dataset".to_string(),
        requirements: DataRequirements {
            interface: InterfaceDetails::new("arrow-flight", "arrow"),
            ..Default::default()
        },
    });

    h.reconciler.reconcile(&mut app).await.unwrap();
    assert!(!error_messages(&app).is_empty());
    assert!(generated(&app).is_none());

    let bucket = app.status.as_ref().unwrap().provisioned_storage["db2/redact-dataset"]
        .dataset_ref
        .clone();
    assert!(h.provision.allocated().contains(&bucket));

    h.reconciler
        .delete_external_resources(&mut app)
        .await
        .unwrap();
    assert!(h.provision.deleted().contains(&bucket));
    assert!(app
        .status
        .as_ref()
        .unwrap()
        .provisioned_storage
        .is_empty());
}

/// Once the plotter is ready, a copy destined for a catalog is
/// registered and its bucket becomes persistent.
#[tokio::test]
async fn test_registration_on_ready() {
    let h = harness();
    h.modules.install(implicit_copy_batch());
    h.accounts.add(account_theshire());

    let mut app = ingest_application("ingest", "s3-external/allow-theshire");
    h.reconciler.reconcile(&mut app).await.unwrap();
    let reference = generated(&app).unwrap();

    h.plotters.set_observed_state(
        &reference,
        ObservedState {
            ready: true,
            ..Default::default()
        },
    );
    h.reconciler.reconcile(&mut app).await.unwrap();

    let status = app.status.as_ref().unwrap();
    assert!(status.ready);
    let new_asset_id = &status.cataloged_assets["s3-external/allow-theshire"];
    assert!(new_asset_id.starts_with("ingest-catalog/"));
    assert_eq!(h.catalog.registered().len(), 1);

    let bucket = status.provisioned_storage["s3-external/allow-theshire"]
        .dataset_ref
        .clone();
    assert!(h.provision.is_persistent(&bucket));

    // Registration happens once
    h.reconciler.reconcile(&mut app).await.unwrap();
    assert_eq!(h.catalog.registered().len(), 1);
}

/// Teardown removes buckets and the generated plotter.
#[tokio::test]
async fn test_teardown_removes_external_resources() {
    let h = harness();
    h.modules.install(module_read_parquet());
    h.modules.install(copy_db2_parquet());
    h.accounts.add(account_theshire());

    let mut app = data_usage_application("read-test", "db2/redact-dataset");
    h.reconciler.reconcile(&mut app).await.unwrap();
    let reference = generated(&app).unwrap();
    let bucket = app.status.as_ref().unwrap().provisioned_storage["db2/redact-dataset"]
        .dataset_ref
        .clone();

    h.reconciler
        .delete_external_resources(&mut app)
        .await
        .unwrap();

    let status = app.status.as_ref().unwrap();
    assert!(status.provisioned_storage.is_empty());
    assert!(status.generated.is_none());
    assert!(h.provision.deleted().contains(&bucket));
    assert!(h.plotters.get(&reference).is_none());
}

// =============================================================================
// Determinism
// =============================================================================

/// Identical inputs produce byte-identical plotter specs.
#[tokio::test]
async fn test_plan_determinism() {
    let mut specs = Vec::new();
    for _ in 0..2 {
        let h = harness();
        h.modules.install(module_read_parquet());
        h.modules.install(copy_db2_parquet());
        h.accounts.add(account_theshire());

        let mut app = data_usage_application("read-test", "db2/redact-dataset");
        app.spec.data.push(DataContext {
            data_set_id: "s3/allow-dataset".to_string(),
            requirements: DataRequirements {
                interface: InterfaceDetails::new("arrow-flight", "arrow"),
                ..Default::default()
            },
        });
        h.reconciler.reconcile(&mut app).await.unwrap();
        let plotter = h.plotters.get(&generated(&app).unwrap()).unwrap();
        specs.push(serde_json::to_string(&plotter.spec).unwrap());
    }
    assert_eq!(specs[0], specs[1]);
}
