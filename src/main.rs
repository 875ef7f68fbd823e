//! Data-flow Operator
//!
//! Controller entry point: parses configuration, starts the health and
//! metrics servers and runs the DataApplication control loop against the
//! cluster.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dataflow_operator::connectors::{ConfigMapClusterLister, HttpDataCatalog, HttpPolicyManager};
use dataflow_operator::controller::{
    runtime, ApplicationReconciler, KubeModuleRegistry, KubePlotterService,
    KubeStorageAccountLister,
};
use dataflow_operator::storage::DatasetProvisioner;
use dataflow_operator::{ControllerConfig, Error, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Data-flow Operator - Policy-Governed Data Plane Controller
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Controller name, used to derive the finalizer
    #[arg(long, env = "CONTROLLER_NAME", default_value = "dataflow-controller")]
    controller_name: String,

    /// Namespace holding plotters, modules, accounts and buckets
    #[arg(long, env = "CONTROL_PLANE_NAMESPACE", default_value = "dataflow-system")]
    control_plane_namespace: String,

    /// Data catalog base URL
    #[arg(long, env = "CATALOG_ADDR", default_value = "http://catalog-connector:8080")]
    catalog_addr: String,

    /// Policy manager base URL
    #[arg(long, env = "POLICY_MANAGER_ADDR", default_value = "http://policy-manager:8080")]
    policy_manager_addr: String,

    /// Secret store base address
    #[arg(long, env = "VAULT_ADDR", default_value = "http://vault.dataflow-system:8200")]
    vault_addr: String,

    /// Region assumed when an application declares no workload
    #[arg(long, env = "DEFAULT_REGION", default_value = "theshire")]
    default_region: String,

    /// ConfigMap listing the available clusters
    #[arg(long, env = "CLUSTER_INVENTORY", default_value = "cluster-inventory")]
    cluster_inventory: String,

    /// Path to the compiled taxonomy schema
    #[arg(
        long,
        env = "TAXONOMY_SCHEMA",
        default_value = "/etc/taxonomy/application.values.schema.json"
    )]
    taxonomy_schema: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting Data-flow Operator");
    info!("  Version: {}", dataflow_operator::VERSION);
    info!("  Control plane namespace: {}", args.control_plane_namespace);
    info!("  Catalog: {}", args.catalog_addr);
    info!("  Policy manager: {}", args.policy_manager_addr);

    let config = ControllerConfig {
        controller_name: args.controller_name.clone(),
        control_plane_namespace: args.control_plane_namespace.clone(),
        vault_address: args.vault_addr.clone(),
        default_region: args.default_region.clone(),
        taxonomy_schema_path: args.taxonomy_schema.clone(),
    };

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    let client = kube::Client::try_default()
        .await
        .map_err(Error::from)?;

    let reconciler = ApplicationReconciler {
        catalog: Arc::new(HttpDataCatalog::new(&args.catalog_addr)?),
        policy: Arc::new(HttpPolicyManager::new(&args.policy_manager_addr)?),
        clusters: Arc::new(ConfigMapClusterLister::new(
            client.clone(),
            &args.control_plane_namespace,
            &args.cluster_inventory,
        )),
        provision: Arc::new(DatasetProvisioner::new(client.clone())),
        modules: Arc::new(KubeModuleRegistry::new(
            client.clone(),
            &args.control_plane_namespace,
        )),
        accounts: Arc::new(KubeStorageAccountLister::new(
            client.clone(),
            &args.control_plane_namespace,
        )),
        plotters: Arc::new(KubePlotterService::new(client.clone())),
        config,
    };

    info!("Starting the control loop");
    runtime::run(client, reconciler).await?;

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("kube=info".parse().unwrap())
        .add_directive("tower=warn".parse().unwrap());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" => Response::builder()
                    .status(StatusCode::OK)
                    .body(Body::from("ok"))
                    .unwrap(),
                "/readyz" => Response::builder()
                    .status(StatusCode::OK)
                    .body(Body::from("ok"))
                    .unwrap(),
                _ => Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Body::from("not found"))
                    .unwrap(),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid health server address: {}", e)))?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    // Register controller metrics
    let _ = prometheus::register_counter!(
        "dataflow_operator_reconciles_total",
        "Total number of application reconciliations"
    );
    let _ = prometheus::register_counter!(
        "dataflow_operator_plans_generated_total",
        "Total number of plotters generated"
    );
    let _ = prometheus::register_counter_vec!(
        "dataflow_operator_dataset_errors_total",
        "Per-dataset planning failures by kind",
        &["kind"]
    );
    let _ = prometheus::register_histogram!(
        "dataflow_operator_plan_duration_seconds",
        "Duration of planning runs"
    );

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let metric_families = prometheus::gather();
                    let mut buffer = Vec::new();
                    encoder.encode(&metric_families, &mut buffer).unwrap();

                    Response::builder()
                        .status(StatusCode::OK)
                        .header("Content-Type", encoder.format_type())
                        .body(Body::from(buffer))
                        .unwrap()
                }
                _ => Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Body::from("not found"))
                    .unwrap(),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid metrics server address: {}", e)))?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
