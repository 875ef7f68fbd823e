//! Data-flow Operator - Policy-Governed Data Plane Controller
//!
//! A Kubernetes operator that reconciles DataApplications into concrete
//! plans. For every declared dataset the controller resolves metadata
//! through a data catalog, consults a policy manager for enforcement
//! actions, materializes a governed copy where one is needed, selects
//! data-plane modules satisfying interface and action requirements, and
//! emits a Plotter with one blueprint per cluster for a separate runner
//! to execute.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     DataApplication Reconciler                   │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌───────────────┐  ┌───────────────────────┐  │
//! │  │   Planner    │  │    Module     │  │      Blueprint        │  │
//! │  │ (copy/read)  │  │   Selector    │  │      Generation       │  │
//! │  └──────┬───────┘  └───────┬───────┘  └──────────┬────────────┘  │
//! │         │                  │                     │               │
//! │         └──────────────────┼─────────────────────┘               │
//! │                            │                                     │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                    External Collaborators                        │
//! │  ┌────────────┐ ┌────────────┐ ┌───────────┐ ┌───────────────┐   │
//! │  │    Data    │ │   Policy   │ │  Cluster  │ │    Storage    │   │
//! │  │  Catalog   │ │  Manager   │ │  Registry │ │  Provisioner  │   │
//! │  └────────────┘ └────────────┘ └───────────┘ └───────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: reconciler, planner, module selection, blueprints
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: collaborator ports and wire types
//! - [`connectors`]: catalog, policy manager and cluster registry clients
//! - [`storage`]: bucket provisioning through Dataset resources
//! - [`taxonomy`]: admission validation against the taxonomy schema
//! - [`mockup`]: in-memory collaborators for tests

pub mod config;
pub mod connectors;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod mockup;
pub mod storage;
pub mod taxonomy;
pub mod vault;

// Re-export commonly used types
pub use config::ControllerConfig;

pub use controller::{
    ApplicationReconciler, DataInfo, ModuleInstanceSpec, ModuleManager, ModuleSelector,
    ReconcileOutcome,
};

pub use crd::{
    BlueprintSpec, CapabilityType, DataApplication, DataApplicationSpec, DataApplicationStatus,
    DataModule, DataModuleSpec, InterfaceDetails, ObservedState, Plotter, PlotterSpec,
    ResourceReference, StorageAccount, StorageAccountSpec,
};

pub use domain::ports::{
    Cluster, ClusterLister, Connection, DataCatalog, DataDetails, EnforcementAction,
    ModuleRegistry, PlotterService, PolicyManager, StorageAccountLister, StorageProvisioner,
};

pub use error::{Error, ErrorAction, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
