//! Custom Resource Definitions for the data-flow control plane
//!
//! This module contains all CRD types:
//! - DataApplication: user-declared workload and dataset requirements
//! - DataModule: installable data-plane component with capabilities
//! - Plotter: the generated plan, one blueprint per cluster
//! - StorageAccount: candidate destination for dataset copies

pub mod application;
pub mod common;
pub mod module;
pub mod plotter;
pub mod storage_account;

pub use application::*;
pub use common::*;
pub use module::*;
pub use plotter::*;
pub use storage_account::*;
