//! Core domain types and collaborator ports

pub mod ports;

pub use ports::*;
