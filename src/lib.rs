//! Stackbed - layered cloud test-infrastructure provisioning
//!
//! Stackbed stands up the chain of cloud resource stacks that scheduler
//! integration tests depend on (network VPC -> serverless accounting
//! database -> external slurmdbd host), propagating each stack's outputs
//! into the next stack's parameters, and tears everything down again in
//! reverse order when the test scope ends.
//!
//! Any layer can be substituted with a pre-existing stack supplied by the
//! run configuration, in which case that layer is never created or deleted
//! and dependent layers read their inputs from explicit override blocks
//! instead of stack outputs.
//!
//! # Modules
//!
//! - [`config`] - Read-only run configuration consumed by the layer chain
//! - [`descriptor`] - Stack descriptor value type (request + outputs)
//! - [`provider`] - Traits for the cloud provider, secret store, and AMI resolver
//! - [`factory`] - Stack creation/tracking/deletion against the provider
//! - [`network`] - Declarative network topology to template builder
//! - [`naming`] - Generated stack names, cluster names, passwords, addresses
//! - [`secrets`] - Munge-key secret provisioning
//! - [`layers`] - The layer composer: network, database, compute
//! - [`scope`] - Scoped acquire/release controller for one test scope
//! - [`telemetry`] - Logging initialization
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod descriptor;
pub mod error;
pub mod factory;
pub mod layers;
pub mod naming;
pub mod network;
pub mod provider;
pub mod scope;
pub mod secrets;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
