//! Collaborator traits for cloud-facing operations
//!
//! The orchestrator never talks to a cloud SDK directly; everything goes
//! through these narrow async traits. Implementations are expected to do
//! their own polling and waiting - `submit_create` returns only once the
//! stack has reached a terminal state, and `submit_delete` once deletion
//! has been requested and acknowledged. Timeouts and backoff live behind
//! these seams, not in the orchestrator.

use std::collections::BTreeMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::descriptor::StackDescriptor;
use crate::Result;

/// Trait abstracting the cloud provisioning service
///
/// This trait allows mocking provisioning in tests while a real
/// implementation drives the cloud SDK in integration environments.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Submit a stack for creation and wait for a terminal state
    ///
    /// Returns the stack's outputs on success. An `Err` means the provider
    /// reported creation failure or timed out waiting for completion.
    async fn submit_create(&self, stack: &StackDescriptor) -> Result<BTreeMap<String, String>>;

    /// Request deletion of the named stack
    async fn submit_delete(&self, name: &str, region: &str) -> Result<()>;
}

/// Trait abstracting the external secret service
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Store a secret string, returning an opaque reference handle
    async fn put(&self, region: &str, secret_string: &str) -> Result<String>;
}

/// Trait abstracting AMI lookup
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageResolver: Send + Sync {
    /// Resolve the latest image id for the given OS and image family
    async fn resolve(&self, region: &str, os_family: &str, image_family: &str) -> Result<String>;
}
