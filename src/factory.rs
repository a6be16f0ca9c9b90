//! Stack creation, tracking, and best-effort deletion
//!
//! The [`StackFactory`] is the only component that talks to the
//! [`CloudProvider`] for stack lifecycle operations. Every stack it creates
//! is tracked by `(name, region)` in creation order - including failed
//! creates, so a partially provisioned stack can still be cleaned up later.
//! Deletion is lenient: one stuck or already-deleted stack must not prevent
//! cleanup of its peers, so delete failures are logged and reported in a
//! [`TeardownReport`] instead of raised.

use std::sync::Arc;

use tracing::{info, warn};

use crate::descriptor::StackDescriptor;
use crate::provider::CloudProvider;
use crate::{Error, Result};

/// Outcome of one teardown attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// Deletion was requested and acknowledged by the provider
    Deleted,
    /// Deletion was skipped because the run preserves resources
    Preserved,
    /// Deletion failed; the message describes why
    Failed(String),
}

/// Aggregated teardown outcomes, one entry per stack, in attempt order
pub type TeardownReport = Vec<(String, TeardownOutcome)>;

#[derive(Clone, Debug, PartialEq, Eq)]
struct StackKey {
    name: String,
    region: String,
}

/// Creates stacks against the cloud provider and tracks them for teardown
pub struct StackFactory {
    provider: Arc<dyn CloudProvider>,
    tracked: Vec<StackKey>,
}

impl StackFactory {
    /// Create a new factory backed by the given provider
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self {
            provider,
            tracked: Vec::new(),
        }
    }

    /// Create a stack and wait for the provider to reach a terminal state
    ///
    /// The stack is added to the tracked set before the create is submitted,
    /// so a failed or timed-out create still leaves the stack eligible for a
    /// later best-effort delete. On success the returned descriptor carries
    /// the provider-assigned outputs.
    pub async fn create(&mut self, mut stack: StackDescriptor) -> Result<StackDescriptor> {
        info!(stack = %stack.name(), region = %stack.region(), "Creating stack");
        self.track(stack.name(), stack.region());

        let outputs = match self.provider.submit_create(&stack).await {
            Ok(outputs) => outputs,
            Err(e) => {
                warn!(stack = %stack.name(), error = %e, "Stack creation failed");
                return Err(match e {
                    e @ Error::Provisioning { .. } => e,
                    e => Error::provisioning(stack.name(), stack.region(), e.to_string()),
                });
            }
        };

        stack.record_outputs(outputs);
        info!(stack = %stack.name(), "Creation of stack complete");
        Ok(stack)
    }

    /// Delete the named stack, best-effort
    ///
    /// The stack is removed from the tracked set regardless of outcome. A
    /// provider failure is logged and reported, never raised - teardown must
    /// not abort subsequent cleanups.
    pub async fn delete(&mut self, name: &str, region: &str) -> (String, TeardownOutcome) {
        self.tracked
            .retain(|k| !(k.name == name && k.region == region));
        self.delete_untracked(name, region).await
    }

    /// Delete every tracked stack, newest first
    ///
    /// Individual failures are aggregated into the report and never abort
    /// the sweep. Callers that need a stricter ordering than
    /// reverse-creation (for example across layers with cross-references)
    /// enforce it by calling [`StackFactory::delete`] per stack themselves.
    pub async fn delete_all(&mut self) -> TeardownReport {
        let mut report = TeardownReport::new();
        while let Some(key) = self.tracked.pop() {
            report.push(self.delete_untracked(&key.name, &key.region).await);
        }
        report
    }

    /// Number of stacks currently tracked for teardown
    pub fn tracked_len(&self) -> usize {
        self.tracked.len()
    }

    /// `(name, region)` of every tracked stack, in creation order
    pub fn tracked_stacks(&self) -> Vec<(String, String)> {
        self.tracked
            .iter()
            .map(|k| (k.name.clone(), k.region.clone()))
            .collect()
    }

    /// Whether the named stack is tracked for teardown
    pub fn is_tracked(&self, name: &str, region: &str) -> bool {
        self.tracked
            .iter()
            .any(|k| k.name == name && k.region == region)
    }

    fn track(&mut self, name: &str, region: &str) {
        if !self.is_tracked(name, region) {
            self.tracked.push(StackKey {
                name: name.to_string(),
                region: region.to_string(),
            });
        }
    }

    async fn delete_untracked(&self, name: &str, region: &str) -> (String, TeardownOutcome) {
        info!(stack = %name, region = %region, "Deleting stack");
        match self.provider.submit_delete(name, region).await {
            Ok(()) => (name.to_string(), TeardownOutcome::Deleted),
            Err(e) => {
                warn!(stack = %name, region = %region, error = %e, "Stack deletion failed");
                (name.to_string(), TeardownOutcome::Failed(e.to_string()))
            }
        }
    }
}
