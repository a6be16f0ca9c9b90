//! Scoped acquire/release controller
//!
//! A [`TestScope`] wraps the layer chain for the duration of one test
//! scope: `provision` acquires the layers in dependency order, `teardown`
//! releases them in strict reverse creation order (or preserves them all
//! when the run is configured not to delete). Release is best-effort: a
//! failed deletion is reported in the returned [`TeardownReport`], never
//! raised, and never prevents the remaining deletions.
//!
//! `teardown` must run on every exit path, including a failed `provision`
//! and a failed test body - a provisioning failure leaves the partial
//! stack tracked, and only teardown clears it. Deletion is asynchronous,
//! so it cannot run in `Drop`; dropping a scope that still tracks stacks
//! logs a warning instead.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::RunConfig;
use crate::factory::{TeardownOutcome, TeardownReport};
use crate::layers::{self, ComputeLayer, DatabaseLayer, LayerContext, NetworkLayer};
use crate::network::VpcConfig;
use crate::provider::{CloudProvider, ImageResolver, SecretStore};
use crate::secrets::SecretHandle;
use crate::Result;

/// Owns the layer chain for one test scope
pub struct TestScope {
    ctx: LayerContext,
    network: Option<NetworkLayer>,
    database: Option<DatabaseLayer>,
    compute: Option<ComputeLayer>,
    munge_key: Option<SecretHandle>,
    released: bool,
}

impl TestScope {
    /// Create a scope from the run configuration and collaborators
    pub fn new(
        config: RunConfig,
        provider: Arc<dyn CloudProvider>,
        secret_store: Arc<dyn SecretStore>,
        image_resolver: Arc<dyn ImageResolver>,
    ) -> Self {
        Self {
            ctx: LayerContext::new(config, provider, secret_store, image_resolver),
            network: None,
            database: None,
            compute: None,
            munge_key: None,
            released: false,
        }
    }

    /// Build the full layer chain in dependency order
    ///
    /// Each layer handle is stored as soon as it completes, so a failure
    /// partway through still leaves the earlier layers (and the failed
    /// stack, via the factory's tracked set) eligible for teardown. Call
    /// once per scope.
    pub async fn provision(&mut self, topology: VpcConfig) -> Result<()> {
        let network = layers::network_layer(&mut self.ctx, topology).await?;
        self.network = Some(network.clone());

        let database = layers::database_layer(&mut self.ctx, &network).await?;
        self.database = Some(database.clone());

        let munge_key = layers::munge_key(&self.ctx).await?;
        self.munge_key = Some(munge_key.clone());

        let compute = layers::compute_layer(&mut self.ctx, &network, &database, &munge_key).await?;
        self.compute = Some(compute);
        Ok(())
    }

    /// The network layer, once provisioned
    pub fn network(&self) -> Option<&NetworkLayer> {
        self.network.as_ref()
    }

    /// The database layer, once provisioned
    pub fn database(&self) -> Option<&DatabaseLayer> {
        self.database.as_ref()
    }

    /// The compute layer, once provisioned
    pub fn compute(&self) -> Option<&ComputeLayer> {
        self.compute.as_ref()
    }

    /// The munge-key secret handle, once provisioned
    pub fn munge_key(&self) -> Option<&SecretHandle> {
        self.munge_key.as_ref()
    }

    /// The run configuration
    pub fn config(&self) -> &RunConfig {
        &self.ctx.config
    }

    /// Release every stack this scope owns
    ///
    /// In preserve mode nothing is deleted; every owned stack is reported
    /// as [`TeardownOutcome::Preserved`] and abandoned. Otherwise stacks
    /// that never became a layer (failed creates) are swept first, newest
    /// first, then the owned layers in strict reverse creation order:
    /// compute, then database, then network. Borrowed layers are never
    /// deleted.
    pub async fn teardown(mut self) -> TeardownReport {
        self.released = true;

        if self.ctx.config.preserve_on_teardown {
            let mut report = TeardownReport::new();
            for (name, region) in self.ctx.factory.tracked_stacks().into_iter().rev() {
                warn!(
                    stack = %name,
                    region = %region,
                    "Not deleting stack because the run preserves resources"
                );
                report.push((name, TeardownOutcome::Preserved));
            }
            return report;
        }

        let layer_keys: Vec<(String, String)> = [
            self.compute.as_ref().map(ComputeLayer::handle),
            self.database.as_ref().map(DatabaseLayer::handle),
            self.network.as_ref().map(NetworkLayer::handle),
        ]
        .into_iter()
        .flatten()
        .filter(|h| !h.is_borrowed())
        .map(|h| (h.name().to_string(), h.region().to_string()))
        .collect();

        let mut report = TeardownReport::new();

        // Stacks tracked by the factory but never exposed as a layer are
        // failed creates; they are newer than any completed layer, so they
        // go first to keep the overall order reverse-of-creation.
        let stragglers: Vec<(String, String)> = self
            .ctx
            .factory
            .tracked_stacks()
            .into_iter()
            .rev()
            .filter(|key| !layer_keys.contains(key))
            .collect();
        for (name, region) in stragglers {
            report.push(self.ctx.factory.delete(&name, &region).await);
        }

        for (name, region) in &layer_keys {
            report.push(self.ctx.factory.delete(name, region).await);
        }

        info!(stacks = report.len(), "Test scope teardown complete");
        report
    }
}

impl Drop for TestScope {
    fn drop(&mut self) {
        if !self.released && self.ctx.factory.tracked_len() > 0 {
            warn!(
                tracked = self.ctx.factory.tracked_len(),
                "Test scope dropped without teardown; owned stacks were not released"
            );
        }
    }
}
