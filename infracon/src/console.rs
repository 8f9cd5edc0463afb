//! Console facade - what a UI layer talks to.
//!
//! Bundles the orchestrator connection, the chain runner and the provider
//! registry, and recomputes permitted actions once chains have finished.

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actions::{Action, ActionSet, FilterContext, actions_for, actions_for_raw, ensure_permitted};
use crate::chain::{Chain, ChainEvent, ChainReport, ChainRunner};
use crate::client::HttpOrchestrator;
use crate::config::ConsoleConfig;
use crate::error::{ActionError, ChainError, ConsoleError, Result};
use crate::job::JobPoller;
use crate::orchestrator::{Orchestrator, params};
use crate::registry::ProviderRegistry;
use crate::resource::{ResourceKind, ResourceState};

pub struct Console {
    orchestrator: Arc<dyn Orchestrator>,
    registry: Arc<ProviderRegistry>,
    runner: ChainRunner,
}

impl Console {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, poll_interval: Duration) -> Self {
        let poller = JobPoller::new(Arc::clone(&orchestrator), poll_interval);
        Self {
            orchestrator,
            registry: Arc::new(ProviderRegistry::new()),
            runner: ChainRunner::new(poller),
        }
    }

    /// Console over the HTTP API described by `config`.
    pub fn from_config(config: &ConsoleConfig) -> Result<Self> {
        let orchestrator = HttpOrchestrator::new(config)?;
        info!(endpoint = %orchestrator.endpoint(), "Connected console");
        Ok(Self::new(Arc::new(orchestrator), config.poll_interval()))
    }

    pub fn orchestrator(&self) -> Arc<dyn Orchestrator> {
        Arc::clone(&self.orchestrator)
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn poller(&self) -> &JobPoller {
        self.runner.poller()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.runner.subscribe()
    }

    /// Run a chain. Chains that change providers refetch the registry entry
    /// of their physical network afterwards, whether or not they succeeded.
    pub async fn run_chain(
        &self,
        chain: Chain,
        cancel: &CancellationToken,
    ) -> std::result::Result<ChainReport, ChainError> {
        let provider_network = chain.provider_network().map(str::to_string);
        let result = self.runner.run(chain, cancel).await;

        if let Some(physnet) = provider_network {
            if let Err(e) = self
                .registry
                .refresh(self.orchestrator.as_ref(), &physnet)
                .await
            {
                warn!(physical_network_id = %physnet, error = %e, "Provider refresh failed");
            }
        }

        result
    }

    /// Perform `action` on a resource through `chain` and return the actions
    /// permitted afterwards.
    ///
    /// The action is checked against the resource's current state before any
    /// step runs. On success the chain's output is read back as the
    /// resource's new state; when the output is not a record of this
    /// resource, the resource is refetched instead.
    pub async fn run_action(
        &self,
        kind: ResourceKind,
        id: &str,
        action: Action,
        chain: Chain,
        ctx: &FilterContext,
        cancel: &CancellationToken,
    ) -> std::result::Result<ActionSet, ActionError> {
        let state = self.fetch_state(kind, id).await?;
        if let Err(e) = ensure_permitted(&state, action, ctx) {
            warn!(kind = %kind, id = %id, action = %action, "Refusing action");
            return Err(e.into());
        }

        info!(kind = %kind, id = %id, action = %action, chain = %chain.name(), "Running action");
        let report = self.run_chain(chain, cancel).await?;

        match ResourceState::from_raw(kind, &report.output) {
            Ok(state) if state.id() == id => Ok(actions_for(&state, ctx)),
            _ => {
                debug!(kind = %kind, id = %id, "Chain output is not the resource, refetching");
                Ok(self.refresh_actions(kind, id, ctx).await?)
            }
        }
    }

    /// Actions permitted on a raw resource record.
    pub fn actions_for(&self, kind: ResourceKind, raw: &Value, ctx: &FilterContext) -> ActionSet {
        actions_for_raw(kind, raw, ctx)
    }

    /// Fetch a resource by id and return its current state.
    pub async fn fetch_state(&self, kind: ResourceKind, id: &str) -> Result<ResourceState> {
        let records = self
            .orchestrator
            .list_resource(kind, &params([("id", id)]))
            .await?;
        let raw = records.into_iter().next().ok_or_else(|| {
            ConsoleError::MalformedResponse(format!("{} {} not found", kind, id))
        })?;
        ResourceState::from_raw(kind, &raw)
    }

    /// Refetch a resource and recompute its permitted actions.
    pub async fn refresh_actions(
        &self,
        kind: ResourceKind,
        id: &str,
        ctx: &FilterContext,
    ) -> Result<ActionSet> {
        let state = self.fetch_state(kind, id).await?;
        Ok(actions_for(&state, ctx))
    }

    /// [`refresh_actions`](Self::refresh_actions) for several resources at once.
    pub async fn refresh_all_actions(
        &self,
        kind: ResourceKind,
        ids: &[&str],
        ctx: &FilterContext,
    ) -> Result<Vec<(String, ActionSet)>> {
        try_join_all(ids.iter().map(|id| async move {
            let actions = self.refresh_actions(kind, id, ctx).await?;
            Ok::<_, ConsoleError>((id.to_string(), actions))
        }))
        .await
    }
}
