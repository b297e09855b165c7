//! Builder module for creating a live [`Orchestrator`].
//!
//! [`OrchestratorBuilder`] resolves the target network from a [`HatchConfig`], connects to
//! its node, binds the deployer account and sets up the explorer client when the network
//! verifies sources.

use anyhow::{Context, Result};

use crate::{
    ArtifactStore, CancelSignal, EtherscanClient, HatchConfig, ManifestStore, NodeSigner,
    Orchestrator, RpcChain, TrustLevel, rpc::JsonRpc,
};

/// An orchestrator talking to a real node and explorer.
pub type LiveOrchestrator = Orchestrator<NodeSigner, RpcChain, EtherscanClient, ArtifactStore>;

/// Builder for a [`LiveOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorBuilder {
    config: HatchConfig,
    network: Option<String>,
    redeploy: bool,
    cancel: Option<CancelSignal>,
}

impl OrchestratorBuilder {
    pub fn new(config: HatchConfig) -> Self {
        Self {
            config,
            network: None,
            redeploy: false,
            cancel: None,
        }
    }

    /// Target network. Defaults to the configured `default_network`.
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    /// Set the network if provided.
    pub fn maybe_network(mut self, network: Option<impl Into<String>>) -> Self {
        if let Some(network) = network {
            self.network = Some(network.into());
        }
        self
    }

    pub fn redeploy(mut self, redeploy: bool) -> Self {
        self.redeploy = redeploy;
        self
    }

    pub fn cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Connect to the network and build the orchestrator.
    pub async fn build(self) -> Result<LiveOrchestrator> {
        let network = self
            .network
            .unwrap_or_else(|| self.config.default_network.clone());

        let registry = self
            .config
            .network_registry()
            .context("Invalid network configuration")?;
        let profile = registry.resolve(&network)?;

        tracing::info!(
            network = %profile.network_id,
            chain_id = profile.chain_id,
            trust = %profile.trust_level,
            confirmations = profile.required_confirmations(),
            "Network resolved"
        );

        let rpc = JsonRpc::new(profile.rpc_url.clone())?;
        let chain = RpcChain::new(rpc.clone());

        let chain_id = chain
            .chain_id()
            .await
            .with_context(|| format!("Failed to reach {} at {}", network, profile.rpc_url))?;
        if chain_id != profile.chain_id {
            anyhow::bail!(
                "Node at {} reports chain id {}, but network '{}' expects {}",
                profile.rpc_url,
                chain_id,
                network,
                profile.chain_id
            );
        }

        let signer = NodeSigner::connect(rpc, profile.deployer)
            .await
            .context("Failed to bind deployer account")?;

        let explorer = EtherscanClient::for_profile(&profile, self.config.status_polling())?;
        if profile.trust_level == TrustLevel::Public && explorer.is_none() {
            tracing::warn!(
                network = %network,
                "No explorer API key configured, contracts will not be verified"
            );
        }

        let orchestrator = Orchestrator::new(
            registry,
            network,
            signer,
            chain,
            explorer,
            ArtifactStore::new(&self.config.artifacts),
            ManifestStore::open(&self.config.manifest),
            self.config.confirmation_policy(),
            self.config.retry_policy()?,
        )
        .with_redeploy(self.redeploy);

        Ok(match self.cancel {
            Some(cancel) => orchestrator.with_cancel(cancel),
            None => orchestrator,
        })
    }
}
