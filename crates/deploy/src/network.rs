//! Network profiles: how much a network is trusted and what deploying to it requires.

use std::{collections::BTreeMap, fmt};

use alloy_core::primitives::Address;
use derive_more::Deref;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::DeployError;

/// Trust classification of a network.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TrustLevel {
    /// Development chains (hardhat, anvil, localhost). One confirmation, no explorer.
    Local,
    /// Live chains where reorgs happen and sources get published.
    Public,
}

/// An explorer API key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key, treating blank values as absent.
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            None
        } else {
            Some(Self(key))
        }
    }

    /// The raw key, for building explorer requests only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// The account that signs deployments on a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployerAccount {
    /// An explicit address unlocked on the node.
    Address(Address),
    /// An index into the node's `eth_accounts` (0 is the conventional `deployer`).
    NodeAccount(usize),
}

impl Default for DeployerAccount {
    fn default() -> Self {
        DeployerAccount::NodeAccount(0)
    }
}

/// Where and how to verify sources for a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplorerEndpoint {
    /// Etherscan-compatible API endpoint.
    pub api_url: Url,
    /// `None` disables verification on the network.
    pub api_key: Option<ApiKey>,
}

/// Profile resolved from static configuration for a single network.
///
/// Profiles are immutable once built. Local profiles always require exactly one
/// confirmation; public profiles require at least one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkProfile {
    /// Name the network is selected by, e.g. `sepolia`.
    pub network_id: String,
    /// Chain id the node must report.
    pub chain_id: u64,
    pub trust_level: TrustLevel,
    /// JSON-RPC endpoint of the node.
    pub rpc_url: Url,
    /// Account deployments are signed with.
    pub deployer: DeployerAccount,
    required_confirmations: u64,
    explorer: Option<ExplorerEndpoint>,
}

/// Invalid network definitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    #[error("public network '{0}' must require at least one confirmation")]
    ZeroConfirmations(String),
}

impl NetworkProfile {
    /// A development network.
    pub fn local(network_id: impl Into<String>, chain_id: u64, rpc_url: Url) -> Self {
        Self {
            network_id: network_id.into(),
            chain_id,
            trust_level: TrustLevel::Local,
            rpc_url,
            deployer: DeployerAccount::default(),
            required_confirmations: 1,
            explorer: None,
        }
    }

    /// A live network guarded by `required_confirmations` blocks of reorg protection.
    pub fn public(
        network_id: impl Into<String>,
        chain_id: u64,
        rpc_url: Url,
        required_confirmations: u64,
    ) -> Result<Self, ProfileError> {
        let network_id = network_id.into();
        if required_confirmations == 0 {
            return Err(ProfileError::ZeroConfirmations(network_id));
        }

        Ok(Self {
            network_id,
            chain_id,
            trust_level: TrustLevel::Public,
            rpc_url,
            deployer: DeployerAccount::default(),
            required_confirmations,
            explorer: None,
        })
    }

    /// Attach an explorer. Local profiles never verify, so this is ignored for them.
    pub fn with_explorer(mut self, api_url: Url, api_key: Option<ApiKey>) -> Self {
        if self.trust_level == TrustLevel::Public {
            self.explorer = Some(ExplorerEndpoint { api_url, api_key });
        }
        self
    }

    /// Sign with `deployer` instead of the node's first account.
    pub fn with_deployer(mut self, deployer: DeployerAccount) -> Self {
        self.deployer = deployer;
        self
    }

    /// Blocks, including the inclusion block, a deployment needs before it is durable.
    pub fn required_confirmations(&self) -> u64 {
        self.required_confirmations
    }

    /// The attached explorer. Always `None` on local networks.
    pub fn explorer(&self) -> Option<&ExplorerEndpoint> {
        self.explorer.as_ref()
    }

    /// API key of the attached explorer, if any.
    pub fn explorer_api_key(&self) -> Option<&ApiKey> {
        self.explorer.as_ref().and_then(|e| e.api_key.as_ref())
    }

    /// Verification only makes sense on a public network with credentials for its explorer.
    pub fn verification_enabled(&self) -> bool {
        self.trust_level == TrustLevel::Public && self.explorer_api_key().is_some()
    }
}

/// All configured network profiles, keyed by network id.
#[derive(Debug, Clone, Default, Deref)]
pub struct NetworkRegistry(BTreeMap<String, NetworkProfile>);

impl NetworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `profile`, replacing any profile with the same network id.
    pub fn insert(&mut self, profile: NetworkProfile) {
        self.0.insert(profile.network_id.clone(), profile);
    }

    /// Look up the profile for `network_id`.
    pub fn resolve(&self, network_id: &str) -> Result<NetworkProfile, DeployError> {
        self.0
            .get(network_id)
            .cloned()
            .ok_or_else(|| DeployError::UnknownNetwork(network_id.to_string()))
    }
}

impl FromIterator<NetworkProfile> for NetworkRegistry {
    fn from_iter<I: IntoIterator<Item = NetworkProfile>>(iter: I) -> Self {
        let mut registry = Self::new();
        for profile in iter {
            registry.insert(profile);
        }
        registry
    }
}
