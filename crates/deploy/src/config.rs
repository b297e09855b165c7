//! `Hatch.toml` configuration.
//!
//! Configuration is layered with figment: built-in defaults, then the TOML file, then
//! `HATCH_`-prefixed environment variables (nested keys separated by `__`, e.g.
//! `HATCH_NETWORKS__SEPOLIA__RPC_URL`).

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    ApiKey, ConfirmationPolicy, ConstructorArgs, DeployerAccount, NetworkProfile,
    NetworkRegistry, RetryPolicy, StatusPolling, TrustLevel,
};

/// The default name for the hatch configuration file.
pub const HATCH_CONFIG_FILENAME: &str = "Hatch.toml";

/// Confirmations required on public networks that don't set `block_confirmations`.
pub const DEFAULT_PUBLIC_CONFIRMATIONS: u64 = 6;

/// Environment variable holding the explorer API key unless a network overrides it.
pub const DEFAULT_API_KEY_ENV: &str = "ETHERSCAN_API_KEY";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HatchConfig {
    /// Network used when none is given on the command line.
    pub default_network: String,
    /// Directory holding compiled contract artifacts.
    pub artifacts: PathBuf,
    /// Path of the deployment manifest.
    pub manifest: PathBuf,
    /// Network definitions keyed by network id.
    pub networks: BTreeMap<String, NetworkConfig>,
    pub confirmation: ConfirmationConfig,
    pub verification: VerificationConfig,
    /// The deployment plan, run in declaration order.
    pub deployments: Vec<PlannedDeployment>,
}

/// A single network definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub trust: TrustLevel,
    pub rpc_url: Url,
    /// Ignored (forced to 1) for local networks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_confirmations: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<Url>,
    /// Inline API key. Prefer `explorer_api_key_env`; never written back to disk.
    #[serde(default, skip_serializing)]
    pub explorer_api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub explorer_api_key_env: String,
    /// Explicit deployer address. Falls back to `eth_accounts[deployer_index]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployer: Option<Address>,
    #[serde(default)]
    pub deployer_index: usize,
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

/// Confirmation waiting parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Blocks past submission after which a never-mined transaction is considered dropped.
    pub drop_after_blocks: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            poll_interval_ms: 2_000,
            drop_after_blocks: 50,
        }
    }
}

/// Verification retry parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Maximum number of submissions to the explorer.
    pub max_attempts: usize,
    /// First backoff delay; doubles on every retry.
    pub min_delay_secs: u64,
    /// Cap on the backoff delay.
    pub max_delay_secs: u64,
    /// Bound on the whole verification phase.
    pub timeout_secs: u64,
    /// How often a queued explorer job is polled before the attempt is given up.
    pub status_poll_attempts: usize,
    pub status_poll_interval_secs: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay_secs: 5,
            max_delay_secs: 60,
            timeout_secs: 600,
            status_poll_attempts: 10,
            status_poll_interval_secs: 3,
        }
    }
}

/// One entry of the deployment plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedDeployment {
    pub contract: String,
    #[serde(default)]
    pub args: ConstructorArgs,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl PlannedDeployment {
    /// An empty tag filter matches everything.
    pub fn matches_tags(&self, tags: &[String]) -> bool {
        tags.is_empty() || tags.iter().any(|t| self.tags.contains(t))
    }
}

impl Default for HatchConfig {
    fn default() -> Self {
        let local_rpc = Url::parse("http://127.0.0.1:8545").expect("static url is valid");
        let local = |chain_id| NetworkConfig {
            chain_id,
            trust: TrustLevel::Local,
            rpc_url: local_rpc.clone(),
            block_confirmations: Some(1),
            explorer_url: None,
            explorer_api_key: None,
            explorer_api_key_env: default_api_key_env(),
            deployer: None,
            deployer_index: 0,
        };

        let sepolia = NetworkConfig {
            chain_id: 11155111,
            trust: TrustLevel::Public,
            rpc_url: Url::parse("https://ethereum-sepolia-rpc.publicnode.com")
                .expect("static url is valid"),
            block_confirmations: Some(DEFAULT_PUBLIC_CONFIRMATIONS),
            explorer_url: Some(
                Url::parse("https://api.etherscan.io/v2/api").expect("static url is valid"),
            ),
            explorer_api_key: None,
            explorer_api_key_env: default_api_key_env(),
            deployer: None,
            deployer_index: 0,
        };

        let networks = BTreeMap::from([
            ("hardhat".to_string(), local(31337)),
            ("localhost".to_string(), local(31337)),
            ("sepolia".to_string(), sepolia),
        ]);

        let deployments = vec![
            PlannedDeployment {
                contract: "Token".to_string(),
                args: ConstructorArgs::from_strs([
                    "TK1",
                    "TK1",
                    "0xb6D4523Ab88fba980b2063BD59e1E4B72E45F291",
                ]),
                tags: vec!["token".to_string()],
            },
            PlannedDeployment {
                contract: "DEX".to_string(),
                args: ConstructorArgs::from_strs([
                    "0x49dc6DCA0aeA1D9984988D333909D092D942E7FF",
                    "0x940962cfcE7F00E0B124B09996Fe67E8AA9cc4e0",
                ]),
                tags: vec!["dex".to_string()],
            },
        ];

        Self {
            default_network: "hardhat".to_string(),
            artifacts: PathBuf::from("artifacts"),
            manifest: PathBuf::from("deployments/manifest.json"),
            networks,
            confirmation: ConfirmationConfig::default(),
            verification: VerificationConfig::default(),
            deployments,
        }
    }
}

impl HatchConfig {
    /// Load the configuration.
    ///
    /// With an explicit `path` the file must exist (a directory is searched for
    /// `Hatch.toml`). Without one, `Hatch.toml` is used if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Configuration file not found: {}", path.display());
                }
                if path.is_dir() {
                    path.join(HATCH_CONFIG_FILENAME)
                } else {
                    path.to_path_buf()
                }
            }
            None => PathBuf::from(HATCH_CONFIG_FILENAME),
        };

        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(&file))
            .merge(Env::prefixed("HATCH_").split("__"))
            .extract()
            .context("Failed to load hatch configuration")?;
        config.retry_policy()?;

        tracing::debug!(path = %file.display(), networks = config.networks.len(), "Configuration loaded");
        Ok(config)
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize hatch config to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Build the network registry, reading explorer keys from the process environment.
    pub fn network_registry(&self) -> Result<NetworkRegistry> {
        self.network_registry_with(|name| std::env::var(name).ok())
    }

    /// Build the network registry with a custom environment lookup.
    pub fn network_registry_with(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<NetworkRegistry> {
        self.networks
            .iter()
            .map(|(id, network)| network.to_profile(id, &env))
            .collect()
    }

    /// Select plan entries by explicit contract names, or else by tags.
    pub fn select_deployments(
        &self,
        tags: &[String],
        contracts: &[String],
    ) -> Result<Vec<PlannedDeployment>> {
        if contracts.is_empty() {
            return Ok(self
                .deployments
                .iter()
                .filter(|d| d.matches_tags(tags))
                .cloned()
                .collect());
        }

        contracts
            .iter()
            .map(|name| {
                self.deployments
                    .iter()
                    .find(|d| &d.contract == name)
                    .cloned()
                    .with_context(|| format!("Contract '{}' is not in the deployment plan", name))
            })
            .collect()
    }

    /// Timeouts and polling of the confirmation phase.
    pub fn confirmation_policy(&self) -> ConfirmationPolicy {
        ConfirmationPolicy {
            timeout: Duration::from_secs(self.confirmation.timeout_secs),
            poll_interval: Duration::from_millis(self.confirmation.poll_interval_ms),
            drop_after_blocks: self.confirmation.drop_after_blocks,
        }
    }

    /// Verification retry schedule. At least one submission must be allowed.
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        if self.verification.max_attempts == 0 {
            anyhow::bail!("verification.max_attempts must be at least 1");
        }

        Ok(RetryPolicy {
            max_attempts: self.verification.max_attempts,
            min_delay: Duration::from_secs(self.verification.min_delay_secs),
            max_delay: Duration::from_secs(self.verification.max_delay_secs),
            timeout: Duration::from_secs(self.verification.timeout_secs),
        })
    }

    /// How a queued explorer job is polled within one attempt.
    pub fn status_polling(&self) -> StatusPolling {
        StatusPolling {
            attempts: self.verification.status_poll_attempts,
            interval: Duration::from_secs(self.verification.status_poll_interval_secs),
        }
    }
}

impl NetworkConfig {
    fn to_profile(
        &self,
        network_id: &str,
        env: &impl Fn(&str) -> Option<String>,
    ) -> Result<NetworkProfile> {
        let profile = match self.trust {
            TrustLevel::Local => {
                if let Some(confirmations) = self.block_confirmations.filter(|c| *c != 1) {
                    tracing::warn!(
                        network = %network_id,
                        confirmations,
                        "Local networks always use a single confirmation, ignoring block_confirmations"
                    );
                }
                NetworkProfile::local(network_id, self.chain_id, self.rpc_url.clone())
            }
            TrustLevel::Public => NetworkProfile::public(
                network_id,
                self.chain_id,
                self.rpc_url.clone(),
                self.block_confirmations
                    .unwrap_or(DEFAULT_PUBLIC_CONFIRMATIONS),
            )?,
        };

        let api_key = self
            .explorer_api_key
            .clone()
            .and_then(ApiKey::new)
            .or_else(|| env(&self.explorer_api_key_env).and_then(ApiKey::new));

        let profile = match &self.explorer_url {
            Some(url) => profile.with_explorer(url.clone(), api_key),
            None => profile,
        };

        let deployer = match self.deployer {
            Some(address) => DeployerAccount::Address(address),
            None => DeployerAccount::NodeAccount(self.deployer_index),
        };

        Ok(profile.with_deployer(deployer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_default_networks() {
        let config = HatchConfig::default();
        let registry = config.network_registry_with(|_| None).unwrap();

        for id in ["hardhat", "localhost"] {
            let profile = registry.resolve(id).unwrap();
            assert_eq!(profile.trust_level, TrustLevel::Local);
            assert_eq!(profile.required_confirmations(), 1);
        }

        let sepolia = registry.resolve("sepolia").unwrap();
        assert_eq!(sepolia.trust_level, TrustLevel::Public);
        assert_eq!(sepolia.required_confirmations(), 6);
        assert!(!sepolia.verification_enabled());
    }

    #[test]
    fn test_api_key_from_env() {
        let config = HatchConfig::default();
        let registry = config
            .network_registry_with(|name| (name == DEFAULT_API_KEY_ENV).then(|| "abc".to_string()))
            .unwrap();

        let sepolia = registry.resolve("sepolia").unwrap();
        assert!(sepolia.verification_enabled());
        assert_eq!(sepolia.explorer_api_key().unwrap().expose(), "abc");

        // Local networks never pick up a key.
        assert!(!registry.resolve("hardhat").unwrap().verification_enabled());
    }

    #[test]
    fn test_local_confirmations_forced_to_one() {
        let mut config = HatchConfig::default();
        config
            .networks
            .get_mut("hardhat")
            .unwrap()
            .block_confirmations = Some(12);

        let registry = config.network_registry_with(|_| None).unwrap();
        assert_eq!(registry.resolve("hardhat").unwrap().required_confirmations(), 1);
    }

    #[test]
    fn test_public_zero_confirmations_rejected() {
        let mut config = HatchConfig::default();
        config
            .networks
            .get_mut("sepolia")
            .unwrap()
            .block_confirmations = Some(0);

        assert!(config.network_registry_with(|_| None).is_err());
    }

    #[test]
    fn test_zero_verification_attempts_rejected() {
        let mut config = HatchConfig::default();
        assert_eq!(config.retry_policy().unwrap().max_attempts, 5);

        config.verification.max_attempts = 0;
        let err = config.retry_policy().unwrap_err();
        assert!(err.to_string().contains("max_attempts"));

        let temp_dir = TempDir::new("hatch-test").expect("Failed to create temp dir");
        let path = temp_dir.path().join(HATCH_CONFIG_FILENAME);
        config.save_to_file(&path).unwrap();
        assert!(HatchConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_select_deployments() {
        let config = HatchConfig::default();

        let all = config.select_deployments(&[], &[]).unwrap();
        assert_eq!(all.len(), 2);

        let dex = config
            .select_deployments(&["dex".to_string()], &[])
            .unwrap();
        assert_eq!(dex.len(), 1);
        assert_eq!(dex[0].contract, "DEX");

        let token = config
            .select_deployments(&[], &["Token".to_string()])
            .unwrap();
        assert_eq!(token[0].args.len(), 3);

        assert!(
            config
                .select_deployments(&[], &["Pair".to_string()])
                .is_err()
        );
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let temp_dir = TempDir::new("hatch-test").expect("Failed to create temp dir");
        let result = HatchConfig::load(Some(&temp_dir.path().join("missing.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new("hatch-test").expect("Failed to create temp dir");
        let path = temp_dir.path().join(HATCH_CONFIG_FILENAME);

        let mut config = HatchConfig::default();
        config.verification.max_attempts = 9;
        config.save_to_file(&path).unwrap();

        let loaded = HatchConfig::load(Some(temp_dir.path())).unwrap();
        assert_eq!(loaded.verification.max_attempts, 9);
        assert_eq!(loaded.deployments, config.deployments);
        assert_eq!(loaded.networks, config.networks);
    }

    #[test]
    fn test_file_and_env_layering() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                HATCH_CONFIG_FILENAME,
                r#"
                default_network = "mainnet"

                [networks.mainnet]
                chain_id = 1
                trust = "public"
                rpc_url = "https://ethereum-rpc.publicnode.com"
                block_confirmations = 12
                explorer_url = "https://api.etherscan.io/v2/api"

                [verification]
                max_attempts = 3
                "#,
            )?;
            jail.set_env("HATCH_VERIFICATION__MIN_DELAY_SECS", "1");

            let config = HatchConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.default_network, "mainnet");
            assert_eq!(config.verification.max_attempts, 3);
            assert_eq!(config.verification.min_delay_secs, 1);
            assert_eq!(config.verification.max_delay_secs, 60);

            // Defaults are kept alongside file networks.
            assert!(config.networks.contains_key("hardhat"));

            let registry = config
                .network_registry_with(|_| None)
                .map_err(|e| e.to_string())?;
            assert_eq!(registry.resolve("mainnet").unwrap().required_confirmations(), 12);
            Ok(())
        });
    }
}
