//! Persisted record of confirmed deployments.
//!
//! The manifest is a JSON file keyed by network then contract name. An entry is only
//! ever written once its deployment is confirmed, so a failed run leaves the file as
//! it was. Writers take an exclusive lock on a sibling `.lock` file, re-read the
//! manifest from disk, apply their change and atomically replace the file.

use std::{
    collections::BTreeMap,
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

use alloy_core::primitives::Bytes;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{ConfirmedDeployment, ConstructorArgs, VerificationStatus};

/// Current manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

/// One confirmed deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    #[serde(flatten)]
    pub deployment: ConfirmedDeployment,
    /// Hash of the bytecode and encoded arguments this deployment was made from.
    pub fingerprint: String,
    pub constructor_args: ConstructorArgs,
    pub encoded_args: Bytes,
    pub deployed_at: DateTime<Utc>,
    /// Last verification result, if verification ever ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationStatus>,
}

/// Deployments per network, then per contract name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentManifest {
    pub version: u32,
    #[serde(default)]
    pub networks: BTreeMap<String, BTreeMap<String, ManifestEntry>>,
}

impl Default for DeploymentManifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            networks: BTreeMap::new(),
        }
    }
}

impl DeploymentManifest {
    /// Read a manifest. A missing file is an empty manifest.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        let manifest: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse manifest: {}", path.display()))?;

        if manifest.version != MANIFEST_VERSION {
            anyhow::bail!(
                "Manifest {} has version {}, expected {}",
                path.display(),
                manifest.version,
                MANIFEST_VERSION
            );
        }

        Ok(manifest)
    }

    /// Write through a temporary file so readers never see a partial manifest.
    fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize manifest")?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write manifest: {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace manifest: {}", path.display()))?;

        Ok(())
    }

    pub fn entry(&self, network: &str, contract: &str) -> Option<&ManifestEntry> {
        self.networks.get(network).and_then(|n| n.get(contract))
    }

    pub fn network(&self, network: &str) -> Option<&BTreeMap<String, ManifestEntry>> {
        self.networks.get(network)
    }
}

/// Shared handle on a manifest file.
#[derive(Debug)]
pub struct ManifestStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ManifestStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the manifest on disk.
    pub async fn load(&self) -> Result<DeploymentManifest> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || DeploymentManifest::read(&path))
            .await
            .context("Manifest read task panicked")?
    }

    /// The reusable deployment of `contract` on `network`, if its fingerprint matches.
    pub async fn find(
        &self,
        network: &str,
        contract: &str,
        fingerprint: &str,
    ) -> Result<Option<ManifestEntry>> {
        let manifest = self.load().await?;

        match manifest.entry(network, contract) {
            Some(entry) if entry.fingerprint == fingerprint => Ok(Some(entry.clone())),
            Some(entry) => {
                tracing::info!(
                    network = %network,
                    contract = %contract,
                    previous = %entry.deployment.contract_address,
                    "Bytecode or constructor arguments changed since the last deployment"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Record a confirmed deployment, replacing any earlier one for the same contract.
    pub async fn record_confirmed(
        &self,
        network: &str,
        deployment: &ConfirmedDeployment,
        fingerprint: &str,
        constructor_args: &ConstructorArgs,
        encoded_args: &Bytes,
    ) -> Result<()> {
        let network = network.to_string();
        let entry = ManifestEntry {
            deployment: deployment.clone(),
            fingerprint: fingerprint.to_string(),
            constructor_args: constructor_args.clone(),
            encoded_args: encoded_args.clone(),
            deployed_at: Utc::now(),
            verification: None,
        };

        self.update(move |manifest| {
            manifest
                .networks
                .entry(network)
                .or_default()
                .insert(entry.deployment.contract_name.clone(), entry);
            Ok(())
        })
        .await
    }

    /// Store the latest verification status of a recorded deployment.
    pub async fn record_verification(
        &self,
        network: &str,
        contract: &str,
        status: &VerificationStatus,
    ) -> Result<()> {
        let network = network.to_string();
        let contract = contract.to_string();
        let status = status.clone();

        self.update(move |manifest| {
            let entry = manifest
                .networks
                .get_mut(&network)
                .and_then(|n| n.get_mut(&contract))
                .with_context(|| format!("No manifest entry for {} on {}", contract, network))?;
            entry.verification = Some(status);
            Ok(())
        })
        .await
    }

    async fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut DeploymentManifest) -> Result<()> + Send + 'static,
    {
        let _guard = self.lock.lock().await;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || {
            let lock_file = lock_file(&path)?;
            lock_file
                .lock_exclusive()
                .with_context(|| format!("Failed to lock manifest: {}", path.display()))?;

            let result = DeploymentManifest::read(&path).and_then(|mut manifest| {
                change(&mut manifest)?;
                manifest.write(&path)
            });

            // Dropping the handle releases the lock as well.
            let _ = FileExt::unlock(&lock_file);
            result
        })
        .await
        .context("Manifest update task panicked")?
    }
}

fn lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let lock_path = path.with_extension("json.lock");
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PendingDeployment;
    use alloy_core::primitives::{Address, TxHash};
    use std::sync::Arc;
    use tempdir::TempDir;

    fn confirmed(contract: &str, address: u8) -> ConfirmedDeployment {
        ConfirmedDeployment {
            pending: PendingDeployment {
                contract_name: contract.to_string(),
                contract_address: Address::repeat_byte(address),
                transaction_hash: TxHash::repeat_byte(address),
                submitted_at_block: 1,
            },
            included_in_block: 2,
            confirmed_at_block: 2,
        }
    }

    #[tokio::test]
    async fn test_missing_manifest_is_empty() {
        let tmp = TempDir::new("hatch-manifest").unwrap();
        let store = ManifestStore::open(tmp.path().join("deployments/manifest.json"));

        assert_eq!(store.load().await.unwrap(), DeploymentManifest::default());
        assert!(store.find("hardhat", "Token", "abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_and_find() {
        let tmp = TempDir::new("hatch-manifest").unwrap();
        let store = ManifestStore::open(tmp.path().join("deployments/manifest.json"));
        let args = ConstructorArgs::from_strs(["TK1", "TK1"]);

        store
            .record_confirmed("hardhat", &confirmed("Token", 0xaa), "f1", &args, &Bytes::new())
            .await
            .unwrap();

        let entry = store.find("hardhat", "Token", "f1").await.unwrap().unwrap();
        assert_eq!(entry.deployment.contract_address, Address::repeat_byte(0xaa));
        assert_eq!(entry.constructor_args, args);
        assert!(entry.verification.is_none());

        // Changed bytecode or arguments, or another network, is not a hit.
        assert!(store.find("hardhat", "Token", "f2").await.unwrap().is_none());
        assert!(store.find("sepolia", "Token", "f1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_verification() {
        let tmp = TempDir::new("hatch-manifest").unwrap();
        let store = ManifestStore::open(tmp.path().join("manifest.json"));

        store
            .record_confirmed("sepolia", &confirmed("DEX", 1), "f", &ConstructorArgs::default(), &Bytes::new())
            .await
            .unwrap();
        store
            .record_verification("sepolia", "DEX", &VerificationStatus::AlreadyVerified)
            .await
            .unwrap();

        let manifest = store.load().await.unwrap();
        assert_eq!(
            manifest.entry("sepolia", "DEX").unwrap().verification,
            Some(VerificationStatus::AlreadyVerified)
        );

        assert!(
            store
                .record_verification("sepolia", "Token", &VerificationStatus::Success)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_concurrent_writers_keep_all_entries() {
        let tmp = TempDir::new("hatch-manifest").unwrap();
        let store = Arc::new(ManifestStore::open(tmp.path().join("manifest.json")));

        let writes = (0..8u8).map(|i| {
            let store = store.clone();
            async move {
                store
                    .record_confirmed(
                        "hardhat",
                        &confirmed(&format!("C{}", i), i),
                        "f",
                        &ConstructorArgs::default(),
                        &Bytes::new(),
                    )
                    .await
            }
        });
        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }

        let manifest = store.load().await.unwrap();
        assert_eq!(manifest.network("hardhat").unwrap().len(), 8);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let tmp = TempDir::new("hatch-manifest").unwrap();
        let path = tmp.path().join("manifest.json");
        std::fs::write(&path, r#"{ "version": 99, "networks": {} }"#).unwrap();

        assert!(DeploymentManifest::read(&path).is_err());
    }
}
