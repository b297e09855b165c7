//! Read-only access to compiled contract artifacts.

use std::{
    collections::BTreeMap,
    future::Future,
    path::{Path, PathBuf},
};

use alloy_core::{json_abi::JsonAbi, primitives::Bytes};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// A compiled contract as produced by the build step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub contract_name: String,
    /// Path of the source file, e.g. `contracts/Token.sol`.
    pub source_name: String,
    pub abi: JsonAbi,
    /// Creation bytecode.
    pub bytecode: Bytes,
    /// Full compiler version, e.g. `v0.8.20+commit.a1b79de6`.
    #[serde(default)]
    pub compiler_version: String,
    /// Solidity standard-JSON compiler input used to produce the bytecode.
    #[serde(default)]
    pub standard_json_input: serde_json::Value,
}

/// What an explorer needs to reproduce a build.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMetadata {
    /// `source_name:contract_name`.
    pub fully_qualified_name: String,
    pub compiler_version: String,
    pub standard_json_input: serde_json::Value,
}

impl Artifact {
    pub fn source_metadata(&self) -> SourceMetadata {
        SourceMetadata {
            fully_qualified_name: format!("{}:{}", self.source_name, self.contract_name),
            compiler_version: self.compiler_version.clone(),
            standard_json_input: self.standard_json_input.clone(),
        }
    }
}

/// Something that can hand out artifacts by contract name.
pub trait ArtifactSource: Send + Sync {
    fn artifact(&self, contract_name: &str) -> impl Future<Output = Result<Artifact>> + Send;
}

impl ArtifactSource for BTreeMap<String, Artifact> {
    async fn artifact(&self, contract_name: &str) -> Result<Artifact> {
        self.get(contract_name)
            .cloned()
            .with_context(|| format!("No artifact for contract '{}'", contract_name))
    }
}

/// Artifacts stored on disk as `<Name>.json`, either flat in the root directory or
/// nested per source file (`contracts/Token.sol/Token.json`).
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory the artifacts are looked up in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn locate(root: &Path, contract_name: &str) -> Result<PathBuf> {
        let file_name = format!("{}.json", contract_name);

        let flat = root.join(&file_name);
        if flat.is_file() {
            return Ok(flat);
        }

        find_file(root, &file_name)?.with_context(|| {
            format!("Artifact {} not found under {}", file_name, root.display())
        })
    }

    fn load(root: &Path, contract_name: &str) -> Result<Artifact> {
        let path = Self::locate(root, contract_name)?;
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        let artifact: Artifact = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))?;

        if artifact.contract_name != contract_name {
            anyhow::bail!(
                "Artifact {} describes '{}', expected '{}'",
                path.display(),
                artifact.contract_name,
                contract_name
            );
        }

        tracing::debug!(contract = %contract_name, path = %path.display(), "Artifact loaded");
        Ok(artifact)
    }
}

impl ArtifactSource for ArtifactStore {
    async fn artifact(&self, contract_name: &str) -> Result<Artifact> {
        let root = self.root.clone();
        let contract_name = contract_name.to_string();

        tokio::task::spawn_blocking(move || Self::load(&root, &contract_name))
            .await
            .context("Artifact lookup task panicked")?
    }
}

/// Depth-first search for `file_name` below `root`, in file name order. Symlinks are
/// not followed.
fn find_file(root: &Path, file_name: &str) -> Result<Option<PathBuf>> {
    if !root.is_dir() {
        return Ok(None);
    }

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if entry.file_type().is_file() && entry.file_name() == file_name {
            return Ok(Some(entry.into_path()));
        }
    }

    Ok(None)
}
