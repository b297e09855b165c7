//! Deployment submission: artifact lookup, argument encoding and a single broadcast.

use alloy_core::primitives::{Address, Bytes, TxHash};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    Artifact, ArtifactSource, CancelSignal, ChainReader, ConstructorArgs, DeployError, Signer,
    SignerHandle,
};

/// What the caller wants deployed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRequest {
    pub contract_name: String,
    pub constructor_args: ConstructorArgs,
    /// The account expected to sign the deployment.
    pub signer: Address,
}

/// A broadcast deployment that is not confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDeployment {
    pub contract_name: String,
    pub contract_address: Address,
    pub transaction_hash: TxHash,
    /// Chain head observed right before the broadcast.
    pub submitted_at_block: u64,
}

/// A request whose artifact was found and whose arguments encoded cleanly.
#[derive(Debug, Clone)]
pub struct PreparedDeployment {
    pub request: DeploymentRequest,
    pub artifact: Artifact,
    pub encoded_args: Bytes,
}

impl PreparedDeployment {
    /// Creation bytecode followed by the encoded constructor arguments.
    pub fn init_code(&self) -> Bytes {
        let mut code = Vec::with_capacity(self.artifact.bytecode.len() + self.encoded_args.len());
        code.extend_from_slice(&self.artifact.bytecode);
        code.extend_from_slice(&self.encoded_args);
        code.into()
    }

    /// SHA-256 over the bytecode and encoded arguments.
    ///
    /// Two deployments with the same fingerprint on the same network are interchangeable.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.artifact.bytecode);
        hasher.update(&self.encoded_args);
        hex::encode(hasher.finalize())
    }
}

/// Submits deployments for one chain.
pub struct Submitter<'a, A, C> {
    artifacts: &'a A,
    chain: &'a C,
    chain_id: u64,
}

impl<'a, A: ArtifactSource, C: ChainReader> Submitter<'a, A, C> {
    pub fn new(artifacts: &'a A, chain: &'a C, chain_id: u64) -> Self {
        Self {
            artifacts,
            chain,
            chain_id,
        }
    }

    /// Resolve the artifact and encode the arguments. Nothing is sent.
    pub async fn prepare(
        &self,
        request: &DeploymentRequest,
    ) -> Result<PreparedDeployment, DeployError> {
        let submission_error = |e: anyhow::Error| DeployError::Submission {
            contract: request.contract_name.clone(),
            reason: format!("{:#}", e),
        };

        let artifact = self
            .artifacts
            .artifact(&request.contract_name)
            .await
            .map_err(submission_error)?;

        if artifact.bytecode.is_empty() {
            return Err(DeployError::Submission {
                contract: request.contract_name.clone(),
                reason: "artifact has no creation bytecode (abstract contract or interface?)"
                    .to_string(),
            });
        }

        let encoded_args = request
            .constructor_args
            .encode(&artifact.abi)
            .map_err(submission_error)?;

        Ok(PreparedDeployment {
            request: request.clone(),
            artifact,
            encoded_args,
        })
    }

    /// Broadcast exactly one creation transaction. Never retries.
    ///
    /// Fails with [`DeployError::Cancelled`] without broadcasting when `cancel` trips
    /// before the transaction is handed to the signer.
    pub async fn submit<S: Signer>(
        &self,
        prepared: &PreparedDeployment,
        signer: &SignerHandle<S>,
        cancel: &CancelSignal,
    ) -> Result<PendingDeployment, DeployError> {
        let request = &prepared.request;
        if request.signer != signer.address() {
            return Err(DeployError::Signer(format!(
                "deployment of {} expects signer {}, configured signer is {}",
                request.contract_name,
                request.signer,
                signer.address()
            )));
        }

        let submitted_at_block = tokio::select! {
            head = self.chain.current_block_height() => head.map_err(DeployError::Rpc)?,
            _ = cancel.cancelled() => return Err(DeployError::Cancelled),
        };

        let (nonce, transaction_hash) = signer
            .broadcast_creation(self.chain_id, prepared.init_code(), cancel)
            .await?;

        let pending = PendingDeployment {
            contract_name: request.contract_name.clone(),
            contract_address: signer.address().create(nonce),
            transaction_hash,
            submitted_at_block,
        };

        tracing::info!(
            contract = %pending.contract_name,
            address = %pending.contract_address,
            tx_hash = %pending.transaction_hash,
            nonce,
            block = submitted_at_block,
            "Deployment submitted"
        );

        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::json_abi::JsonAbi;
    use std::collections::BTreeMap;

    fn artifacts(bytecode: &'static [u8]) -> BTreeMap<String, Artifact> {
        let abi: JsonAbi = serde_json::from_value(serde_json::json!([
            {
                "type": "constructor",
                "stateMutability": "nonpayable",
                "inputs": [{ "name": "owner", "type": "address" }]
            }
        ]))
        .unwrap();

        BTreeMap::from([(
            "Ownable".to_string(),
            Artifact {
                contract_name: "Ownable".to_string(),
                source_name: "contracts/Ownable.sol".to_string(),
                abi,
                bytecode: Bytes::from_static(bytecode),
                compiler_version: "v0.8.20+commit.a1b79de6".to_string(),
                standard_json_input: serde_json::Value::Null,
            },
        )])
    }

    struct Head;

    impl ChainReader for Head {
        async fn current_block_height(&self) -> anyhow::Result<u64> {
            Ok(1)
        }

        async fn transaction_receipt(
            &self,
            _hash: TxHash,
        ) -> anyhow::Result<Option<crate::TransactionReceipt>> {
            Ok(None)
        }
    }

    fn request(contract: &str, args: &[&str]) -> DeploymentRequest {
        DeploymentRequest {
            contract_name: contract.to_string(),
            constructor_args: ConstructorArgs::from_strs(args.iter().copied()),
            signer: Address::ZERO,
        }
    }

    #[tokio::test]
    async fn test_prepare_appends_args_to_bytecode() {
        let artifacts = artifacts(&[0x60, 0x80]);
        let submitter = Submitter::new(&artifacts, &Head, 31337);

        let prepared = submitter
            .prepare(&request(
                "Ownable",
                &["0xb6D4523Ab88fba980b2063BD59e1E4B72E45F291"],
            ))
            .await
            .unwrap();

        let init_code = prepared.init_code();
        assert_eq!(init_code.len(), 2 + 32);
        assert_eq!(&init_code[..2], &[0x60, 0x80]);
        assert_eq!(prepared.fingerprint().len(), 64);
    }

    #[tokio::test]
    async fn test_fingerprint_tracks_arguments() {
        let artifacts = artifacts(&[0x60, 0x80]);
        let submitter = Submitter::new(&artifacts, &Head, 31337);

        let a = submitter
            .prepare(&request("Ownable", &["0x0000000000000000000000000000000000000001"]))
            .await
            .unwrap();
        let b = submitter
            .prepare(&request("Ownable", &["0x0000000000000000000000000000000000000002"]))
            .await
            .unwrap();
        let a_again = submitter
            .prepare(&request("Ownable", &["0x0000000000000000000000000000000000000001"]))
            .await
            .unwrap();

        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), a_again.fingerprint());
    }

    #[tokio::test]
    async fn test_prepare_errors_are_submission_errors() {
        let artifacts = artifacts(&[0x60, 0x80]);
        let submitter = Submitter::new(&artifacts, &Head, 31337);

        let malformed = submitter
            .prepare(&request("Ownable", &["TK1"]))
            .await
            .unwrap_err();
        assert!(matches!(malformed, DeployError::Submission { .. }));

        let missing = submitter
            .prepare(&request("Missing", &[]))
            .await
            .unwrap_err();
        assert!(matches!(missing, DeployError::Submission { .. }));
    }

    #[tokio::test]
    async fn test_prepare_rejects_empty_bytecode() {
        let artifacts = artifacts(&[]);
        let submitter = Submitter::new(&artifacts, &Head, 31337);
        let err = submitter
            .prepare(&request(
                "Ownable",
                &["0xb6D4523Ab88fba980b2063BD59e1E4B72E45F291"],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Submission { .. }));
    }
}
