//! Error taxonomy for the deployment pipeline.

use std::time::Duration;

use alloy_core::primitives::TxHash;

/// Failures that end a deployment.
///
/// Verification problems are not errors: they surface as a
/// [`VerificationStatus`](crate::VerificationStatus) on the final record.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("unknown network '{0}'")]
    UnknownNetwork(String),

    #[error("cannot submit {contract}: {reason}")]
    Submission { contract: String, reason: String },

    #[error("signer refused the deployment: {0}")]
    Signer(String),

    #[error(
        "timed out after {elapsed:?} waiting for {required} confirmations of {tx_hash} \
         ({confirmations} so far)"
    )]
    ConfirmationTimeout {
        tx_hash: TxHash,
        required: u64,
        confirmations: u64,
        elapsed: Duration,
    },

    #[error("transaction {tx_hash} is no longer in any block; re-submission needs a manual decision")]
    TransactionDropped { tx_hash: TxHash },

    #[error("transaction {tx_hash} reverted in block {block}")]
    TransactionReverted { tx_hash: TxHash, block: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("deployment manifest: {0:#}")]
    Manifest(anyhow::Error),

    #[error("chain rpc error: {0:#}")]
    Rpc(anyhow::Error),
}

impl DeployError {
    /// Short machine-friendly name of the failure.
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::UnknownNetwork(_) => "unknown_network",
            DeployError::Submission { .. } => "submission_error",
            DeployError::Signer(_) => "signer_error",
            DeployError::ConfirmationTimeout { .. } => "confirmation_timeout",
            DeployError::TransactionDropped { .. } => "transaction_dropped",
            DeployError::TransactionReverted { .. } => "transaction_reverted",
            DeployError::Cancelled => "cancelled",
            DeployError::Manifest(_) => "manifest_error",
            DeployError::Rpc(_) => "rpc_error",
        }
    }

    /// Whether a transaction may already be on its way to the chain when this error occurred.
    ///
    /// Nothing that returns `true` here may be answered with an automatic re-submission.
    pub fn after_broadcast(&self) -> bool {
        matches!(
            self,
            DeployError::ConfirmationTimeout { .. }
                | DeployError::TransactionDropped { .. }
                | DeployError::TransactionReverted { .. }
        )
    }
}
