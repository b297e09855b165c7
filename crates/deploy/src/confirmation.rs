//! Waiting for a deployment to become durable.

use std::time::Duration;

use derive_more::Deref;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{CancelSignal, ChainReader, DeployError, PendingDeployment};

/// A deployment buried under enough blocks for its network.
#[derive(Debug, Clone, PartialEq, Eq, Deref, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedDeployment {
    #[deref]
    #[serde(flatten)]
    pub pending: PendingDeployment,
    /// Block that contains the deployment transaction.
    pub included_in_block: u64,
    /// Chain head at which the confirmation threshold was reached.
    pub confirmed_at_block: u64,
}

impl ConfirmedDeployment {
    /// Confirmations at the head the threshold was reached at.
    pub fn confirmations(&self) -> u64 {
        confirmations_at(self.confirmed_at_block, self.included_in_block)
    }
}

/// Number of confirmations of a transaction mined in `included` when the head is `head`.
pub fn confirmations_at(head: u64, included: u64) -> u64 {
    if head < included {
        0
    } else {
        head - included + 1
    }
}

/// How confirmations are awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    /// Give up once this much time passed since waiting started.
    pub timeout: Duration,
    /// Delay between two polls of the chain.
    pub poll_interval: Duration,
    /// A transaction still unmined this many blocks after submission is treated as dropped.
    pub drop_after_blocks: u64,
}

/// Outcome of a single poll.
enum Poll {
    Waiting { confirmations: u64 },
    Confirmed(ConfirmedDeployment),
}

/// Polls the chain head until a pending deployment is confirmed.
pub struct ConfirmationWaiter<'a, C> {
    chain: &'a C,
    policy: ConfirmationPolicy,
}

impl<'a, C: ChainReader> ConfirmationWaiter<'a, C> {
    /// Create a waiter reading from `chain`.
    pub fn new(chain: &'a C, policy: ConfirmationPolicy) -> Self {
        Self { chain, policy }
    }

    /// Wait until `pending` has `required_confirmations`, using the policy timeout.
    pub async fn await_confirmations(
        &self,
        pending: &PendingDeployment,
        required_confirmations: u64,
        cancel: &CancelSignal,
    ) -> Result<ConfirmedDeployment, DeployError> {
        self.await_confirmations_within(pending, required_confirmations, self.policy.timeout, cancel)
            .await
    }

    /// Wait until `pending` has `required_confirmations`, giving up after `timeout`.
    ///
    /// Transient RPC failures are logged and polled through. A receipt that disappears
    /// after being seen, or never shows up within the drop window, is fatal.
    pub async fn await_confirmations_within(
        &self,
        pending: &PendingDeployment,
        required_confirmations: u64,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> Result<ConfirmedDeployment, DeployError> {
        // Inclusion itself is the first confirmation.
        let required = required_confirmations.max(1);
        let started = Instant::now();
        let deadline = started + timeout;
        let mut included_in: Option<u64> = None;
        let mut confirmations = 0;

        tracing::info!(
            contract = %pending.contract_name,
            tx_hash = %pending.transaction_hash,
            required,
            "Waiting for confirmations..."
        );

        loop {
            if cancel.is_cancelled() {
                return Err(DeployError::Cancelled);
            }

            let poll = tokio::select! {
                poll = tokio::time::timeout_at(
                    deadline,
                    self.poll(pending, required, &mut included_in),
                ) => poll,
                _ = cancel.cancelled() => return Err(DeployError::Cancelled),
            };

            match poll {
                Err(_) => break,
                Ok(Ok(Poll::Confirmed(confirmed))) => {
                    tracing::info!(
                        contract = %confirmed.contract_name,
                        block = confirmed.included_in_block,
                        confirmations = confirmed.confirmations(),
                        "Deployment confirmed"
                    );
                    return Ok(confirmed);
                }
                Ok(Ok(Poll::Waiting {
                    confirmations: current,
                })) => {
                    if current != confirmations {
                        tracing::debug!(
                            tx_hash = %pending.transaction_hash,
                            confirmations = current,
                            required,
                            "Confirmation progress"
                        );
                    }
                    confirmations = current;
                }
                Ok(Err(DeployError::Rpc(e))) => {
                    tracing::warn!(
                        tx_hash = %pending.transaction_hash,
                        error = %format!("{:#}", e),
                        "Confirmation poll failed, retrying..."
                    );
                }
                Ok(Err(e)) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            cancel
                .sleep(self.policy.poll_interval.min(deadline - now))
                .await?;
        }

        Err(DeployError::ConfirmationTimeout {
            tx_hash: pending.transaction_hash,
            required,
            confirmations,
            elapsed: started.elapsed(),
        })
    }

    async fn poll(
        &self,
        pending: &PendingDeployment,
        required: u64,
        included_in: &mut Option<u64>,
    ) -> Result<Poll, DeployError> {
        let hash = pending.transaction_hash;
        let receipt = self
            .chain
            .transaction_receipt(hash)
            .await
            .map_err(DeployError::Rpc)?;

        let head = self
            .chain
            .current_block_height()
            .await
            .map_err(DeployError::Rpc)?;

        let Some(receipt) = receipt else {
            if included_in.is_some() {
                tracing::error!(tx_hash = %hash, "Receipt vanished, transaction was reorged out");
                return Err(DeployError::TransactionDropped { tx_hash: hash });
            }
            if head > pending.submitted_at_block + self.policy.drop_after_blocks {
                tracing::error!(
                    tx_hash = %hash,
                    head,
                    submitted_at = pending.submitted_at_block,
                    "Transaction never mined"
                );
                return Err(DeployError::TransactionDropped { tx_hash: hash });
            }
            tracing::trace!(tx_hash = %hash, head, "Transaction not mined yet");
            return Ok(Poll::Waiting { confirmations: 0 });
        };

        if !receipt.status {
            return Err(DeployError::TransactionReverted {
                tx_hash: hash,
                block: receipt.block_number,
            });
        }

        if let Some(previous) = included_in.replace(receipt.block_number) {
            if previous != receipt.block_number {
                tracing::warn!(
                    tx_hash = %hash,
                    from = previous,
                    to = receipt.block_number,
                    "Transaction moved to another block"
                );
            }
        }

        let confirmations = confirmations_at(head, receipt.block_number);
        if confirmations >= required {
            return Ok(Poll::Confirmed(ConfirmedDeployment {
                pending: pending.clone(),
                included_in_block: receipt.block_number,
                confirmed_at_block: head,
            }));
        }

        Ok(Poll::Waiting { confirmations })
    }
}
