//! Signing and broadcasting, with per-signer nonce serialization.

use std::future::Future;

use alloy_core::primitives::{Address, Bytes, TxHash};
use anyhow::Context;
use serde_json::json;
use tokio::sync::Mutex;

use crate::{
    CancelSignal, DeployError, DeployerAccount,
    rpc::{self, JsonRpc},
};

/// A contract-creation transaction ready to be signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployTransaction {
    pub from: Address,
    pub nonce: u64,
    /// Chain the transaction is signed for (EIP-155 replay protection).
    pub chain_id: u64,
    /// Creation bytecode followed by the encoded constructor arguments.
    pub input: Bytes,
}

/// The wallet collaborator.
pub trait Signer: Send + Sync {
    /// The account this signer signs for.
    fn address(&self) -> Address;

    /// Next unused nonce of `account`, including pending transactions.
    fn next_nonce(&self, account: Address) -> impl Future<Output = anyhow::Result<u64>> + Send;

    fn sign_and_broadcast(
        &self,
        tx: DeployTransaction,
    ) -> impl Future<Output = anyhow::Result<TxHash>> + Send;
}

/// Owns a signer together with its next-nonce counter.
///
/// The counter is held locked for the whole of a submission, so concurrent
/// deployments from the same account never race for a nonce.
#[derive(Debug)]
pub struct SignerHandle<S> {
    signer: S,
    next_nonce: Mutex<Option<u64>>,
}

impl<S: Signer> SignerHandle<S> {
    /// Wrap `signer`. The first broadcast reads its nonce from the signer.
    pub fn new(signer: S) -> Self {
        Self {
            signer,
            next_nonce: Mutex::new(None),
        }
    }

    /// Address of the wrapped signer.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// The wrapped signer.
    pub fn signer(&self) -> &S {
        &self.signer
    }

    /// Broadcast a contract creation and return the nonce it used with its hash.
    ///
    /// At most one transaction is sent. Waiting for the nonce lock is abandoned on
    /// cancellation, and nothing is sent if cancellation arrived while waiting. On
    /// failure the cached nonce is discarded and re-read from the signer on the next call.
    pub async fn broadcast_creation(
        &self,
        chain_id: u64,
        input: Bytes,
        cancel: &CancelSignal,
    ) -> Result<(u64, TxHash), DeployError> {
        let mut next_nonce = tokio::select! {
            guard = self.next_nonce.lock() => guard,
            _ = cancel.cancelled() => return Err(DeployError::Cancelled),
        };
        let from = self.signer.address();

        let nonce = match *next_nonce {
            Some(nonce) => nonce,
            None => self
                .signer
                .next_nonce(from)
                .await
                .map_err(|e| DeployError::Signer(format!("{:#}", e)))?,
        };

        // Last point where the deployment can be abandoned without leaving a transaction behind.
        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }

        let tx = DeployTransaction {
            from,
            nonce,
            chain_id,
            input,
        };

        match self.signer.sign_and_broadcast(tx).await {
            Ok(hash) => {
                *next_nonce = Some(nonce + 1);
                tracing::debug!(from = %from, nonce, tx_hash = %hash, "Transaction broadcast");
                Ok((nonce, hash))
            }
            Err(e) => {
                *next_nonce = None;
                Err(DeployError::Signer(format!("{:#}", e)))
            }
        }
    }
}

/// Signer that delegates to an account unlocked on the node (`eth_sendTransaction`).
#[derive(Debug, Clone)]
pub struct NodeSigner {
    rpc: JsonRpc,
    address: Address,
}

impl NodeSigner {
    /// Resolve the deployer account and bind to it.
    pub async fn connect(rpc: JsonRpc, account: DeployerAccount) -> anyhow::Result<Self> {
        let address = match account {
            DeployerAccount::Address(address) => address,
            DeployerAccount::NodeAccount(index) => {
                let accounts: Vec<Address> = rpc
                    .call("eth_accounts", vec![])
                    .await
                    .context("Failed to list node accounts")?;
                accounts.get(index).copied().with_context(|| {
                    format!(
                        "Node at {} exposes {} account(s), no account at index {}",
                        rpc.url(),
                        accounts.len(),
                        index
                    )
                })?
            }
        };

        tracing::debug!(deployer = %address, "Deployer account resolved");
        Ok(Self { rpc, address })
    }
}

impl Signer for NodeSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn next_nonce(&self, account: Address) -> anyhow::Result<u64> {
        let count: String = self
            .rpc
            .call("eth_getTransactionCount", vec![json!(account), json!("pending")])
            .await?;
        rpc::parse_quantity(&count)
    }

    async fn sign_and_broadcast(&self, tx: DeployTransaction) -> anyhow::Result<TxHash> {
        self.rpc
            .call(
                "eth_sendTransaction",
                vec![json!({
                    "from": tx.from,
                    "nonce": format!("0x{:x}", tx.nonce),
                    "chainId": format!("0x{:x}", tx.chain_id),
                    "data": tx.input,
                })],
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    };

    struct CountingSigner {
        nonce_reads: AtomicU64,
        sent: std::sync::Mutex<Vec<u64>>,
        fail_next: std::sync::atomic::AtomicBool,
    }

    impl Signer for CountingSigner {
        fn address(&self) -> Address {
            Address::repeat_byte(0x11)
        }

        async fn next_nonce(&self, _account: Address) -> anyhow::Result<u64> {
            self.nonce_reads.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        }

        async fn sign_and_broadcast(&self, tx: DeployTransaction) -> anyhow::Result<TxHash> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                anyhow::bail!("insufficient funds for gas * price + value");
            }
            tokio::task::yield_now().await;
            self.sent.lock().unwrap().push(tx.nonce);
            Ok(TxHash::with_last_byte(tx.nonce as u8))
        }
    }

    fn counting_signer() -> CountingSigner {
        CountingSigner {
            nonce_reads: AtomicU64::new(0),
            sent: std::sync::Mutex::new(Vec::new()),
            fail_next: std::sync::atomic::AtomicBool::new(false),
        }
    }

    #[tokio::test]
    async fn test_concurrent_broadcasts_get_distinct_nonces() {
        let handle = Arc::new(SignerHandle::new(counting_signer()));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move {
                    handle
                        .broadcast_creation(1, Bytes::new(), &CancelSignal::never())
                        .await
                })
            })
            .collect();

        let mut nonces = Vec::new();
        for task in tasks {
            let (nonce, _) = task.await.unwrap().unwrap();
            nonces.push(nonce);
        }
        nonces.sort();

        assert_eq!(nonces, vec![7, 8, 9, 10]);
        assert_eq!(handle.signer().nonce_reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_broadcast_resets_nonce() {
        let handle = SignerHandle::new(counting_signer());
        handle
            .signer()
            .fail_next
            .store(true, Ordering::SeqCst);

        let err = handle
            .broadcast_creation(1, Bytes::new(), &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Signer(ref m) if m.contains("insufficient funds")));
        assert!(handle.signer().sent.lock().unwrap().is_empty());

        let (nonce, _) = handle
            .broadcast_creation(1, Bytes::new(), &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(nonce, 7);
        assert_eq!(handle.signer().nonce_reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_nonce_lock() {
        let handle = SignerHandle::new(counting_signer());
        let (cancel_handle, signal) = crate::cancel_pair();

        let held = handle.next_nonce.lock().await;
        let waiting = handle.broadcast_creation(1, Bytes::new(), &signal);
        cancel_handle.cancel();

        let err = waiting.await.unwrap_err();
        assert!(matches!(err, DeployError::Cancelled));
        drop(held);

        assert!(handle.signer().sent.lock().unwrap().is_empty());
        assert_eq!(handle.signer().nonce_reads.load(Ordering::SeqCst), 0);
    }
}
