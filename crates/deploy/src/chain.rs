//! Read access to the target chain.

use std::future::Future;

use alloy_core::primitives::{Address, TxHash};
use anyhow::Context;
use serde::Deserialize;
use serde_json::json;

use crate::rpc::{self, JsonRpc};

/// The parts of a transaction receipt the pipeline cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub block_number: u64,
    /// `true` when execution succeeded.
    pub status: bool,
    pub contract_address: Option<Address>,
}

/// Chain head and receipt lookups.
pub trait ChainReader: Send + Sync {
    fn current_block_height(&self) -> impl Future<Output = anyhow::Result<u64>> + Send;

    /// `None` while the transaction is not part of any block.
    fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> impl Future<Output = anyhow::Result<Option<TransactionReceipt>>> + Send;
}

/// [`ChainReader`] backed by a JSON-RPC node.
#[derive(Debug, Clone)]
pub struct RpcChain {
    rpc: JsonRpc,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    #[serde(deserialize_with = "rpc::deserialize_quantity")]
    block_number: u64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    contract_address: Option<Address>,
}

impl RpcChain {
    pub fn new(rpc: JsonRpc) -> Self {
        Self { rpc }
    }

    /// Chain id reported by the node.
    pub async fn chain_id(&self) -> anyhow::Result<u64> {
        let id: String = self.rpc.call("eth_chainId", vec![]).await?;
        rpc::parse_quantity(&id)
    }
}

impl ChainReader for RpcChain {
    async fn current_block_height(&self) -> anyhow::Result<u64> {
        let number: String = self
            .rpc
            .call("eth_blockNumber", vec![])
            .await
            .context("Failed to read chain head")?;
        rpc::parse_quantity(&number)
    }

    async fn transaction_receipt(&self, hash: TxHash) -> anyhow::Result<Option<TransactionReceipt>> {
        let raw: Option<RawReceipt> = self
            .rpc
            .call("eth_getTransactionReceipt", vec![json!(hash)])
            .await
            .with_context(|| format!("Failed to read receipt of {}", hash))?;

        raw.map(|r| -> anyhow::Result<TransactionReceipt> {
            // Pre-byzantium receipts have no status field; treat them as successful.
            let status = match r.status.as_deref() {
                None => true,
                Some(s) => rpc::parse_quantity(s)? == 1,
            };
            Ok(TransactionReceipt {
                block_number: r.block_number,
                status,
                contract_address: r.contract_address,
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_receipt_parsing() {
        let raw: RawReceipt = serde_json::from_value(json!({
            "blockNumber": "0x2a",
            "status": "0x1",
            "contractAddress": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "transactionHash": "0x00"
        }))
        .unwrap();

        assert_eq!(raw.block_number, 42);
        assert_eq!(raw.status.as_deref(), Some("0x1"));
        assert!(raw.contract_address.is_some());
    }

    #[test]
    fn test_pending_receipt_is_none() {
        let raw: Option<RawReceipt> = serde_json::from_value(serde_json::Value::Null).unwrap();
        assert!(raw.is_none());
    }
}
