//! The chain the pipeline deploys to.
//!
//! [`ChainClient`] is the seam between the orchestration and the network:
//! [`RpcChainClient`] talks JSON-RPC to a node, tests substitute an in-memory
//! chain.

use std::{fmt, future::Future};

use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_core::primitives::{Address, B256, Bytes, TxKind, U64, U256};
use alloy_eips::eip2718::Encodable2718;
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::rpc::{DEFAULT_POLL_INTERVAL, create_client, json_rpc_call, poll_until};

/// Gas estimates are padded by this percentage before signing.
const GAS_LIMIT_HEADROOM_PERCENT: u64 = 20;

/// Outcome of a mined creation transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: B256,
    pub contract_address: Option<Address>,
    pub block_number: u64,
    /// `false` when the constructor reverted.
    pub success: bool,
}

/// What the node knows about a previously broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Neither mined nor in the mempool; it will never land.
    Dropped,
    /// Known to the node but not mined yet.
    Pending,
    /// Mined, whatever the confirmation depth.
    Mined(Receipt),
}

/// Operations the pipeline needs from a chain.
pub trait ChainClient: Send + Sync {
    /// The chain id reported by the node.
    fn chain_id(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Sign and broadcast a contract-creation transaction, returning its hash.
    fn send_creation(
        &self,
        signer: &PrivateKeySigner,
        creation_code: Bytes,
    ) -> impl Future<Output = Result<B256>> + Send;

    /// Wait until the transaction is mined and `confirmations` blocks deep
    /// (the mining block included). `0` returns as soon as a receipt exists.
    ///
    /// Never gives up on its own; bound it with [`tokio::time::timeout`].
    fn wait_for_receipt(
        &self,
        transaction_hash: B256,
        confirmations: u64,
    ) -> impl Future<Output = Result<Receipt>> + Send;

    /// One look at a transaction, without waiting.
    fn transaction_status(
        &self,
        transaction_hash: B256,
    ) -> impl Future<Output = Result<TransactionStatus>> + Send;

    /// Whether any code lives at `address`.
    fn has_code(&self, address: Address) -> impl Future<Output = Result<bool>> + Send;
}

/// Receipt as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    contract_address: Option<Address>,
    block_number: Option<U64>,
    status: Option<U64>,
}

/// A [`ChainClient`] over an HTTP JSON-RPC endpoint.
#[derive(Clone)]
pub struct RpcChainClient {
    client: reqwest::Client,
    url: Url,
}

// The endpoint path may carry an API key.
impl fmt::Debug for RpcChainClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcChainClient")
            .field("host", &self.url.host_str())
            .finish_non_exhaustive()
    }
}

impl RpcChainClient {
    pub fn new(url: Url) -> Result<Self> {
        Ok(Self {
            client: create_client()?,
            url,
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T> {
        json_rpc_call(&self.client, &self.url, method, params).await
    }

    async fn block_number(&self) -> Result<u64> {
        let number: U64 = self.call("eth_blockNumber", vec![]).await?;
        Ok(number.to::<u64>())
    }

    async fn receipt(&self, transaction_hash: B256) -> Result<Option<RpcReceipt>> {
        self.call("eth_getTransactionReceipt", vec![json!(transaction_hash)])
            .await
    }

    /// One poll of [`ChainClient::wait_for_receipt`].
    async fn confirmed_receipt(
        &self,
        transaction_hash: B256,
        confirmations: u64,
    ) -> Result<Option<Receipt>> {
        let Some(receipt) = self.receipt(transaction_hash).await? else {
            return Ok(None);
        };
        // Pending receipts (some nodes return them) have no block yet.
        let Some(block_number) = receipt.block_number.map(|n| n.to::<u64>()) else {
            return Ok(None);
        };

        if confirmations > 0 {
            let head = self.block_number().await?;
            let depth = (head + 1).saturating_sub(block_number);
            if depth < confirmations {
                tracing::debug!(
                    tx = %transaction_hash,
                    depth,
                    required = confirmations,
                    "Waiting for confirmations"
                );
                return Ok(None);
            }
        }

        Ok(Some(receipt.into_receipt(block_number)))
    }
}

impl RpcReceipt {
    fn into_receipt(self, block_number: u64) -> Receipt {
        Receipt {
            transaction_hash: self.transaction_hash,
            contract_address: self.contract_address,
            block_number,
            success: self.status.is_none_or(|status| status == U64::from(1)),
        }
    }
}

impl ChainClient for RpcChainClient {
    async fn chain_id(&self) -> Result<u64> {
        let chain_id: U64 = self
            .call("eth_chainId", vec![])
            .await
            .context("Failed to query chain id")?;
        Ok(chain_id.to::<u64>())
    }

    async fn send_creation(&self, signer: &PrivateKeySigner, creation_code: Bytes) -> Result<B256> {
        let from = signer.address();

        let chain_id = self.chain_id().await?;
        let nonce: U64 = self
            .call("eth_getTransactionCount", vec![json!(from), json!("pending")])
            .await?;
        let gas_price: U256 = self.call("eth_gasPrice", vec![]).await?;
        let gas_estimate: U64 = self
            .call(
                "eth_estimateGas",
                vec![json!({ "from": from, "data": creation_code })],
            )
            .await
            .context("Gas estimation failed (constructor would revert?)")?;
        let gas_limit = gas_estimate.to::<u64>() * (100 + GAS_LIMIT_HEADROOM_PERCENT) / 100;

        let tx = TxLegacy {
            chain_id: Some(chain_id),
            nonce: nonce.to::<u64>(),
            gas_price: gas_price.saturating_to::<u128>(),
            gas_limit,
            to: TxKind::Create,
            value: U256::ZERO,
            input: creation_code,
        };

        let signature = signer
            .sign_hash_sync(&tx.signature_hash())
            .context("Failed to sign creation transaction")?;
        let envelope = TxEnvelope::from(tx.into_signed(signature));
        let raw = Bytes::from(envelope.encoded_2718());

        tracing::debug!(
            from = %from,
            nonce = nonce.to::<u64>(),
            gas_limit,
            "Broadcasting creation transaction"
        );

        self.call("eth_sendRawTransaction", vec![json!(raw)]).await
    }

    async fn wait_for_receipt(
        &self,
        transaction_hash: B256,
        confirmations: u64,
    ) -> Result<Receipt> {
        Ok(poll_until("transaction receipt", DEFAULT_POLL_INTERVAL, || {
            self.confirmed_receipt(transaction_hash, confirmations)
        })
        .await)
    }

    async fn transaction_status(&self, transaction_hash: B256) -> Result<TransactionStatus> {
        if let Some(receipt) = self.receipt(transaction_hash).await? {
            if let Some(block_number) = receipt.block_number.map(|n| n.to::<u64>()) {
                return Ok(TransactionStatus::Mined(receipt.into_receipt(block_number)));
            }
        }

        let transaction: Option<serde_json::Value> = self
            .call("eth_getTransactionByHash", vec![json!(transaction_hash)])
            .await?;
        Ok(match transaction {
            Some(_) => TransactionStatus::Pending,
            None => TransactionStatus::Dropped,
        })
    }

    async fn has_code(&self, address: Address) -> Result<bool> {
        let code: Bytes = self
            .call("eth_getCode", vec![json!(address), json!("latest")])
            .await?;
        Ok(!code.is_empty())
    }
}
