//! Chain endpoint abstraction.
//!
//! [`ChainEndpoint`] is the RPC surface the scanner and the relay engine need.
//! [`AlloyEndpoint`] implements it over alloy HTTP providers with ordered URL
//! fallback and a per-request deadline. Block identity is read with a raw
//! `eth_getBlockByNumber` call that decodes only the hash, so chains with
//! non-standard headers (proof-of-authority `extraData`) work.

use std::future::Future;
use std::time::Duration;

use alloy::eips::BlockId;
use alloy::primitives::{Address, TxHash, B256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::Filter;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{ProviderError, WardenError};
use crate::identity::SignedTransaction;
use crate::rpc_fallback::{create_targets, RpcTarget};
use crate::types::{BlockRange, ChainRole, RawLog};

/// What a log query selects, besides address and topic0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Range(BlockRange),
    BlockHash(B256),
}

/// An `eth_getLogs` request for one contract and one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogQuery {
    pub address: Address,
    pub topic0: B256,
    pub target: LogTarget,
}

impl LogQuery {
    fn to_filter(self) -> Filter {
        let filter = Filter::new()
            .address(self.address)
            .event_signature(self.topic0);
        match self.target {
            LogTarget::Range(range) => filter.from_block(range.from).to_block(range.to),
            LogTarget::BlockHash(hash) => filter.at_block_hash(hash),
        }
    }
}

/// The parts of a receipt the relay engine looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptSummary {
    pub block_number: Option<u64>,
    pub success: bool,
}

/// RPC surface of one chain.
#[async_trait]
pub trait ChainEndpoint: Send + Sync {
    /// Role this endpoint serves, for logs and metrics.
    fn role(&self) -> ChainRole;

    async fn block_number(&self) -> Result<u64, ProviderError>;

    /// Canonical hash of block `number`, `None` if the node does not have it.
    async fn block_hash(&self, number: u64) -> Result<Option<B256>, ProviderError>;

    async fn logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, ProviderError>;

    /// Transaction count including the pending pool.
    async fn pending_nonce(&self, account: Address) -> Result<u64, ProviderError>;

    async fn gas_price(&self) -> Result<u128, ProviderError>;

    async fn chain_id(&self) -> Result<u64, ProviderError>;

    async fn broadcast(&self, tx: &SignedTransaction) -> Result<TxHash, ProviderError>;

    async fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> Result<Option<ReceiptSummary>, ProviderError>;
}

/// JSON-RPC response wrapper
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Only the identity fields of a block header
#[derive(Debug, Deserialize)]
struct BlockIdentity {
    hash: Option<B256>,
}

/// [`ChainEndpoint`] backed by alloy HTTP providers.
pub struct AlloyEndpoint {
    role: ChainRole,
    targets: Vec<RpcTarget>,
    http: reqwest::Client,
    request_timeout: Duration,
    chain_id: OnceCell<u64>,
}

impl AlloyEndpoint {
    /// `urls` are tried in order; `chain_id` skips the RPC read when known.
    pub fn new(
        role: ChainRole,
        urls: &[String],
        chain_id: Option<u64>,
        request_timeout: Duration,
    ) -> Result<Self, WardenError> {
        let targets = create_targets(urls)?;
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| WardenError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            role,
            targets,
            http,
            request_timeout,
            chain_id: OnceCell::new_with(chain_id),
        })
    }

    /// Run `call` against each target in order until one succeeds.
    async fn with_fallback<T, F, Fut>(
        &self,
        operation: &'static str,
        call: F,
    ) -> Result<T, ProviderError>
    where
        F: Fn(RpcTarget) -> Fut,
        Fut: Future<Output = Result<T, String>>,
    {
        let mut last_error = None;
        for (i, target) in self.targets.iter().enumerate() {
            let error = match tokio::time::timeout(self.request_timeout, call(target.clone())).await
            {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(message)) => ProviderError::new(operation, message),
                Err(_) => ProviderError::timeout(operation, self.request_timeout),
            };
            if i + 1 < self.targets.len() {
                warn!(
                    chain = %self.role,
                    rpc = %target.log_safe_url(),
                    error = %error,
                    "RPC call failed, trying next endpoint"
                );
            }
            last_error = Some(error);
        }
        Err(last_error.unwrap_or_else(|| ProviderError::new(operation, "no RPC endpoints")))
    }

    async fn raw_block_identity(
        http: reqwest::Client,
        url: String,
        number: u64,
    ) -> Result<Option<B256>, String> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "eth_getBlockByNumber",
            "params": [format!("0x{:x}", number), false],
            "id": 1
        });

        let response = http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }
        let response = response
            .json::<RpcResponse<BlockIdentity>>()
            .await
            .map_err(|e| e.to_string())?;

        if let Some(error) = response.error {
            return Err(format!("RPC error: {} - {}", error.code, error.message));
        }
        Ok(response.result.and_then(|block| block.hash))
    }
}

fn provider(target: &RpcTarget) -> &RootProvider<Http<Client>> {
    &target.provider
}

#[async_trait]
impl ChainEndpoint for AlloyEndpoint {
    fn role(&self) -> ChainRole {
        self.role
    }

    async fn block_number(&self) -> Result<u64, ProviderError> {
        self.with_fallback("eth_blockNumber", |target| async move {
            provider(&target)
                .get_block_number()
                .await
                .map_err(|e| e.to_string())
        })
        .await
    }

    async fn block_hash(&self, number: u64) -> Result<Option<B256>, ProviderError> {
        self.with_fallback("eth_getBlockByNumber", |target| {
            Self::raw_block_identity(self.http.clone(), target.url, number)
        })
        .await
    }

    async fn logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, ProviderError> {
        let filter = query.to_filter();
        let logs = self
            .with_fallback("eth_getLogs", |target| {
                let filter = filter.clone();
                async move {
                    provider(&target)
                        .get_logs(&filter)
                        .await
                        .map_err(|e| e.to_string())
                }
            })
            .await?;
        debug!(chain = %self.role, target = ?query.target, count = logs.len(), "Fetched logs");
        Ok(logs.into_iter().map(RawLog::from).collect())
    }

    async fn pending_nonce(&self, account: Address) -> Result<u64, ProviderError> {
        self.with_fallback("eth_getTransactionCount", |target| async move {
            provider(&target)
                .get_transaction_count(account)
                .block_id(BlockId::pending())
                .await
                .map_err(|e| e.to_string())
        })
        .await
    }

    async fn gas_price(&self) -> Result<u128, ProviderError> {
        self.with_fallback("eth_gasPrice", |target| async move {
            provider(&target)
                .get_gas_price()
                .await
                .map_err(|e| e.to_string())
        })
        .await
    }

    async fn chain_id(&self) -> Result<u64, ProviderError> {
        self.chain_id
            .get_or_try_init(|| {
                self.with_fallback("eth_chainId", |target| async move {
                    provider(&target)
                        .get_chain_id()
                        .await
                        .map_err(|e| e.to_string())
                })
            })
            .await
            .copied()
    }

    async fn broadcast(&self, tx: &SignedTransaction) -> Result<TxHash, ProviderError> {
        self.with_fallback("eth_sendRawTransaction", |target| {
            let raw = tx.raw.clone();
            async move {
                let pending = provider(&target)
                    .send_raw_transaction(&raw)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(*pending.tx_hash())
            }
        })
        .await
    }

    async fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> Result<Option<ReceiptSummary>, ProviderError> {
        self.with_fallback("eth_getTransactionReceipt", |target| async move {
            let receipt = provider(&target)
                .get_transaction_receipt(hash)
                .await
                .map_err(|e| e.to_string())?;
            Ok(receipt.map(|r| ReceiptSummary {
                block_number: r.block_number,
                success: r.status(),
            }))
        })
        .await
    }
}
