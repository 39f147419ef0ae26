//! Test support: a scripted [`ChainEndpoint`] and log/registry builders.
//!
//! Compiled for unit tests and behind the `testing` feature.

use std::collections::HashSet;
use std::sync::Mutex;

use alloy::primitives::{keccak256, Address, Bytes, TxHash, B256, U256};
use async_trait::async_trait;

use crate::endpoint::{ChainEndpoint, LogQuery, LogTarget, ReceiptSummary};
use crate::error::ProviderError;
use crate::identity::SignedTransaction;
use crate::types::{ChainRole, RawLog};

/// Anvil's first default account
pub const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Deterministic hash the mock uses for block `number`.
pub fn block_hash_for(number: u64) -> B256 {
    B256::left_padding_from(&number.to_be_bytes())
}

fn block_for_hash(hash: B256) -> Option<u64> {
    if hash[..24].iter().any(|b| *b != 0) {
        return None;
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[24..]);
    Some(u64::from_be_bytes(bytes))
}

fn event_log(
    signature: &str,
    contract: Address,
    first: Address,
    recipient: Address,
    amount: u64,
    block: u64,
    log_index: u64,
) -> RawLog {
    let mut data = Vec::with_capacity(96);
    data.extend_from_slice(first.into_word().as_slice());
    data.extend_from_slice(recipient.into_word().as_slice());
    data.extend_from_slice(&U256::from(amount).to_be_bytes::<32>());
    RawLog {
        address: contract,
        topics: vec![keccak256(signature)],
        data: Bytes::from(data),
        block_number: Some(block),
        block_hash: Some(block_hash_for(block)),
        transaction_hash: Some(keccak256(format!("{}:{}:{}", signature, block, log_index))),
        log_index: Some(log_index),
    }
}

/// `Deposit(token, recipient, amount)` with no indexed parameters.
pub fn deposit_log(
    contract: Address,
    token: Address,
    recipient: Address,
    amount: u64,
    block: u64,
    log_index: u64,
) -> RawLog {
    event_log(
        "Deposit(address,address,uint256)",
        contract,
        token,
        recipient,
        amount,
        block,
        log_index,
    )
}

/// `Unwrap(underlying_token, to, amount)` with no indexed parameters.
pub fn unwrap_log(
    contract: Address,
    underlying_token: Address,
    recipient: Address,
    amount: u64,
    block: u64,
    log_index: u64,
) -> RawLog {
    event_log(
        "Unwrap(address,address,uint256)",
        contract,
        underlying_token,
        recipient,
        amount,
        block,
        log_index,
    )
}

fn abi_item(kind: &str, name: &str, params: [(&str, &str); 3]) -> serde_json::Value {
    let inputs: Vec<_> = params
        .iter()
        .map(|(name, ty)| {
            let mut input = serde_json::json!({ "name": name, "type": ty, "internalType": ty });
            if kind == "event" {
                input["indexed"] = serde_json::Value::Bool(false);
            }
            input
        })
        .collect();
    if kind == "event" {
        serde_json::json!({ "type": "event", "name": name, "inputs": inputs, "anonymous": false })
    } else {
        serde_json::json!({
            "type": "function",
            "name": name,
            "inputs": inputs,
            "outputs": [],
            "stateMutability": "nonpayable"
        })
    }
}

/// Registry document with a Deposit/withdraw source and an Unwrap/wrap destination.
pub fn sample_registry_json(source: Address, destination: Address) -> String {
    let transfer = |first: &'static str, second: &'static str| {
        [(first, "address"), (second, "address"), ("amount", "uint256")]
    };
    serde_json::json!({
        "source": {
            "address": source.to_string(),
            "abi": [
                abi_item("event", "Deposit", transfer("token", "recipient")),
                abi_item("function", "withdraw", transfer("underlying_token", "recipient")),
            ]
        },
        "destination": {
            "address": destination.to_string(),
            "abi": [
                abi_item("event", "Unwrap", transfer("underlying_token", "to")),
                abi_item("function", "wrap", transfer("token", "recipient")),
            ]
        }
    })
    .to_string()
}

/// A call made against the mock, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    BlockNumber,
    BlockHash(u64),
    Logs(LogTarget),
    PendingNonce(Address),
    GasPrice,
    ChainId,
    Broadcast { nonce: u64 },
    Receipt(TxHash),
}

/// How the mock answers receipt polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptMode {
    Confirm,
    Revert,
    Never,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<MockCall>,
    sent: Vec<SignedTransaction>,
    nonce: u64,
    broadcasts: usize,
    log_queries: usize,
}

/// Scripted endpoint. A mock without a head is unreachable.
#[derive(Debug)]
pub struct MockEndpoint {
    role: ChainRole,
    head: Option<u64>,
    logs: Vec<RawLog>,
    max_range: Option<u64>,
    reject_ranges: bool,
    failing_blocks: HashSet<u64>,
    ignore_filters: bool,
    reverse: bool,
    lagging_queries: usize,
    failing_broadcasts: HashSet<usize>,
    unacknowledged_broadcasts: HashSet<usize>,
    unacknowledged_reply: &'static str,
    failing_nonce: bool,
    receipt_mode: ReceiptMode,
    gas_price: u128,
    chain_id: u64,
    state: Mutex<MockState>,
}

impl MockEndpoint {
    pub fn new(role: ChainRole) -> Self {
        Self {
            role,
            head: None,
            logs: Vec::new(),
            max_range: None,
            reject_ranges: false,
            failing_blocks: HashSet::new(),
            ignore_filters: false,
            reverse: false,
            lagging_queries: 0,
            failing_broadcasts: HashSet::new(),
            unacknowledged_broadcasts: HashSet::new(),
            unacknowledged_reply: "already known",
            failing_nonce: false,
            receipt_mode: ReceiptMode::Confirm,
            gas_price: 1_000_000_000,
            chain_id: 31337,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn with_head(mut self, head: u64) -> Self {
        self.head = Some(head);
        self
    }

    pub fn with_logs(mut self, logs: Vec<RawLog>) -> Self {
        self.logs = logs;
        self
    }

    /// Reject range queries spanning more than `blocks` blocks.
    pub fn with_max_range(mut self, blocks: u64) -> Self {
        self.max_range = Some(blocks);
        self
    }

    /// Reject every range query; only block-hash queries work.
    pub fn rejecting_all_ranges(mut self) -> Self {
        self.reject_ranges = true;
        self
    }

    /// Block-hash queries for these blocks fail.
    pub fn with_failing_blocks(mut self, blocks: impl IntoIterator<Item = u64>) -> Self {
        self.failing_blocks = blocks.into_iter().collect();
        self
    }

    /// Return logs regardless of address and topic0.
    pub fn ignoring_log_filters(mut self) -> Self {
        self.ignore_filters = true;
        self
    }

    pub fn answering_in_reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// The first `queries` successful log queries answer empty, like a node
    /// whose log index trails its head.
    pub fn lagging_for(mut self, queries: usize) -> Self {
        self.lagging_queries = queries;
        self
    }

    /// Broadcasts with these zero-based indexes are rejected.
    pub fn with_failing_broadcasts(mut self, indexes: impl IntoIterator<Item = usize>) -> Self {
        self.failing_broadcasts = indexes.into_iter().collect();
        self
    }

    /// Broadcasts with these indexes enter the pool, but the caller gets
    /// `reply` as an error instead of the hash.
    pub fn with_unacknowledged_broadcasts(
        mut self,
        indexes: impl IntoIterator<Item = usize>,
        reply: &'static str,
    ) -> Self {
        self.unacknowledged_broadcasts = indexes.into_iter().collect();
        self.unacknowledged_reply = reply;
        self
    }

    pub fn with_failing_nonce_reads(mut self) -> Self {
        self.failing_nonce = true;
        self
    }

    pub fn with_receipts(mut self, mode: ReceiptMode) -> Self {
        self.receipt_mode = mode;
        self
    }

    pub fn with_nonce(self, nonce: u64) -> Self {
        self.lock().nonce = nonce;
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn log_query_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, MockCall::Logs(_)))
            .count()
    }

    /// Transactions accepted by `broadcast`, in order.
    pub fn sent(&self) -> Vec<SignedTransaction> {
        self.lock().sent.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: MockCall) {
        self.lock().calls.push(call);
    }

    fn head(&self) -> Result<u64, ProviderError> {
        self.head
            .ok_or_else(|| ProviderError::new("eth_blockNumber", "connection refused"))
    }

    fn matches_filter(&self, log: &RawLog, query: &LogQuery) -> bool {
        self.ignore_filters
            || (log.address == query.address && log.topics.first() == Some(&query.topic0))
    }
}

#[async_trait]
impl ChainEndpoint for MockEndpoint {
    fn role(&self) -> ChainRole {
        self.role
    }

    async fn block_number(&self) -> Result<u64, ProviderError> {
        self.record(MockCall::BlockNumber);
        self.head()
    }

    async fn block_hash(&self, number: u64) -> Result<Option<B256>, ProviderError> {
        self.record(MockCall::BlockHash(number));
        let head = self.head()?;
        Ok((number <= head).then(|| block_hash_for(number)))
    }

    async fn logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, ProviderError> {
        self.record(MockCall::Logs(query.target));
        self.head()?;

        let in_target: Box<dyn Fn(&RawLog) -> bool> = match query.target {
            LogTarget::Range(range) => {
                let too_wide = self.max_range.is_some_and(|max| range.block_count() > max);
                if self.reject_ranges || too_wide {
                    return Err(ProviderError::new(
                        "eth_getLogs",
                        "eth_getLogs block range is too large",
                    ));
                }
                Box::new(move |log: &RawLog| log.block_number.is_some_and(|b| range.contains(b)))
            }
            LogTarget::BlockHash(hash) => {
                if block_for_hash(hash).is_some_and(|b| self.failing_blocks.contains(&b)) {
                    return Err(ProviderError::new("eth_getLogs", "header not found"));
                }
                Box::new(move |log: &RawLog| log.block_hash == Some(hash))
            }
        };

        {
            let mut state = self.lock();
            state.log_queries += 1;
            if state.log_queries <= self.lagging_queries {
                return Ok(Vec::new());
            }
        }

        let mut logs: Vec<RawLog> = self
            .logs
            .iter()
            .filter(|log| in_target(log) && self.matches_filter(log, query))
            .cloned()
            .collect();
        if self.reverse {
            logs.reverse();
        }
        Ok(logs)
    }

    async fn pending_nonce(&self, account: Address) -> Result<u64, ProviderError> {
        self.record(MockCall::PendingNonce(account));
        if self.failing_nonce {
            return Err(ProviderError::new("eth_getTransactionCount", "503 Service Unavailable"));
        }
        Ok(self.lock().nonce)
    }

    async fn gas_price(&self) -> Result<u128, ProviderError> {
        self.record(MockCall::GasPrice);
        Ok(self.gas_price)
    }

    async fn chain_id(&self) -> Result<u64, ProviderError> {
        self.record(MockCall::ChainId);
        Ok(self.chain_id)
    }

    async fn broadcast(&self, tx: &SignedTransaction) -> Result<TxHash, ProviderError> {
        self.record(MockCall::Broadcast { nonce: tx.nonce });
        let mut state = self.lock();
        let index = state.broadcasts;
        state.broadcasts += 1;
        if self.failing_broadcasts.contains(&index) {
            return Err(ProviderError::new(
                "eth_sendRawTransaction",
                "insufficient funds for gas * price + value",
            ));
        }
        if tx.nonce < state.nonce {
            return Err(ProviderError::new("eth_sendRawTransaction", "nonce too low"));
        }
        state.nonce = tx.nonce + 1;
        state.sent.push(tx.clone());
        if self.unacknowledged_broadcasts.contains(&index) {
            return Err(ProviderError::new(
                "eth_sendRawTransaction",
                self.unacknowledged_reply,
            ));
        }
        Ok(tx.hash)
    }

    async fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> Result<Option<ReceiptSummary>, ProviderError> {
        self.record(MockCall::Receipt(hash));
        let block_number = Some(self.head.unwrap_or(0) + 1);
        Ok(match self.receipt_mode {
            ReceiptMode::Confirm => Some(ReceiptSummary {
                block_number,
                success: true,
            }),
            ReceiptMode::Revert => Some(ReceiptSummary {
                block_number,
                success: false,
            }),
            ReceiptMode::Never => None,
        })
    }
}
