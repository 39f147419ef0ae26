//! Core data model shared by the scanner, the relay engine and the orchestrator.

use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::SolCall;
use serde::{Deserialize, Serialize};

use crate::contracts::{DestinationBridge, SourceBridge};
use crate::error::WardenError;

/// Which side of the bridge a chain plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainRole {
    Source,
    Destination,
}

impl ChainRole {
    pub const ALL: [ChainRole; 2] = [ChainRole::Source, ChainRole::Destination];

    /// The other chain of the pair.
    pub fn counterpart(self) -> ChainRole {
        match self {
            ChainRole::Source => ChainRole::Destination,
            ChainRole::Destination => ChainRole::Source,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChainRole::Source => "source",
            ChainRole::Destination => "destination",
        }
    }
}

impl fmt::Display for ChainRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainRole {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(ChainRole::Source),
            "destination" => Ok(ChainRole::Destination),
            other => Err(WardenError::InvalidDirection(other.to_string())),
        }
    }
}

/// Inclusive block interval, `1 <= from <= to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    /// Returns `None` when the interval is empty or starts at block 0.
    pub fn new(from: u64, to: u64) -> Option<Self> {
        (from >= 1 && from <= to).then_some(Self { from, to })
    }

    /// The window `[max(1, head - lookback), head]`.
    pub fn recent(head: u64, lookback: u64) -> Self {
        let head = head.max(1);
        Self {
            from: head.saturating_sub(lookback).max(1),
            to: head,
        }
    }

    pub fn single(block: u64) -> Self {
        Self {
            from: block.max(1),
            to: block.max(1),
        }
    }

    pub fn block_count(&self) -> u64 {
        self.to - self.from + 1
    }

    pub fn contains(&self, block: u64) -> bool {
        self.from <= block && block <= self.to
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// A log exactly as the provider returned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub block_hash: Option<B256>,
    pub transaction_hash: Option<B256>,
    pub log_index: Option<u64>,
}

impl From<alloy::rpc::types::Log> for RawLog {
    fn from(log: alloy::rpc::types::Log) -> Self {
        Self {
            address: log.inner.address,
            topics: log.inner.data.topics().to_vec(),
            data: log.inner.data.data.clone(),
            block_number: log.block_number,
            block_hash: log.block_hash,
            transaction_hash: log.transaction_hash,
            log_index: log.log_index,
        }
    }
}

/// Payload of a bridge event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    /// Tokens locked on the source chain
    Deposit {
        token: Address,
        recipient: Address,
        amount: U256,
    },
    /// Wrapped tokens burned on the destination chain
    Unwrap {
        underlying_token: Address,
        recipient: Address,
        amount: U256,
    },
}

impl DecodedEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DecodedEvent::Deposit { .. } => "Deposit",
            DecodedEvent::Unwrap { .. } => "Unwrap",
        }
    }
}

/// Unique position of an event on its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId {
    pub chain: ChainRole,
    pub transaction_hash: B256,
    pub log_index: u64,
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.chain, self.transaction_hash, self.log_index)
    }
}

/// A decoded event together with where it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedEvent {
    pub event: DecodedEvent,
    pub id: EventId,
    pub block_number: u64,
    pub log_index: u64,
}

impl ObservedEvent {
    /// Sort key: ascending block, then log index.
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

/// Calls the warden submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayFunction {
    Wrap,
    Withdraw,
}

impl RelayFunction {
    pub fn name(self) -> &'static str {
        match self {
            RelayFunction::Wrap => "wrap",
            RelayFunction::Withdraw => "withdraw",
        }
    }

    pub fn signature(self) -> &'static str {
        match self {
            RelayFunction::Wrap => "wrap(address,address,uint256)",
            RelayFunction::Withdraw => "withdraw(address,address,uint256)",
        }
    }
}

impl fmt::Display for RelayFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One transaction to submit on the acting chain, derived from one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayIntent {
    pub target: ChainRole,
    pub function: RelayFunction,
    pub token: Address,
    pub recipient: Address,
    pub amount: U256,
    pub origin: EventId,
}

impl RelayIntent {
    /// Deposit maps to `wrap` on the destination, Unwrap to `withdraw` on the source.
    pub fn from_observed(observed: &ObservedEvent) -> Self {
        let (target, function, token, recipient, amount) = match observed.event {
            DecodedEvent::Deposit {
                token,
                recipient,
                amount,
            } => (
                ChainRole::Destination,
                RelayFunction::Wrap,
                token,
                recipient,
                amount,
            ),
            DecodedEvent::Unwrap {
                underlying_token,
                recipient,
                amount,
            } => (
                ChainRole::Source,
                RelayFunction::Withdraw,
                underlying_token,
                recipient,
                amount,
            ),
        };
        Self {
            target,
            function,
            token,
            recipient,
            amount,
            origin: observed.id,
        }
    }

    /// ABI-encoded call data, selector included.
    pub fn calldata(&self) -> Bytes {
        let encoded = match self.function {
            RelayFunction::Wrap => DestinationBridge::wrapCall {
                token: self.token,
                recipient: self.recipient,
                amount: self.amount,
            }
            .abi_encode(),
            RelayFunction::Withdraw => SourceBridge::withdrawCall {
                underlying_token: self.token,
                recipient: self.recipient,
                amount: self.amount,
            }
            .abi_encode(),
        };
        Bytes::from(encoded)
    }
}
