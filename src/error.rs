//! Error taxonomy for the warden.
//!
//! - [`WardenError`]: pass-level failures. Configuration errors abort a pass.
//! - [`ProviderError`]: a single RPC call failed; classified for retry and
//!   degradation decisions.
//! - [`DecodeError`]: a log is not the event we asked for; dropped silently.
//! - [`SubmissionError`]: one relay intent failed; the batch continues.

use std::path::PathBuf;
use std::time::Duration;

use alloy::primitives::TxHash;
use thiserror::Error;

use crate::retry::{classify_error, ErrorClass};
use crate::types::ChainRole;

/// Failures that end a relay pass.
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("invalid direction {0:?}: expected \"source\" or \"destination\"")]
    InvalidDirection(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to read contract registry {}: {source}", .path.display())]
    RegistryIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed contract registry {}: {source}", .path.display())]
    RegistryParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no contract registered for the {0} chain")]
    MissingContract(ChainRole),

    #[error("relay ledger {}: {message}", .path.display())]
    Ledger { path: PathBuf, message: String },

    #[error("{role} chain unreachable: {source}")]
    ChainUnreachable {
        role: ChainRole,
        #[source]
        source: ProviderError,
    },
}

impl WardenError {
    /// Whether this is a configuration error (fatal, no network involved).
    pub fn is_config(&self) -> bool {
        !matches!(self, WardenError::ChainUnreachable { .. })
    }
}

/// A failed RPC call, classified from the provider's message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed ({class}): {message}")]
pub struct ProviderError {
    pub operation: &'static str,
    pub class: ErrorClass,
    pub message: String,
}

impl ProviderError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            operation,
            class: classify_error(&message),
            message,
        }
    }

    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        Self {
            operation,
            class: ErrorClass::Transient,
            message: format!("request timed out after {:?}", after),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.class == ErrorClass::RateLimited
    }

    /// A failed broadcast that the node may still have accepted: the
    /// transaction is already known, its nonce was just consumed, or the
    /// reply never arrived.
    pub fn may_have_been_accepted(&self) -> bool {
        if self.class == ErrorClass::NonceTooLow {
            return true;
        }
        let message = self.message.to_lowercase();
        message.contains("timed out") || message.contains("timeout")
    }
}

/// Why a raw log was not accepted as the requested event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("log emitted by {0}, not the watched contract")]
    ForeignAddress(alloy::primitives::Address),

    #[error("topic0 does not match the event selector")]
    TopicMismatch,

    #[error("log is missing {0}")]
    MissingMetadata(&'static str),

    #[error("abi decoding failed: {0}")]
    Abi(String),

    #[error("field {index} has an unexpected type")]
    FieldType { index: usize },
}

/// Failure of a single relay submission.
#[derive(Debug, Clone, Error)]
pub enum SubmissionError {
    #[error("failed to read pending nonce: {0}")]
    Nonce(ProviderError),

    #[error("failed to read gas price: {0}")]
    GasPrice(ProviderError),

    #[error("failed to read chain id: {0}")]
    ChainId(ProviderError),

    #[error("failed to sign transaction: {0}")]
    Signing(String),

    #[error("broadcast rejected: {0}")]
    Broadcast(ProviderError),

    #[error("transaction {tx_hash} reverted in block {block_number}")]
    Reverted { tx_hash: TxHash, block_number: u64 },

    #[error("transaction {tx_hash} not confirmed within {waited:?}")]
    Timeout { tx_hash: TxHash, waited: Duration },
}

impl SubmissionError {
    /// Short label for the failing step, used in metrics and logs.
    pub fn stage(&self) -> &'static str {
        match self {
            SubmissionError::Nonce(_) => "nonce",
            SubmissionError::GasPrice(_) => "gas_price",
            SubmissionError::ChainId(_) => "chain_id",
            SubmissionError::Signing(_) => "signing",
            SubmissionError::Broadcast(_) => "broadcast",
            SubmissionError::Reverted { .. } => "reverted",
            SubmissionError::Timeout { .. } => "timeout",
        }
    }

    /// Hash of the transaction, if it got as far as the network.
    pub fn tx_hash(&self) -> Option<TxHash> {
        match self {
            SubmissionError::Reverted { tx_hash, .. } | SubmissionError::Timeout { tx_hash, .. } => {
                Some(*tx_hash)
            }
            _ => None,
        }
    }
}
