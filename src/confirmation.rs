//! Receipt tracking for submitted relay transactions.

use std::time::Duration;

use alloy::primitives::TxHash;
use tracing::{debug, warn};

use crate::endpoint::ChainEndpoint;
use crate::error::{ProviderError, SubmissionError};

/// How long to wait for a receipt and how often to poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Result of checking a transaction receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationResult {
    /// No receipt yet
    Pending,
    /// Included and succeeded
    Confirmed(u64),
    /// Included and reverted
    Reverted(u64),
}

/// Single receipt lookup
pub async fn check_receipt(
    endpoint: &dyn ChainEndpoint,
    tx_hash: TxHash,
) -> Result<ConfirmationResult, ProviderError> {
    let Some(receipt) = endpoint.transaction_receipt(tx_hash).await? else {
        return Ok(ConfirmationResult::Pending);
    };
    // A receipt without a block is not final yet
    let Some(block_number) = receipt.block_number else {
        return Ok(ConfirmationResult::Pending);
    };
    Ok(if receipt.success {
        ConfirmationResult::Confirmed(block_number)
    } else {
        ConfirmationResult::Reverted(block_number)
    })
}

/// Poll until the transaction is included or the policy's timeout elapses.
///
/// Returns the inclusion block. Poll errors are logged and polling continues.
pub async fn wait_for_confirmation(
    endpoint: &dyn ChainEndpoint,
    tx_hash: TxHash,
    policy: ConfirmationPolicy,
) -> Result<u64, SubmissionError> {
    let poll = async {
        loop {
            match check_receipt(endpoint, tx_hash).await {
                Ok(ConfirmationResult::Confirmed(block_number)) => return Ok(block_number),
                Ok(ConfirmationResult::Reverted(block_number)) => {
                    return Err(SubmissionError::Reverted {
                        tx_hash,
                        block_number,
                    })
                }
                Ok(ConfirmationResult::Pending) => {
                    debug!(tx_hash = %tx_hash, "Receipt not available yet");
                }
                Err(e) => {
                    warn!(tx_hash = %tx_hash, error = %e, "Receipt poll failed");
                }
            }
            tokio::time::sleep(policy.poll_interval).await;
        }
    };

    tokio::time::timeout(policy.timeout, poll)
        .await
        .unwrap_or(Err(SubmissionError::Timeout {
            tx_hash,
            waited: policy.timeout,
        }))
}
