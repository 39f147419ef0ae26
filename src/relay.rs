//! Relay engine - submits wrap/withdraw transactions on the acting chain
//!
//! Every intent gets a fresh pending nonce, the current gas price and a legacy
//! EIP-155 signature, then waits for its receipt before the next intent is
//! touched. A failed intent is reported and the batch moves on; nothing is
//! retried within a pass.

use std::time::Instant;

use alloy::primitives::TxHash;
use tracing::{debug, error, info, warn};

use crate::config::WardenConfig;
use crate::confirmation::{wait_for_confirmation, ConfirmationPolicy};
use crate::endpoint::ChainEndpoint;
use crate::error::SubmissionError;
use crate::identity::{UnsignedCall, WardenIdentity};
use crate::metrics;
use crate::registry::ContractInfo;
use crate::types::RelayIntent;

/// A relay transaction that made it into a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub nonce: u64,
}

/// Outcome of one intent
#[derive(Debug, Clone)]
pub struct SubmissionResult {
    pub intent: RelayIntent,
    pub outcome: Result<Confirmation, SubmissionError>,
}

impl SubmissionResult {
    pub fn is_confirmed(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Signs, broadcasts and confirms relay transactions
#[derive(Debug, Clone)]
pub struct RelayEngine {
    gas_limit: u64,
    confirmation: ConfirmationPolicy,
}

impl RelayEngine {
    pub fn new(gas_limit: u64, confirmation: ConfirmationPolicy) -> Self {
        Self {
            gas_limit,
            confirmation,
        }
    }

    pub fn from_config(config: &WardenConfig) -> Self {
        Self::new(
            config.gas_limit,
            ConfirmationPolicy {
                timeout: config.receipt_timeout,
                poll_interval: config.receipt_poll_interval,
            },
        )
    }

    /// Submit one intent and wait for its receipt.
    pub async fn relay(
        &self,
        intent: &RelayIntent,
        acting: &dyn ChainEndpoint,
        warden: &WardenIdentity,
        contract: &ContractInfo,
    ) -> SubmissionResult {
        let chain = acting.role();
        let started = Instant::now();
        let outcome = self.submit(intent, acting, warden, contract).await;

        match &outcome {
            Ok(confirmation) => {
                info!(
                    chain = %chain,
                    function = %intent.function,
                    origin = %intent.origin,
                    tx_hash = %confirmation.tx_hash,
                    block_number = confirmation.block_number,
                    nonce = confirmation.nonce,
                    "Relay transaction confirmed"
                );
                metrics::record_relay(chain.as_str(), intent.function.name(), "confirmed");
                metrics::record_relay_latency(chain.as_str(), started.elapsed().as_secs_f64());
            }
            Err(e) => {
                error!(
                    chain = %chain,
                    function = %intent.function,
                    origin = %intent.origin,
                    stage = e.stage(),
                    tx_hash = ?e.tx_hash(),
                    error = %e,
                    "Relay failed"
                );
                metrics::record_relay(chain.as_str(), intent.function.name(), e.stage());
            }
        }

        SubmissionResult {
            intent: intent.clone(),
            outcome,
        }
    }

    /// Relay intents strictly in order; failures do not stop the batch.
    pub async fn relay_batch(
        &self,
        intents: &[RelayIntent],
        acting: &dyn ChainEndpoint,
        warden: &WardenIdentity,
        contract: &ContractInfo,
    ) -> Vec<SubmissionResult> {
        let mut results = Vec::with_capacity(intents.len());
        for intent in intents {
            results.push(self.relay(intent, acting, warden, contract).await);
        }
        results
    }

    async fn submit(
        &self,
        intent: &RelayIntent,
        acting: &dyn ChainEndpoint,
        warden: &WardenIdentity,
        contract: &ContractInfo,
    ) -> Result<Confirmation, SubmissionError> {
        if intent.target != acting.role() {
            warn!(
                target = %intent.target,
                acting = %acting.role(),
                "Intent target does not match the acting chain"
            );
        }

        // Fresh for every intent so earlier submissions are accounted for
        let nonce = acting
            .pending_nonce(warden.address())
            .await
            .map_err(SubmissionError::Nonce)?;
        let gas_price = acting.gas_price().await.map_err(SubmissionError::GasPrice)?;
        let chain_id = acting.chain_id().await.map_err(SubmissionError::ChainId)?;

        let call = UnsignedCall {
            to: contract.address,
            input: intent.calldata(),
            nonce,
            gas_limit: self.gas_limit,
            gas_price,
            chain_id,
        };
        debug!(
            chain = %acting.role(),
            function = %intent.function,
            token = %intent.token,
            recipient = %intent.recipient,
            amount = %intent.amount,
            nonce,
            gas_price,
            "Submitting relay transaction"
        );

        let signed = warden.sign(&call).await?;
        let tx_hash = match acting.broadcast(&signed).await {
            Ok(tx_hash) => {
                if tx_hash != signed.hash {
                    warn!(returned = %tx_hash, computed = %signed.hash, "Node returned an unexpected hash");
                }
                tx_hash
            }
            // The transaction may be in the pool; its receipt decides
            Err(e) if e.may_have_been_accepted() => {
                warn!(
                    chain = %acting.role(),
                    tx_hash = %signed.hash,
                    nonce,
                    error = %e,
                    "Broadcast outcome unknown, tracking the signed transaction"
                );
                signed.hash
            }
            Err(e) => return Err(SubmissionError::Broadcast(e)),
        };
        info!(
            chain = %acting.role(),
            function = %intent.function,
            tx_hash = %tx_hash,
            nonce,
            "Relay transaction sent, waiting for confirmation"
        );

        let block_number = wait_for_confirmation(acting, tx_hash, self.confirmation).await?;
        Ok(Confirmation {
            tx_hash,
            block_number,
            nonce,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ChainRegistry;
    use crate::testing::{sample_registry_json, MockCall, MockEndpoint, ReceiptMode, ANVIL_KEY};
    use crate::types::{ChainRole, EventId, RelayFunction};
    use alloy::primitives::{address, Address, B256, U256};
    use std::time::Duration;

    const SOURCE: Address = address!("1111111111111111111111111111111111111111");
    const DESTINATION: Address = address!("2222222222222222222222222222222222222222");

    fn engine() -> RelayEngine {
        RelayEngine::new(
            500_000,
            ConfirmationPolicy {
                timeout: Duration::from_millis(100),
                poll_interval: Duration::from_millis(10),
            },
        )
    }

    fn destination_contract() -> ContractInfo {
        ChainRegistry::parse(&sample_registry_json(SOURCE, DESTINATION))
            .unwrap()
            .contract(ChainRole::Destination)
            .unwrap()
            .clone()
    }

    fn wrap_intent(amount: u64, log_index: u64) -> RelayIntent {
        RelayIntent {
            target: ChainRole::Destination,
            function: RelayFunction::Wrap,
            token: address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
            recipient: address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"),
            amount: U256::from(amount),
            origin: EventId {
                chain: ChainRole::Source,
                transaction_hash: B256::repeat_byte(0x0f),
                log_index,
            },
        }
    }

    fn warden() -> WardenIdentity {
        WardenIdentity::from_private_key(ANVIL_KEY).unwrap()
    }

    #[tokio::test]
    async fn test_relay_confirms_and_targets_contract() {
        let mock = MockEndpoint::new(ChainRole::Destination)
            .with_head(500)
            .with_nonce(4);
        let result = engine()
            .relay(&wrap_intent(1000, 0), &mock, &warden(), &destination_contract())
            .await;

        let confirmation = result.outcome.unwrap();
        assert_eq!(confirmation.nonce, 4);
        assert_eq!(confirmation.block_number, 501);

        let sent = mock.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, DESTINATION);
        assert_eq!(sent[0].input, wrap_intent(1000, 0).calldata());
        assert_eq!(sent[0].hash, confirmation.tx_hash);
    }

    #[tokio::test]
    async fn test_nonce_read_fresh_and_monotonic() {
        let mock = MockEndpoint::new(ChainRole::Destination)
            .with_head(500)
            .with_nonce(10);
        let intents: Vec<_> = (0..5).map(|i| wrap_intent(100 + i, i)).collect();
        let results = engine()
            .relay_batch(&intents, &mock, &warden(), &destination_contract())
            .await;

        assert!(results.iter().all(SubmissionResult::is_confirmed));
        let nonces: Vec<u64> = mock.sent().iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, vec![10, 11, 12, 13, 14]);

        let nonce_reads = mock
            .calls()
            .iter()
            .filter(|c| matches!(c, MockCall::PendingNonce(_)))
            .count();
        assert_eq!(nonce_reads, 5);
    }

    #[tokio::test]
    async fn test_failed_broadcast_does_not_stop_batch() {
        let mock = MockEndpoint::new(ChainRole::Destination)
            .with_head(500)
            .with_failing_broadcasts([0]);
        let intents = vec![wrap_intent(1, 0), wrap_intent(2, 1)];
        let results = engine()
            .relay_batch(&intents, &mock, &warden(), &destination_contract())
            .await;

        assert_eq!(results.len(), 2);
        assert!(matches!(
            results[0].outcome,
            Err(SubmissionError::Broadcast(_))
        ));
        assert!(results[1].is_confirmed());
        assert_eq!(results[1].intent.amount, U256::from(2u64));
        // the failed broadcast did not consume a nonce
        assert_eq!(mock.sent()[0].nonce, 0);
    }

    #[tokio::test]
    async fn test_already_known_broadcast_is_confirmed_by_receipt() {
        let mock = MockEndpoint::new(ChainRole::Destination)
            .with_head(500)
            .with_unacknowledged_broadcasts([0], "already known");
        let result = engine()
            .relay(&wrap_intent(1000, 0), &mock, &warden(), &destination_contract())
            .await;

        let confirmation = result.outcome.unwrap();
        let sent = mock.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(confirmation.tx_hash, sent[0].hash);
        assert_eq!(confirmation.block_number, 501);
        assert!(mock
            .calls()
            .contains(&MockCall::Receipt(sent[0].hash)));
    }

    #[tokio::test]
    async fn test_timed_out_broadcast_is_tracked_not_resent() {
        let mock = MockEndpoint::new(ChainRole::Destination)
            .with_head(500)
            .with_unacknowledged_broadcasts([0], "request timed out after 30s");
        let intents = vec![wrap_intent(1, 0), wrap_intent(2, 1)];
        let results = engine()
            .relay_batch(&intents, &mock, &warden(), &destination_contract())
            .await;

        assert!(results.iter().all(SubmissionResult::is_confirmed));
        let nonces: Vec<u64> = mock.sent().iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_lost_broadcast_without_receipt_times_out_with_hash() {
        let mock = MockEndpoint::new(ChainRole::Destination)
            .with_head(500)
            .with_unacknowledged_broadcasts([0], "already known")
            .with_receipts(ReceiptMode::Never);
        let result = engine()
            .relay(&wrap_intent(1, 0), &mock, &warden(), &destination_contract())
            .await;

        let err = result.outcome.unwrap_err();
        assert_eq!(err.stage(), "timeout");
        assert_eq!(err.tx_hash(), Some(mock.sent()[0].hash));
    }

    #[tokio::test]
    async fn test_revert_is_reported() {
        let mock = MockEndpoint::new(ChainRole::Destination)
            .with_head(500)
            .with_receipts(ReceiptMode::Revert);
        let result = engine()
            .relay(&wrap_intent(1, 0), &mock, &warden(), &destination_contract())
            .await;
        let err = result.outcome.unwrap_err();
        assert_eq!(err.stage(), "reverted");
        assert_eq!(err.tx_hash(), Some(mock.sent()[0].hash));
    }

    #[tokio::test]
    async fn test_unconfirmed_transaction_times_out_without_resubmission() {
        let mock = MockEndpoint::new(ChainRole::Destination)
            .with_head(500)
            .with_receipts(ReceiptMode::Never);
        let result = engine()
            .relay(&wrap_intent(1, 0), &mock, &warden(), &destination_contract())
            .await;
        assert!(matches!(
            result.outcome,
            Err(SubmissionError::Timeout { .. })
        ));
        let broadcasts = mock
            .calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Broadcast { .. }))
            .count();
        assert_eq!(broadcasts, 1);
    }

    #[tokio::test]
    async fn test_nonce_failure_stops_before_signing() {
        let mock = MockEndpoint::new(ChainRole::Destination)
            .with_head(500)
            .with_failing_nonce_reads();
        let result = engine()
            .relay(&wrap_intent(1, 0), &mock, &warden(), &destination_contract())
            .await;
        assert!(matches!(result.outcome, Err(SubmissionError::Nonce(_))));
        assert!(mock.sent().is_empty());
    }
}
