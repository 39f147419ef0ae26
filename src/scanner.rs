//! Event scanner
//!
//! Finds every occurrence of one event from one contract in a bounded block
//! window. Provider failures below the chain-head read never fail the scan:
//! they push the affected units down the degradation ladder and, at the
//! bottom, are skipped and counted.

use tracing::{debug, info};

use crate::config::ScanPolicy;
use crate::endpoint::{ChainEndpoint, LogQuery, LogTarget};
use crate::error::{ProviderError, WardenError};
use crate::events::EventSpec;
use crate::metrics;
use crate::retry::{with_retry, RetryConfig};
use crate::strategy::{DegradationLadder, ScanTier};
use crate::types::{BlockRange, ObservedEvent, RawLog};

/// Counters for one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub logs_kept: usize,
    pub logs_dropped: usize,
    pub units_skipped: usize,
    pub queries: u32,
}

/// Result of one scan
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Ascending by (block number, log index)
    pub events: Vec<ObservedEvent>,
    /// The window actually scanned; `None` when it started past the head
    pub range: Option<BlockRange>,
    pub stats: ScanStats,
}

impl ScanOutcome {
    fn empty() -> Self {
        Self {
            events: Vec::new(),
            range: None,
            stats: ScanStats::default(),
        }
    }
}

/// Bounded-window event discovery over a degradation ladder
#[derive(Debug, Clone)]
pub struct EventScanner {
    ladder: DegradationLadder,
    head_retry: RetryConfig,
}

impl EventScanner {
    pub fn new(ladder: DegradationLadder, head_retry: RetryConfig) -> Self {
        Self { ladder, head_retry }
    }

    pub fn from_policy(policy: &ScanPolicy) -> Self {
        Self::new(DegradationLadder::from_policy(policy), RetryConfig::default())
    }

    pub fn ladder(&self) -> &DegradationLadder {
        &self.ladder
    }

    /// Current chain head, retried with backoff before giving up.
    pub async fn head(&self, endpoint: &dyn ChainEndpoint) -> Result<u64, WardenError> {
        with_retry(&self.head_retry, |_| endpoint.block_number())
            .await
            .map_err(|source| WardenError::ChainUnreachable {
                role: endpoint.role(),
                source,
            })
    }

    /// Scan `range`, clamped to the chain head.
    pub async fn scan(
        &self,
        endpoint: &dyn ChainEndpoint,
        spec: &EventSpec,
        range: BlockRange,
    ) -> Result<ScanOutcome, WardenError> {
        let head = self.head(endpoint).await?;
        Ok(self.scan_below_head(endpoint, spec, range, head).await)
    }

    /// Scan `[max(1, head - lookback), head]`.
    pub async fn scan_recent(
        &self,
        endpoint: &dyn ChainEndpoint,
        spec: &EventSpec,
        lookback: u64,
    ) -> Result<ScanOutcome, WardenError> {
        let head = self.head(endpoint).await?;
        let range = BlockRange::recent(head, lookback);
        Ok(self.scan_below_head(endpoint, spec, range, head).await)
    }

    async fn scan_below_head(
        &self,
        endpoint: &dyn ChainEndpoint,
        spec: &EventSpec,
        range: BlockRange,
        head: u64,
    ) -> ScanOutcome {
        let chain = endpoint.role();
        // Block 0 is genesis and never holds bridge events
        let from = range.from.max(1);
        if from > head {
            debug!(chain = %chain, %range, head, "Window starts past the head, nothing to scan");
            return ScanOutcome::empty();
        }
        let range = BlockRange {
            from,
            to: range.to.min(head),
        };

        info!(
            chain = %chain,
            event = spec.kind.signature(),
            contract = %spec.contract,
            from_block = range.from,
            to_block = range.to,
            "Scanning blocks"
        );

        let report = self
            .ladder
            .run(range, |tier, unit| async move {
                let result = fetch_unit(endpoint, spec, tier, unit).await;
                let status = match &result {
                    Ok(_) => "ok",
                    Err(e) => e.class.as_str(),
                };
                metrics::record_scan_query(chain.as_str(), tier.label(), status);
                result
            })
            .await;

        let mut stats = ScanStats {
            units_skipped: report.skipped.len(),
            queries: report.attempts,
            ..ScanStats::default()
        };
        let mut events = Vec::with_capacity(report.items.len());
        for log in &report.items {
            match spec.decode(log) {
                Ok(event) => {
                    stats.logs_kept += 1;
                    events.push(event);
                }
                Err(reason) => {
                    stats.logs_dropped += 1;
                    debug!(
                        chain = %chain,
                        tx_hash = ?log.transaction_hash,
                        log_index = ?log.log_index,
                        reason = %reason,
                        "Dropping log"
                    );
                }
            }
        }
        // Providers may answer out of order
        events.sort_by_key(ObservedEvent::position);
        events.dedup_by_key(|event| event.id);

        metrics::record_logs(chain.as_str(), stats.logs_kept, stats.logs_dropped);
        metrics::record_units_skipped(chain.as_str(), stats.units_skipped);
        metrics::set_last_scanned_block(chain.as_str(), range.to);

        info!(
            chain = %chain,
            found = events.len(),
            dropped = stats.logs_dropped,
            skipped_units = stats.units_skipped,
            queries = stats.queries,
            "Scan complete"
        );

        ScanOutcome {
            events,
            range: Some(range),
            stats,
        }
    }
}

/// One ladder unit: a range query, or a block-hash query for a single block.
async fn fetch_unit(
    endpoint: &dyn ChainEndpoint,
    spec: &EventSpec,
    tier: ScanTier,
    unit: BlockRange,
) -> Result<Vec<RawLog>, ProviderError> {
    let target = match tier {
        ScanTier::WholeRange | ScanTier::Chunked { .. } => LogTarget::Range(unit),
        ScanTier::PerBlock { .. } => {
            let hash = endpoint.block_hash(unit.from).await?.ok_or_else(|| {
                ProviderError::new(
                    "eth_getBlockByNumber",
                    format!("block {} not found", unit.from),
                )
            })?;
            LogTarget::BlockHash(hash)
        }
    };
    endpoint
        .logs(&LogQuery {
            address: spec.contract,
            topic0: spec.selector,
            target,
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ChainRegistry;
    use crate::events::EventKind;
    use crate::testing::{deposit_log, sample_registry_json, unwrap_log, MockCall, MockEndpoint};
    use crate::types::{ChainRole, DecodedEvent};
    use alloy::primitives::{address, Address, U256};
    use std::time::Duration;

    const SOURCE: Address = address!("1111111111111111111111111111111111111111");
    const DESTINATION: Address = address!("2222222222222222222222222222222222222222");
    const TOKEN: Address = address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
    const RECIPIENT: Address = address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");

    fn deposit_spec() -> EventSpec {
        ChainRegistry::parse(&sample_registry_json(SOURCE, DESTINATION))
            .unwrap()
            .contract(ChainRole::Source)
            .unwrap()
            .event_spec(EventKind::Deposit)
            .unwrap()
    }

    fn scanner(chunk: u64) -> EventScanner {
        let policy = ScanPolicy {
            lookback_blocks: 30,
            range_query: true,
            chunk_size: chunk,
            block_pause: Duration::ZERO,
            rate_limit_backoff: Duration::ZERO,
            empty_retry: None,
        };
        EventScanner::new(DegradationLadder::from_policy(&policy), RetryConfig::none())
    }

    fn amounts(outcome: &ScanOutcome) -> Vec<u64> {
        outcome
            .events
            .iter()
            .map(|e| match e.event {
                DecodedEvent::Deposit { amount, .. } => amount.to::<u64>(),
                DecodedEvent::Unwrap { amount, .. } => amount.to::<u64>(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_window_past_head_is_empty_without_queries() {
        let mock = MockEndpoint::new(ChainRole::Source).with_head(50);
        let outcome = scanner(10)
            .scan(&mock, &deposit_spec(), BlockRange { from: 60, to: 80 })
            .await
            .unwrap();

        assert!(outcome.events.is_empty());
        assert!(outcome.range.is_none());
        assert_eq!(mock.log_query_count(), 0);
    }

    #[tokio::test]
    async fn test_range_is_clamped_to_head() {
        let mock = MockEndpoint::new(ChainRole::Source).with_head(100);
        let outcome = scanner(10)
            .scan(&mock, &deposit_spec(), BlockRange { from: 90, to: 500 })
            .await
            .unwrap();
        assert_eq!(outcome.range, Some(BlockRange { from: 90, to: 100 }));
    }

    #[tokio::test]
    async fn test_genesis_block_never_scanned() {
        let mock = MockEndpoint::new(ChainRole::Source)
            .with_head(3)
            .rejecting_all_ranges()
            .with_logs(vec![deposit_log(SOURCE, TOKEN, RECIPIENT, 5, 1, 0)]);
        let outcome = scanner(0)
            .scan(&mock, &deposit_spec(), BlockRange { from: 0, to: 3 })
            .await
            .unwrap();

        assert_eq!(outcome.range, Some(BlockRange { from: 1, to: 3 }));
        assert_eq!(amounts(&outcome), vec![5]);
        let calls = mock.calls();
        assert!(!calls.contains(&MockCall::BlockHash(0)));
        assert_eq!(
            calls.iter().filter(|c| **c == MockCall::BlockHash(1)).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_window_at_genesis_of_empty_chain_is_empty() {
        let mock = MockEndpoint::new(ChainRole::Source).with_head(0);
        let outcome = scanner(10)
            .scan(&mock, &deposit_spec(), BlockRange { from: 0, to: 0 })
            .await
            .unwrap();
        assert!(outcome.range.is_none());
        assert_eq!(mock.log_query_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_head_is_hard_failure() {
        let mock = MockEndpoint::new(ChainRole::Source);
        let err = scanner(10)
            .scan_recent(&mock, &deposit_spec(), 30)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WardenError::ChainUnreachable {
                role: ChainRole::Source,
                ..
            }
        ));
        assert!(!err.is_config());
    }

    #[tokio::test]
    async fn test_topic_mismatch_dropped_when_filter_ignored() {
        let mock = MockEndpoint::new(ChainRole::Source)
            .with_head(120)
            .ignoring_log_filters()
            .with_logs(vec![
                deposit_log(SOURCE, TOKEN, RECIPIENT, 1, 100, 0),
                unwrap_log(SOURCE, TOKEN, RECIPIENT, 2, 101, 0),
                deposit_log(SOURCE, TOKEN, RECIPIENT, 3, 102, 0),
            ]);
        let outcome = scanner(10)
            .scan_recent(&mock, &deposit_spec(), 30)
            .await
            .unwrap();

        assert_eq!(amounts(&outcome), vec![1, 3]);
        assert_eq!(outcome.stats.logs_kept, 2);
        assert_eq!(outcome.stats.logs_dropped, 1);
    }

    #[tokio::test]
    async fn test_output_sorted_when_provider_answers_out_of_order() {
        let mock = MockEndpoint::new(ChainRole::Source)
            .with_head(120)
            .answering_in_reverse()
            .with_logs(vec![
                deposit_log(SOURCE, TOKEN, RECIPIENT, 1, 95, 0),
                deposit_log(SOURCE, TOKEN, RECIPIENT, 2, 95, 4),
                deposit_log(SOURCE, TOKEN, RECIPIENT, 3, 110, 1),
                deposit_log(SOURCE, TOKEN, RECIPIENT, 4, 118, 0),
            ]);
        let outcome = scanner(10)
            .scan_recent(&mock, &deposit_spec(), 30)
            .await
            .unwrap();

        assert_eq!(amounts(&outcome), vec![1, 2, 3, 4]);
        let positions: Vec<_> = outcome.events.iter().map(|e| e.position()).collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
    }

    #[tokio::test]
    async fn test_chunked_equals_whole_range() {
        let logs = vec![
            deposit_log(SOURCE, TOKEN, RECIPIENT, 10, 91, 0),
            deposit_log(SOURCE, TOKEN, RECIPIENT, 11, 104, 2),
            deposit_log(SOURCE, TOKEN, RECIPIENT, 12, 105, 0),
            deposit_log(SOURCE, TOKEN, RECIPIENT, 13, 119, 1),
        ];
        let spec = deposit_spec();
        let range = BlockRange { from: 90, to: 120 };

        let whole = MockEndpoint::new(ChainRole::Source)
            .with_head(120)
            .with_logs(logs.clone());
        let whole = scanner(10).scan(&whole, &spec, range).await.unwrap();

        let split = MockEndpoint::new(ChainRole::Source)
            .with_head(120)
            .with_logs(logs);
        let left = scanner(10)
            .scan(&split, &spec, BlockRange { from: 90, to: 104 })
            .await
            .unwrap();
        let right = scanner(10)
            .scan(&split, &spec, BlockRange { from: 105, to: 120 })
            .await
            .unwrap();

        let mut joined = left.events.clone();
        joined.extend(right.events.clone());
        assert_eq!(whole.events, joined);
    }

    #[tokio::test]
    async fn test_rejected_range_recovered_through_chunks() {
        let mock = MockEndpoint::new(ChainRole::Source)
            .with_head(120)
            .with_max_range(3)
            .with_logs(vec![
                deposit_log(SOURCE, TOKEN, RECIPIENT, 1, 92, 0),
                deposit_log(SOURCE, TOKEN, RECIPIENT, 2, 100, 0),
                deposit_log(SOURCE, TOKEN, RECIPIENT, 3, 120, 0),
            ]);
        let outcome = scanner(3)
            .scan(&mock, &deposit_spec(), BlockRange { from: 90, to: 120 })
            .await
            .unwrap();

        assert_eq!(amounts(&outcome), vec![1, 2, 3]);
        assert_eq!(outcome.stats.units_skipped, 0);
        // one rejected whole-range query, then 11 chunks of at most 3 blocks
        assert_eq!(outcome.stats.queries, 12);
    }

    #[tokio::test]
    async fn test_per_block_fallback_uses_block_hash() {
        let mock = MockEndpoint::new(ChainRole::Source)
            .with_head(20)
            .rejecting_all_ranges()
            .with_logs(vec![deposit_log(SOURCE, TOKEN, RECIPIENT, 9, 18, 0)]);
        let outcome = scanner(0)
            .scan(&mock, &deposit_spec(), BlockRange { from: 16, to: 20 })
            .await
            .unwrap();

        assert_eq!(amounts(&outcome), vec![9]);
        let calls = mock.calls();
        assert!(calls.contains(&MockCall::BlockHash(18)));
        assert!(calls
            .iter()
            .any(|c| matches!(c, MockCall::Logs(LogTarget::BlockHash(_)))));
    }

    #[tokio::test]
    async fn test_failing_block_is_skipped_and_counted() {
        let mock = MockEndpoint::new(ChainRole::Source)
            .with_head(20)
            .rejecting_all_ranges()
            .with_failing_blocks([17])
            .with_logs(vec![
                deposit_log(SOURCE, TOKEN, RECIPIENT, 1, 16, 0),
                deposit_log(SOURCE, TOKEN, RECIPIENT, 2, 17, 0),
                deposit_log(SOURCE, TOKEN, RECIPIENT, 3, 18, 0),
            ]);
        let outcome = scanner(0)
            .scan(&mock, &deposit_spec(), BlockRange { from: 16, to: 18 })
            .await
            .unwrap();

        assert_eq!(amounts(&outcome), vec![1, 3]);
        assert_eq!(outcome.stats.units_skipped, 1);
    }

    #[tokio::test]
    async fn test_foreign_contract_logs_dropped() {
        let mock = MockEndpoint::new(ChainRole::Source)
            .with_head(120)
            .with_logs(vec![
                deposit_log(SOURCE, TOKEN, RECIPIENT, 1, 100, 0),
                deposit_log(DESTINATION, TOKEN, RECIPIENT, 2, 100, 1),
            ]);
        let outcome = scanner(10)
            .scan_recent(&mock, &deposit_spec(), 30)
            .await
            .unwrap();
        assert_eq!(amounts(&outcome), vec![1]);
        assert_eq!(
            outcome.events[0].event,
            DecodedEvent::Deposit {
                token: TOKEN,
                recipient: RECIPIENT,
                amount: U256::from(1u64),
            }
        );
    }
}
