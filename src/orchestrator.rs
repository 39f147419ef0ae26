//! Relay orchestrator
//!
//! A pass picks the watched chain from the direction, scans it for the
//! watched event and relays every new event on the counterpart chain.
//! `watch` repeats source and destination passes until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ScanPolicy};
use crate::endpoint::{AlloyEndpoint, ChainEndpoint};
use crate::error::WardenError;
use crate::events::EventKind;
use crate::identity::WardenIdentity;
use crate::ledger::RelayLedger;
use crate::metrics;
use crate::registry::ChainRegistry;
use crate::relay::{RelayEngine, SubmissionResult};
use crate::retry::RetryConfig;
use crate::scanner::{EventScanner, ScanOutcome};
use crate::strategy::DegradationLadder;
use crate::types::{BlockRange, ChainRole, RelayIntent};

/// What one pass did
#[derive(Debug, Clone)]
pub struct PassSummary {
    /// The watched chain
    pub direction: ChainRole,
    pub range: Option<BlockRange>,
    pub events_found: usize,
    pub relayed: usize,
    pub failed: usize,
    pub already_relayed: usize,
    pub logs_dropped: usize,
    pub units_skipped: usize,
    pub results: Vec<SubmissionResult>,
}

/// The warden: two chains, one identity, one registry
pub struct Warden {
    registry: ChainRegistry,
    identity: WardenIdentity,
    source: Arc<dyn ChainEndpoint>,
    destination: Arc<dyn ChainEndpoint>,
    source_policy: ScanPolicy,
    destination_policy: ScanPolicy,
    engine: RelayEngine,
    ledger: Option<RelayLedger>,
    head_retry: RetryConfig,
}

impl Warden {
    pub fn new(
        registry: ChainRegistry,
        identity: WardenIdentity,
        source: Arc<dyn ChainEndpoint>,
        destination: Arc<dyn ChainEndpoint>,
        engine: RelayEngine,
    ) -> Self {
        Self {
            registry,
            identity,
            source,
            destination,
            source_policy: ScanPolicy::default_for(ChainRole::Source),
            destination_policy: ScanPolicy::default_for(ChainRole::Destination),
            engine,
            ledger: None,
            head_retry: RetryConfig::default(),
        }
    }

    /// Build endpoints, identity and ledger from configuration.
    pub fn from_config(config: &Config, registry: ChainRegistry) -> Result<Self, WardenError> {
        let identity = WardenIdentity::from_private_key(config.warden.private_key.expose())?;

        let endpoint = |role: ChainRole| -> Result<Arc<dyn ChainEndpoint>, WardenError> {
            let chain = config.chain(role);
            Ok(Arc::new(AlloyEndpoint::new(
                role,
                &chain.all_rpc_urls(),
                chain.chain_id,
                config.warden.rpc_timeout,
            )?))
        };

        let mut warden = Self::new(
            registry,
            identity,
            endpoint(ChainRole::Source)?,
            endpoint(ChainRole::Destination)?,
            RelayEngine::from_config(&config.warden),
        )
        .with_scan_policy(ChainRole::Source, config.source.scan.clone())
        .with_scan_policy(ChainRole::Destination, config.destination.scan.clone());

        if let Some(path) = &config.warden.ledger_path {
            warden = warden.with_ledger(RelayLedger::open(path)?);
        }

        info!(
            warden = %warden.identity.address(),
            ledger = warden.ledger.is_some(),
            "Warden initialized"
        );
        Ok(warden)
    }

    pub fn with_scan_policy(mut self, role: ChainRole, policy: ScanPolicy) -> Self {
        match role {
            ChainRole::Source => self.source_policy = policy,
            ChainRole::Destination => self.destination_policy = policy,
        }
        self
    }

    pub fn with_ledger(mut self, ledger: RelayLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_head_retry(mut self, retry: RetryConfig) -> Self {
        self.head_retry = retry;
        self
    }

    pub fn ledger(&self) -> Option<&RelayLedger> {
        self.ledger.as_ref()
    }

    fn endpoint(&self, role: ChainRole) -> Arc<dyn ChainEndpoint> {
        match role {
            ChainRole::Source => Arc::clone(&self.source),
            ChainRole::Destination => Arc::clone(&self.destination),
        }
    }

    fn policy(&self, role: ChainRole) -> &ScanPolicy {
        match role {
            ChainRole::Source => &self.source_policy,
            ChainRole::Destination => &self.destination_policy,
        }
    }

    /// Run one pass. `direction` names the watched chain, "source" or
    /// "destination"; anything else fails before any network call.
    pub async fn scan(&mut self, direction: &str) -> Result<PassSummary, WardenError> {
        let watched: ChainRole = direction.parse()?;
        self.scan_role(watched).await
    }

    /// Run one pass for a parsed direction.
    pub async fn scan_role(&mut self, watched: ChainRole) -> Result<PassSummary, WardenError> {
        let result = self.run_pass(watched).await;
        metrics::record_pass(
            watched.as_str(),
            matches!(&result, Ok(summary) if summary.failed == 0),
        );
        result
    }

    async fn run_pass(&mut self, watched: ChainRole) -> Result<PassSummary, WardenError> {
        let acting = watched.counterpart();
        let kind = EventKind::watched_on(watched);

        let spec = self.registry.contract(watched)?.event_spec(kind)?;
        let acting_contract = self.registry.contract(acting)?.clone();
        acting_contract.require_function(kind.relay_function())?;

        let watched_endpoint = self.endpoint(watched);
        let acting_endpoint = self.endpoint(acting);
        let policy = self.policy(watched).clone();

        info!(
            watched = %watched,
            acting = %acting,
            event = kind.signature(),
            function = %kind.relay_function(),
            "Starting relay pass"
        );

        let scanner = EventScanner::new(
            DegradationLadder::from_policy(&policy),
            self.head_retry.clone(),
        );
        let mut outcome = scanner
            .scan_recent(watched_endpoint.as_ref(), &spec, policy.lookback_blocks)
            .await?;

        if outcome.events.is_empty() {
            if let Some(retry) = policy.empty_retry {
                info!(
                    chain = %watched,
                    lookback = retry.lookback_blocks,
                    "No events found, rescanning recent blocks one at a time"
                );
                let rescanner = EventScanner::new(
                    DegradationLadder::per_block(retry.block_pause, policy.rate_limit_backoff),
                    self.head_retry.clone(),
                );
                let retried = rescanner
                    .scan_recent(watched_endpoint.as_ref(), &spec, retry.lookback_blocks)
                    .await?;
                outcome = merge_retry(outcome, retried);
            }
        }

        for observed in &outcome.events {
            metrics::record_event_detected(watched.as_str(), observed.event.name());
        }

        let mut already_relayed = 0;
        let intents: Vec<RelayIntent> = outcome
            .events
            .iter()
            .filter(|observed| {
                let seen = self
                    .ledger
                    .as_ref()
                    .is_some_and(|ledger| ledger.contains(&observed.id));
                if seen {
                    already_relayed += 1;
                    debug!(event = %observed.id, "Already relayed, skipping");
                }
                !seen
            })
            .map(RelayIntent::from_observed)
            .collect();

        let results = self
            .engine
            .relay_batch(
                &intents,
                acting_endpoint.as_ref(),
                &self.identity,
                &acting_contract,
            )
            .await;

        if let Some(ledger) = self.ledger.as_mut() {
            for result in &results {
                if let Ok(confirmation) = &result.outcome {
                    let observed_in = outcome
                        .events
                        .iter()
                        .find(|e| e.id == result.intent.origin)
                        .map_or(0, |e| e.block_number);
                    ledger.record(result.intent.origin, observed_in, confirmation);
                }
            }
            // One extra lookback of slack for fallback nodes behind the head
            if let Some(range) = outcome.range {
                ledger.prune(watched, range.from.saturating_sub(policy.lookback_blocks));
            }
            // The relays already happened; a failed write only costs de-duplication
            if let Err(e) = ledger.save() {
                error!(error = %e, "Failed to persist relay ledger");
            }
        }

        let relayed = results.iter().filter(|r| r.is_confirmed()).count();
        let summary = PassSummary {
            direction: watched,
            range: outcome.range,
            events_found: outcome.events.len(),
            relayed,
            failed: results.len() - relayed,
            already_relayed,
            logs_dropped: outcome.stats.logs_dropped,
            units_skipped: outcome.stats.units_skipped,
            results,
        };

        info!(
            watched = %watched,
            range = ?summary.range.map(|r| r.to_string()),
            events_found = summary.events_found,
            relayed = summary.relayed,
            failed = summary.failed,
            already_relayed = summary.already_relayed,
            logs_dropped = summary.logs_dropped,
            units_skipped = summary.units_skipped,
            "Relay pass complete"
        );
        Ok(summary)
    }

    /// Run source then destination passes every `interval` until `shutdown`
    /// fires or closes. Configuration errors stop the loop.
    pub async fn watch(
        &mut self,
        interval: Duration,
        mut shutdown: mpsc::Receiver<()>,
    ) -> Result<(), WardenError> {
        info!(interval_secs = interval.as_secs(), "Warden watch loop starting");

        loop {
            for role in ChainRole::ALL {
                match self.scan_role(role).await {
                    Ok(_) => {}
                    Err(e) if e.is_config() => return Err(e),
                    Err(e) => warn!(watched = %role, error = %e, "Relay pass failed, retrying next tick"),
                }
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        Ok(())
    }
}

/// Fold the empty-result rescan into the first outcome.
fn merge_retry(first: ScanOutcome, retried: ScanOutcome) -> ScanOutcome {
    let mut stats = retried.stats;
    stats.logs_kept += first.stats.logs_kept;
    stats.logs_dropped += first.stats.logs_dropped;
    stats.units_skipped += first.stats.units_skipped;
    stats.queries += first.stats.queries;
    ScanOutcome {
        events: retried.events,
        range: first.range.or(retried.range),
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirmation::ConfirmationPolicy;
    use crate::config::EmptyRetry;
    use crate::error::SubmissionError;
    use crate::testing::{
        deposit_log, sample_registry_json, unwrap_log, MockCall, MockEndpoint, ANVIL_KEY,
    };
    use crate::types::{EventId, RelayFunction};
    use alloy::primitives::{address, Address, U256};

    const SOURCE: Address = address!("1111111111111111111111111111111111111111");
    const DESTINATION: Address = address!("2222222222222222222222222222222222222222");
    const TOKEN: Address = address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
    const RECIPIENT: Address = address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");

    fn quiet_policy(lookback: u64, chunk: u64, empty_retry: Option<EmptyRetry>) -> ScanPolicy {
        ScanPolicy {
            lookback_blocks: lookback,
            range_query: true,
            chunk_size: chunk,
            block_pause: Duration::ZERO,
            rate_limit_backoff: Duration::ZERO,
            empty_retry,
        }
    }

    fn warden(source: Arc<MockEndpoint>, destination: Arc<MockEndpoint>) -> Warden {
        let registry = ChainRegistry::parse(&sample_registry_json(SOURCE, DESTINATION)).unwrap();
        let engine = RelayEngine::new(
            500_000,
            ConfirmationPolicy {
                timeout: Duration::from_millis(100),
                poll_interval: Duration::from_millis(10),
            },
        );
        Warden::new(
            registry,
            WardenIdentity::from_private_key(ANVIL_KEY).unwrap(),
            source,
            destination,
            engine,
        )
        .with_scan_policy(ChainRole::Source, quiet_policy(30, 10, None))
        .with_scan_policy(ChainRole::Destination, quiet_policy(30, 3, None))
        .with_head_retry(RetryConfig::none())
    }

    #[tokio::test]
    async fn test_deposit_relays_one_wrap() {
        let source = Arc::new(
            MockEndpoint::new(ChainRole::Source)
                .with_head(120)
                .with_logs(vec![deposit_log(SOURCE, TOKEN, RECIPIENT, 1000, 100, 0)]),
        );
        let destination = Arc::new(MockEndpoint::new(ChainRole::Destination).with_head(300));
        let mut warden = warden(source.clone(), destination.clone());

        let summary = warden.scan("source").await.unwrap();

        assert_eq!(summary.range, Some(BlockRange { from: 90, to: 120 }));
        assert_eq!(summary.events_found, 1);
        assert_eq!(summary.relayed, 1);
        assert_eq!(summary.failed, 0);

        let intent = &summary.results[0].intent;
        assert_eq!(intent.function, RelayFunction::Wrap);
        assert_eq!(intent.target, ChainRole::Destination);
        assert_eq!(intent.token, TOKEN);
        assert_eq!(intent.recipient, RECIPIENT);
        assert_eq!(intent.amount, U256::from(1000u64));

        let sent = destination.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, DESTINATION);
        assert!(source.sent().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_range_recovered_in_chunks_and_withdrawn() {
        let destination = Arc::new(
            MockEndpoint::new(ChainRole::Destination)
                .with_head(120)
                .with_max_range(3)
                .with_logs(vec![
                    unwrap_log(DESTINATION, TOKEN, RECIPIENT, 5, 91, 0),
                    unwrap_log(DESTINATION, TOKEN, RECIPIENT, 6, 104, 1),
                    unwrap_log(DESTINATION, TOKEN, RECIPIENT, 7, 120, 0),
                ]),
        );
        let source = Arc::new(MockEndpoint::new(ChainRole::Source).with_head(50));
        let mut warden = warden(source.clone(), destination.clone());

        let summary = warden.scan("destination").await.unwrap();

        assert_eq!(summary.events_found, 3);
        assert_eq!(summary.relayed, 3);
        assert_eq!(summary.units_skipped, 0);
        let amounts: Vec<U256> = summary.results.iter().map(|r| r.intent.amount).collect();
        assert_eq!(
            amounts,
            vec![U256::from(5u64), U256::from(6u64), U256::from(7u64)]
        );
        assert!(summary
            .results
            .iter()
            .all(|r| r.intent.function == RelayFunction::Withdraw));
        let sent = source.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|tx| tx.to == SOURCE));
    }

    #[tokio::test]
    async fn test_invalid_direction_makes_no_calls() {
        let source = Arc::new(MockEndpoint::new(ChainRole::Source).with_head(120));
        let destination = Arc::new(MockEndpoint::new(ChainRole::Destination).with_head(120));
        let mut warden = warden(source.clone(), destination.clone());

        let err = warden.scan("invalid").await.unwrap_err();

        assert!(matches!(err, WardenError::InvalidDirection(_)));
        assert!(err.is_config());
        assert!(source.calls().is_empty());
        assert!(destination.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_broadcast_does_not_block_next_intent() {
        let source = Arc::new(
            MockEndpoint::new(ChainRole::Source)
                .with_head(120)
                .with_logs(vec![
                    deposit_log(SOURCE, TOKEN, RECIPIENT, 1, 100, 0),
                    deposit_log(SOURCE, TOKEN, RECIPIENT, 2, 101, 0),
                ]),
        );
        let destination = Arc::new(
            MockEndpoint::new(ChainRole::Destination)
                .with_head(300)
                .with_failing_broadcasts([0]),
        );
        let mut warden = warden(source, destination.clone());

        let summary = warden.scan("source").await.unwrap();

        assert_eq!(summary.events_found, 2);
        assert_eq!(summary.relayed, 1);
        assert_eq!(summary.failed, 1);
        assert!(matches!(
            summary.results[0].outcome,
            Err(SubmissionError::Broadcast(_))
        ));
        assert!(summary.results[1].is_confirmed());
        let broadcasts = destination
            .calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Broadcast { .. }))
            .count();
        assert_eq!(broadcasts, 2);
    }

    #[tokio::test]
    async fn test_unreachable_watched_chain_fails_pass() {
        let source = Arc::new(MockEndpoint::new(ChainRole::Source));
        let destination = Arc::new(MockEndpoint::new(ChainRole::Destination).with_head(300));
        let mut warden = warden(source, destination.clone());

        let err = warden.scan("source").await.unwrap_err();
        assert!(matches!(err, WardenError::ChainUnreachable { .. }));
        assert!(destination.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ledger_prevents_relay_in_later_pass() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let source = Arc::new(
            MockEndpoint::new(ChainRole::Source)
                .with_head(120)
                .with_logs(vec![deposit_log(SOURCE, TOKEN, RECIPIENT, 1000, 100, 0)]),
        );
        let destination = Arc::new(MockEndpoint::new(ChainRole::Destination).with_head(300));
        let mut warden = warden(source.clone(), destination.clone())
            .with_ledger(RelayLedger::open(&path).unwrap());

        let first = warden.scan("source").await.unwrap();
        assert_eq!(first.relayed, 1);
        let second = warden.scan("source").await.unwrap();
        assert_eq!(second.events_found, 1);
        assert_eq!(second.already_relayed, 1);
        assert_eq!(second.relayed, 0);
        assert_eq!(destination.sent().len(), 1);

        // a fresh process sees the persisted entry
        let reopened = RelayLedger::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[tokio::test]
    async fn test_unacknowledged_relay_is_ledgered_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let source = Arc::new(
            MockEndpoint::new(ChainRole::Source)
                .with_head(120)
                .with_logs(vec![deposit_log(SOURCE, TOKEN, RECIPIENT, 1000, 100, 0)]),
        );
        let destination = Arc::new(
            MockEndpoint::new(ChainRole::Destination)
                .with_head(300)
                .with_unacknowledged_broadcasts([0], "already known"),
        );
        let mut warden = warden(source.clone(), destination.clone())
            .with_ledger(RelayLedger::open(&path).unwrap());

        let first = warden.scan("source").await.unwrap();
        assert_eq!(first.relayed, 1);
        let second = warden.scan("source").await.unwrap();
        assert_eq!(second.already_relayed, 1);
        assert_eq!(destination.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_ledger_drops_entries_behind_lookback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let deposit = deposit_log(SOURCE, TOKEN, RECIPIENT, 1000, 100, 0);
        let destination = Arc::new(MockEndpoint::new(ChainRole::Destination).with_head(300));

        let early = Arc::new(
            MockEndpoint::new(ChainRole::Source)
                .with_head(120)
                .with_logs(vec![deposit.clone()]),
        );
        let mut first = warden(early, destination.clone())
            .with_ledger(RelayLedger::open(&path).unwrap());
        assert_eq!(first.scan("source").await.unwrap().relayed, 1);
        let entry = first.ledger().unwrap().get(&EventId {
            chain: ChainRole::Source,
            transaction_hash: deposit.transaction_hash.unwrap(),
            log_index: 0,
        });
        assert_eq!(entry.unwrap().observed_in, 100);

        // window 140..=170 plus one lookback of slack still keeps block 100
        let later = Arc::new(MockEndpoint::new(ChainRole::Source).with_head(170));
        let mut second = warden(later, destination.clone())
            .with_ledger(RelayLedger::open(&path).unwrap());
        second.scan("source").await.unwrap();
        assert_eq!(RelayLedger::open(&path).unwrap().len(), 1);

        let much_later = Arc::new(MockEndpoint::new(ChainRole::Source).with_head(200));
        let mut third = warden(much_later, destination.clone())
            .with_ledger(RelayLedger::open(&path).unwrap());
        third.scan("source").await.unwrap();
        assert!(RelayLedger::open(&path).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_result_rescans_recent_blocks_per_block() {
        // the whole-range answer comes back empty; only the rescan sees the event
        let destination = Arc::new(
            MockEndpoint::new(ChainRole::Destination)
                .with_head(120)
                .lagging_for(1)
                .with_logs(vec![unwrap_log(DESTINATION, TOKEN, RECIPIENT, 9, 119, 0)]),
        );
        let source = Arc::new(MockEndpoint::new(ChainRole::Source).with_head(50));
        let mut warden = warden(source.clone(), destination.clone()).with_scan_policy(
            ChainRole::Destination,
            quiet_policy(
                24,
                3,
                Some(EmptyRetry {
                    lookback_blocks: 3,
                    block_pause: Duration::ZERO,
                }),
            ),
        );

        let summary = warden.scan("destination").await.unwrap();

        assert_eq!(summary.range, Some(BlockRange { from: 96, to: 120 }));
        assert_eq!(summary.events_found, 1);
        assert_eq!(summary.relayed, 1);
        let calls = destination.calls();
        assert!(calls.contains(&MockCall::BlockHash(117)));
        assert!(calls.contains(&MockCall::BlockHash(119)));
        assert!(!calls.contains(&MockCall::BlockHash(116)));
        assert_eq!(source.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_no_rescan_without_empty_retry() {
        let destination = Arc::new(
            MockEndpoint::new(ChainRole::Destination)
                .with_head(120)
                .lagging_for(1)
                .with_logs(vec![unwrap_log(DESTINATION, TOKEN, RECIPIENT, 9, 119, 0)]),
        );
        let source = Arc::new(MockEndpoint::new(ChainRole::Source).with_head(50));
        let mut warden = warden(source.clone(), destination.clone());

        let summary = warden.scan("destination").await.unwrap();

        assert_eq!(summary.events_found, 0);
        assert_eq!(destination.log_query_count(), 1);
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_watch_runs_both_directions_until_shutdown() {
        let source = Arc::new(
            MockEndpoint::new(ChainRole::Source)
                .with_head(120)
                .with_logs(vec![deposit_log(SOURCE, TOKEN, RECIPIENT, 1, 100, 0)]),
        );
        let destination = Arc::new(
            MockEndpoint::new(ChainRole::Destination)
                .with_head(120)
                .with_logs(vec![unwrap_log(DESTINATION, TOKEN, RECIPIENT, 2, 110, 0)]),
        );
        let mut warden = warden(source.clone(), destination.clone());

        let (tx, rx) = mpsc::channel(1);
        tx.send(()).await.unwrap();
        warden.watch(Duration::from_secs(60), rx).await.unwrap();

        assert_eq!(destination.sent().len(), 1);
        assert_eq!(source.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_watch_stops_on_config_error() {
        let registry = ChainRegistry::parse(
            &serde_json::json!({
                "source": { "address": SOURCE.to_string(), "abi": [] }
            })
            .to_string(),
        )
        .unwrap();
        let engine = RelayEngine::new(500_000, ConfirmationPolicy::default());
        let mut warden = Warden::new(
            registry,
            WardenIdentity::from_private_key(ANVIL_KEY).unwrap(),
            Arc::new(MockEndpoint::new(ChainRole::Source).with_head(10)),
            Arc::new(MockEndpoint::new(ChainRole::Destination).with_head(10)),
            engine,
        );

        let (_tx, rx) = mpsc::channel(1);
        let err = warden
            .watch(Duration::from_secs(60), rx)
            .await
            .unwrap_err();
        assert!(err.is_config());
    }
}
