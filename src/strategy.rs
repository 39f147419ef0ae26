//! Degradation ladder for log queries.
//!
//! A unit of work (a block range) is attempted at the most efficient tier.
//! When the provider rejects it, the unit is split into the next tier's units,
//! which are queued ahead of the remaining work so that units are still
//! processed in ascending block order. A unit that fails at the last tier is
//! skipped and reported.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ScanPolicy;
use crate::error::ProviderError;
use crate::types::BlockRange;

/// One rung of the ladder, most efficient first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanTier {
    /// A single query over the whole unit
    WholeRange,
    /// Fixed-size sub-ranges
    Chunked { size: u64 },
    /// One block at a time, addressed by block hash
    PerBlock { pause: Duration },
}

impl ScanTier {
    pub fn label(&self) -> &'static str {
        match self {
            ScanTier::WholeRange => "range",
            ScanTier::Chunked { .. } => "chunk",
            ScanTier::PerBlock { .. } => "block",
        }
    }

    /// Split `range` into this tier's units, ascending.
    pub fn split(&self, range: BlockRange) -> Vec<BlockRange> {
        match *self {
            ScanTier::WholeRange => vec![range],
            ScanTier::Chunked { size } => {
                let size = size.max(1);
                let mut units = Vec::new();
                let mut from = range.from;
                loop {
                    let to = from.saturating_add(size - 1).min(range.to);
                    units.push(BlockRange { from, to });
                    if to >= range.to {
                        break;
                    }
                    from = to + 1;
                }
                units
            }
            ScanTier::PerBlock { .. } => (range.from..=range.to).map(BlockRange::single).collect(),
        }
    }
}

impl fmt::Display for ScanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanTier::WholeRange => f.write_str("range"),
            ScanTier::Chunked { size } => write!(f, "chunk({})", size),
            ScanTier::PerBlock { pause } => write!(f, "block({:?})", pause),
        }
    }
}

/// A unit that failed at the deepest tier.
#[derive(Debug, Clone)]
pub struct SkippedUnit {
    pub range: BlockRange,
    pub tier: ScanTier,
    pub error: ProviderError,
}

/// What a ladder walk produced.
#[derive(Debug)]
pub struct LadderReport<T> {
    pub items: Vec<T>,
    pub skipped: Vec<SkippedUnit>,
    pub attempts: u32,
}

/// Ordered tiers plus the rate-limit backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegradationLadder {
    tiers: Vec<ScanTier>,
    rate_limit_backoff: Duration,
}

impl DegradationLadder {
    /// An empty tier list degenerates to per-block scanning without pauses.
    pub fn new(tiers: Vec<ScanTier>, rate_limit_backoff: Duration) -> Self {
        let tiers = if tiers.is_empty() {
            vec![ScanTier::PerBlock {
                pause: Duration::ZERO,
            }]
        } else {
            tiers
        };
        Self {
            tiers,
            rate_limit_backoff,
        }
    }

    /// Range (optional), chunk (optional), then per-block.
    pub fn from_policy(policy: &ScanPolicy) -> Self {
        let mut tiers = Vec::with_capacity(3);
        if policy.range_query {
            tiers.push(ScanTier::WholeRange);
        }
        if policy.chunk_size > 0 {
            tiers.push(ScanTier::Chunked {
                size: policy.chunk_size,
            });
        }
        tiers.push(ScanTier::PerBlock {
            pause: policy.block_pause,
        });
        Self::new(tiers, policy.rate_limit_backoff)
    }

    /// Per-block only, as used by the empty-result rescan.
    pub fn per_block(pause: Duration, rate_limit_backoff: Duration) -> Self {
        Self::new(vec![ScanTier::PerBlock { pause }], rate_limit_backoff)
    }

    pub fn tiers(&self) -> &[ScanTier] {
        &self.tiers
    }

    /// Walk `root` down the ladder, calling `attempt` for every unit.
    pub async fn run<T, F, Fut>(&self, root: BlockRange, mut attempt: F) -> LadderReport<T>
    where
        F: FnMut(ScanTier, BlockRange) -> Fut,
        Fut: Future<Output = Result<Vec<T>, ProviderError>>,
    {
        let mut queue: VecDeque<(usize, BlockRange)> = self.tiers[0]
            .split(root)
            .into_iter()
            .map(|unit| (0, unit))
            .collect();
        let mut report = LadderReport {
            items: Vec::new(),
            skipped: Vec::new(),
            attempts: 0,
        };

        while let Some((level, unit)) = queue.pop_front() {
            let tier = self.tiers[level];
            if let ScanTier::PerBlock { pause } = tier {
                if report.attempts > 0 && !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
            }

            report.attempts += 1;
            let error = match attempt(tier, unit).await {
                Ok(mut items) => {
                    report.items.append(&mut items);
                    continue;
                }
                Err(error) => error,
            };

            if error.is_rate_limited() && !self.rate_limit_backoff.is_zero() {
                debug!(
                    backoff = ?self.rate_limit_backoff,
                    range = %unit,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(self.rate_limit_backoff).await;
            }

            match self.tiers.get(level + 1) {
                Some(next) => {
                    let parts = next.split(unit);
                    debug!(
                        range = %unit,
                        from_tier = %tier,
                        to_tier = %next,
                        parts = parts.len(),
                        error = %error,
                        "Degrading query"
                    );
                    for part in parts.into_iter().rev() {
                        queue.push_front((level + 1, part));
                    }
                }
                None => {
                    warn!(range = %unit, tier = %tier, error = %error, "Skipping unit");
                    report.skipped.push(SkippedUnit {
                        range: unit,
                        tier,
                        error,
                    });
                }
            }
        }

        report
    }
}
