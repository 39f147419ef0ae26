//! Relay ledger
//!
//! A small JSON file of source events that already have a confirmed relay
//! transaction. Later passes skip those events, so an overlapping lookback
//! window does not submit the same wrap/withdraw twice. The contracts are
//! still expected to reject replays on their own.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use alloy::primitives::TxHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::WardenError;
use crate::relay::Confirmation;
use crate::types::{ChainRole, EventId};

const LEDGER_VERSION: u32 = 1;

/// A confirmed relay of one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub event: EventId,
    /// Block of the event on the watched chain. Older files lack it and
    /// load as 0, so their entries go on the next prune.
    #[serde(default)]
    pub observed_in: u64,
    pub relay_tx: TxHash,
    pub confirmed_in: u64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    entries: Vec<LedgerEntry>,
}

#[derive(Debug)]
pub struct RelayLedger {
    path: PathBuf,
    entries: BTreeMap<EventId, LedgerEntry>,
    dirty: bool,
}

impl RelayLedger {
    /// Open the ledger at `path`. A missing file is an empty ledger.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WardenError> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let file: LedgerFile =
                    serde_json::from_str(&raw).map_err(|e| ledger_error(&path, e))?;
                if file.version != LEDGER_VERSION {
                    return Err(ledger_error(
                        &path,
                        format!("unsupported version {}", file.version),
                    ));
                }
                file.entries.into_iter().map(|e| (e.event, e)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No relay ledger yet, starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(ledger_error(&path, e)),
        };

        info!(path = %path.display(), entries = entries.len(), "Relay ledger loaded");
        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, event: &EventId) -> bool {
        self.entries.contains_key(event)
    }

    pub fn get(&self, event: &EventId) -> Option<&LedgerEntry> {
        self.entries.get(event)
    }

    /// Record a confirmed relay. The first confirmation of an event wins.
    pub fn record(
        &mut self,
        event: EventId,
        observed_in: u64,
        confirmation: &Confirmation,
    ) -> bool {
        if self.entries.contains_key(&event) {
            return false;
        }
        self.entries.insert(
            event,
            LedgerEntry {
                event,
                observed_in,
                relay_tx: confirmation.tx_hash,
                confirmed_in: confirmation.block_number,
                recorded_at: Utc::now(),
            },
        );
        self.dirty = true;
        true
    }

    /// Forget events of `chain` observed before `below_block`. Returns how
    /// many entries were dropped.
    pub fn prune(&mut self, chain: ChainRole, below_block: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|id, entry| id.chain != chain || entry.observed_in >= below_block);
        let pruned = before - self.entries.len();
        if pruned > 0 {
            self.dirty = true;
            debug!(chain = %chain, below_block, pruned, "Pruned relay ledger");
        }
        pruned
    }

    /// Write the ledger if it changed. The file is replaced atomically.
    pub fn save(&mut self) -> Result<(), WardenError> {
        if !self.dirty {
            return Ok(());
        }
        let file = LedgerFile {
            version: LEDGER_VERSION,
            entries: self.entries.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(|e| ledger_error(&self.path, e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ledger_error(&self.path, e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| ledger_error(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| ledger_error(&self.path, e))?;

        self.dirty = false;
        debug!(path = %self.path.display(), entries = self.entries.len(), "Relay ledger saved");
        Ok(())
    }
}

fn ledger_error(path: &Path, error: impl std::fmt::Display) -> WardenError {
    WardenError::Ledger {
        path: path.to_path_buf(),
        message: error.to_string(),
    }
}
