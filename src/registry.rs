//! Contract registry: deployed address plus JSON ABI per chain role.
//!
//! Loaded from a file shaped like
//! `{"source": {"address": "0x…", "abi": [...]}, "destination": {...}}`.

use std::collections::BTreeMap;
use std::path::Path;

use alloy::json_abi::{Function, JsonAbi};
use alloy::primitives::Address;
use serde::Deserialize;
use tracing::debug;

use crate::error::WardenError;
use crate::events::{EventKind, EventSpec};
use crate::types::{ChainRole, RelayFunction};

/// One deployed contract.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractInfo {
    pub address: Address,
    pub abi: JsonAbi,
}

impl ContractInfo {
    /// Resolve the event by its canonical signature.
    pub fn event_spec(&self, kind: EventKind) -> Result<EventSpec, WardenError> {
        let event = self
            .abi
            .events()
            .find(|event| event.signature() == kind.signature())
            .ok_or_else(|| {
                WardenError::Config(format!(
                    "ABI for {} has no event {}",
                    self.address,
                    kind.signature()
                ))
            })?;
        Ok(EventSpec::new(kind, event.clone(), self.address))
    }

    /// Check that the ABI exposes the call we are about to submit.
    pub fn require_function(&self, function: RelayFunction) -> Result<&Function, WardenError> {
        self.abi
            .functions()
            .find(|f| f.signature() == function.signature())
            .ok_or_else(|| {
                WardenError::Config(format!(
                    "ABI for {} has no function {}",
                    self.address,
                    function.signature()
                ))
            })
    }
}

/// Contracts keyed by role name.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    contracts: BTreeMap<String, ContractInfo>,
}

impl ChainRegistry {
    /// Read and parse a registry file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WardenError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| WardenError::RegistryIo {
            path: path.to_path_buf(),
            source,
        })?;
        let contracts: BTreeMap<String, ContractInfo> =
            serde_json::from_str(&raw).map_err(|source| WardenError::RegistryParse {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), roles = contracts.len(), "Loaded contract registry");
        Ok(Self { contracts })
    }

    /// Parse a registry from an in-memory JSON document.
    pub fn parse(json: &str) -> Result<Self, WardenError> {
        let contracts = serde_json::from_str(json).map_err(|source| {
            WardenError::RegistryParse {
                path: "<inline>".into(),
                source,
            }
        })?;
        Ok(Self { contracts })
    }

    pub fn contract(&self, role: ChainRole) -> Result<&ContractInfo, WardenError> {
        self.contracts
            .get(role.as_str())
            .ok_or(WardenError::MissingContract(role))
    }
}
