//! Bridge event kinds and log decoding.
//!
//! Field layout (which parameters are indexed) comes from the registry ABI, so
//! a contract may index any of the three parameters. Fields are read by
//! position: token, recipient, amount.

use alloy::dyn_abi::{DynSolValue, EventExt};
use alloy::json_abi::Event;
use alloy::primitives::{Address, B256, U256};

use crate::error::DecodeError;
use crate::types::{ChainRole, DecodedEvent, EventId, ObservedEvent, RawLog, RelayFunction};

/// The two events the warden relays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Deposit,
    Unwrap,
}

impl EventKind {
    pub fn signature(self) -> &'static str {
        match self {
            EventKind::Deposit => "Deposit(address,address,uint256)",
            EventKind::Unwrap => "Unwrap(address,address,uint256)",
        }
    }

    /// Event watched on a chain of the given role.
    pub fn watched_on(role: ChainRole) -> EventKind {
        match role {
            ChainRole::Source => EventKind::Deposit,
            ChainRole::Destination => EventKind::Unwrap,
        }
    }

    /// The chain the event is emitted on.
    pub fn chain(self) -> ChainRole {
        match self {
            EventKind::Deposit => ChainRole::Source,
            EventKind::Unwrap => ChainRole::Destination,
        }
    }

    /// Call submitted on the counterpart chain in response.
    pub fn relay_function(self) -> RelayFunction {
        match self {
            EventKind::Deposit => RelayFunction::Wrap,
            EventKind::Unwrap => RelayFunction::Withdraw,
        }
    }
}

/// A resolved event: ABI item, selector and the emitting contract.
#[derive(Debug, Clone)]
pub struct EventSpec {
    pub kind: EventKind,
    pub abi: Event,
    pub selector: B256,
    pub contract: Address,
}

impl EventSpec {
    pub fn new(kind: EventKind, abi: Event, contract: Address) -> Self {
        let selector = abi.selector();
        Self {
            kind,
            abi,
            selector,
            contract,
        }
    }

    /// Decode a raw log. Anything that is not exactly this event from this
    /// contract, with full block metadata, is rejected.
    pub fn decode(&self, log: &RawLog) -> Result<ObservedEvent, DecodeError> {
        if log.address != self.contract {
            return Err(DecodeError::ForeignAddress(log.address));
        }
        if log.topics.first() != Some(&self.selector) {
            return Err(DecodeError::TopicMismatch);
        }
        let block_number = log
            .block_number
            .ok_or(DecodeError::MissingMetadata("block number"))?;
        let log_index = log
            .log_index
            .ok_or(DecodeError::MissingMetadata("log index"))?;
        let transaction_hash = log
            .transaction_hash
            .ok_or(DecodeError::MissingMetadata("transaction hash"))?;

        let decoded = self
            .abi
            .decode_log_parts(log.topics.iter().copied(), &log.data, true)
            .map_err(|e| DecodeError::Abi(e.to_string()))?;

        // Restore declaration order from the indexed/body split
        let mut indexed = decoded.indexed.into_iter();
        let mut body = decoded.body.into_iter();
        let mut fields = Vec::with_capacity(self.abi.inputs.len());
        for input in &self.abi.inputs {
            let next = if input.indexed {
                indexed.next()
            } else {
                body.next()
            };
            fields.push(next.ok_or(DecodeError::Abi("missing field".to_string()))?);
        }

        let first = address_at(&fields, 0)?;
        let recipient = address_at(&fields, 1)?;
        let amount = uint_at(&fields, 2)?;
        let event = match self.kind {
            EventKind::Deposit => DecodedEvent::Deposit {
                token: first,
                recipient,
                amount,
            },
            EventKind::Unwrap => DecodedEvent::Unwrap {
                underlying_token: first,
                recipient,
                amount,
            },
        };

        Ok(ObservedEvent {
            event,
            id: EventId {
                chain: self.kind.chain(),
                transaction_hash,
                log_index,
            },
            block_number,
            log_index,
        })
    }
}

fn address_at(fields: &[DynSolValue], index: usize) -> Result<Address, DecodeError> {
    fields
        .get(index)
        .and_then(DynSolValue::as_address)
        .ok_or(DecodeError::FieldType { index })
}

fn uint_at(fields: &[DynSolValue], index: usize) -> Result<U256, DecodeError> {
    fields
        .get(index)
        .and_then(DynSolValue::as_uint)
        .map(|(value, _bits)| value)
        .ok_or(DecodeError::FieldType { index })
}
