//! Bridge warden - library interface
//!
//! Watches a source and a destination EVM chain and relays bridge events
//! across them: `Deposit` on source becomes `wrap` on destination, `Unwrap` on
//! destination becomes `withdraw` on source.
//!
//! The binary drives [`orchestrator::Warden`]; the modules are public for
//! integration tests.

pub mod config;
pub mod confirmation;
pub mod contracts;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod identity;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod redact;
pub mod registry;
pub mod relay;
pub mod retry;
pub mod rpc_fallback;
pub mod scanner;
pub mod strategy;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::WardenError;
pub use orchestrator::{PassSummary, Warden};
pub use types::ChainRole;
