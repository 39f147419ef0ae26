//! Warden signing identity.
//!
//! The key is parsed once and injected wherever transactions are signed.
//! Transactions are legacy (gas price) with an EIP-155 chain id.

use std::fmt;

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, TxHash};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;

use crate::error::{SubmissionError, WardenError};

/// A contract call ready to be signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedCall {
    pub to: Address,
    pub input: Bytes,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub chain_id: u64,
}

/// Signed, EIP-2718 encoded transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub nonce: u64,
    pub to: Address,
    pub input: Bytes,
    pub raw: Bytes,
    pub hash: TxHash,
}

/// The warden's account.
#[derive(Clone)]
pub struct WardenIdentity {
    signer: PrivateKeySigner,
    wallet: EthereumWallet,
}

impl WardenIdentity {
    pub fn from_private_key(key: &str) -> Result<Self, WardenError> {
        let signer: PrivateKeySigner = key
            .trim()
            .parse()
            .map_err(|_| WardenError::Config("invalid warden private key".to_string()))?;
        let wallet = EthereumWallet::from(signer.clone());
        Ok(Self { signer, wallet })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub async fn sign(&self, call: &UnsignedCall) -> Result<SignedTransaction, SubmissionError> {
        let request = TransactionRequest::default()
            .with_from(self.address())
            .with_to(call.to)
            .with_input(call.input.clone())
            .with_nonce(call.nonce)
            .with_gas_limit(call.gas_limit)
            .with_gas_price(call.gas_price)
            .with_chain_id(call.chain_id);

        let envelope = request
            .build(&self.wallet)
            .await
            .map_err(|e| SubmissionError::Signing(e.to_string()))?;

        Ok(SignedTransaction {
            nonce: call.nonce,
            to: call.to,
            input: call.input.clone(),
            raw: Bytes::from(envelope.encoded_2718()),
            hash: *envelope.tx_hash(),
        })
    }
}

impl fmt::Debug for WardenIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WardenIdentity")
            .field("address", &self.address())
            .field("signer", &"<redacted>")
            .finish()
    }
}
