//! Bridge contract ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe bindings for the two calls the
//! warden submits. Events are decoded dynamically from the registry ABI (see
//! `events.rs`) so that indexed and non-indexed layouts both work; the event
//! declarations here fix the canonical signatures.

use alloy::sol;

sol! {
    /// Contract on the source chain: locks deposits, releases withdrawals
    contract SourceBridge {
        /// Release locked tokens to `recipient`
        /// Called by the warden after observing an Unwrap on the destination chain
        function withdraw(address underlying_token, address recipient, uint256 amount) external;

        event Deposit(address token, address recipient, uint256 amount);
    }
}

sol! {
    /// Contract on the destination chain: mints and burns wrapped tokens
    contract DestinationBridge {
        /// Mint wrapped tokens for `recipient`
        /// Called by the warden after observing a Deposit on the source chain
        function wrap(address token, address recipient, uint256 amount) external;

        event Unwrap(address underlying_token, address recipient, uint256 amount);
    }
}
