//! Redaction for secrets and credential-bearing values in logs.
//!
//! [`Redacted`] hides a value completely. [`redact_url`] keeps the host of an
//! RPC endpoint but strips the path and query, where providers usually embed
//! API keys.

use std::fmt::{self, Debug, Display};

/// Wrapper that never prints its inner value.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Redacted<T>(pub T);

impl<T> Redacted<T> {
    /// Access the wrapped secret.
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T> Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<T> Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Reduce an RPC URL to `scheme://host[:port]` for logging.
///
/// `https://bsc-testnet.example.com/v1/SECRET` becomes
/// `https://bsc-testnet.example.com/…`. Anything that does not look like a URL
/// is fully redacted.
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return "<redacted>".to_string();
    };
    // userinfo may carry basic-auth credentials
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or_default();
    if host.is_empty() {
        return "<redacted>".to_string();
    }
    if authority.len() < rest.len() || authority.contains('@') {
        format!("{}://{}/…", scheme, host)
    } else {
        format!("{}://{}", scheme, host)
    }
}
