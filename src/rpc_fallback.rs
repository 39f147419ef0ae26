//! Ordered RPC URL lists.
//!
//! Each role may name several RPC URLs; the first is primary and the rest are
//! tried in order when a call fails.

use alloy::providers::{ProviderBuilder, RootProvider};
use alloy::transports::http::{Client, Http};

use crate::error::WardenError;
use crate::redact::redact_url;

/// One RPC URL with its alloy provider.
#[derive(Clone)]
pub struct RpcTarget {
    pub url: String,
    pub provider: RootProvider<Http<Client>>,
}

impl RpcTarget {
    /// The URL with path, query and credentials stripped, for logging.
    pub fn log_safe_url(&self) -> String {
        redact_url(&self.url)
    }
}

impl std::fmt::Debug for RpcTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcTarget")
            .field("url", &self.log_safe_url())
            .finish()
    }
}

/// Parse a comma-separated RPC URL string into individual trimmed URLs.
pub fn parse_rpc_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Create an alloy HTTP provider for each RPC URL, keeping the order.
pub fn create_targets(urls: &[String]) -> Result<Vec<RpcTarget>, WardenError> {
    if urls.is_empty() {
        return Err(WardenError::Config(
            "at least one RPC URL is required".to_string(),
        ));
    }
    urls.iter()
        .map(|url| {
            let parsed = url.parse().map_err(|e| {
                WardenError::Config(format!("invalid RPC URL {}: {}", redact_url(url), e))
            })?;
            Ok(RpcTarget {
                url: url.clone(),
                provider: ProviderBuilder::new().on_http(parsed),
            })
        })
        .collect()
}
