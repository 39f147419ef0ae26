use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::redact::{redact_url, Redacted};
use crate::rpc_fallback::parse_rpc_urls;
use crate::types::ChainRole;

/// Main configuration for the warden
#[derive(Debug, Clone)]
pub struct Config {
    pub source: ChainConfig,
    pub destination: ChainConfig,
    pub warden: WardenConfig,
}

/// Connection and scanning settings for one chain
#[derive(Clone)]
pub struct ChainConfig {
    pub role: ChainRole,
    pub rpc_url: String,
    /// Additional RPC URLs for fallback (tried in order when primary fails)
    pub rpc_fallback_urls: Vec<String>,
    /// Skips the eth_chainId read when set
    pub chain_id: Option<u64>,
    pub scan: ScanPolicy,
}

/// RPC URLs often embed API keys; only hosts are printed.
impl fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fallbacks: Vec<String> = self.rpc_fallback_urls.iter().map(|u| redact_url(u)).collect();
        f.debug_struct("ChainConfig")
            .field("role", &self.role)
            .field("rpc_url", &redact_url(&self.rpc_url))
            .field("rpc_fallback_urls", &fallbacks)
            .field("chain_id", &self.chain_id)
            .field("scan", &self.scan)
            .finish()
    }
}

impl ChainConfig {
    /// All RPC URLs: primary followed by fallbacks.
    pub fn all_rpc_urls(&self) -> Vec<String> {
        let mut urls = vec![self.rpc_url.clone()];
        urls.extend(self.rpc_fallback_urls.iter().cloned());
        urls
    }
}

/// How a chain is scanned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPolicy {
    pub lookback_blocks: u64,
    /// Try one eth_getLogs over the whole window first
    pub range_query: bool,
    /// Chunk size for the second tier, 0 skips the tier
    pub chunk_size: u64,
    /// Pause between single-block queries
    pub block_pause: Duration,
    /// Extra pause after a rate-limited response
    pub rate_limit_backoff: Duration,
    /// One per-block rescan when a pass finds nothing
    pub empty_retry: Option<EmptyRetry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmptyRetry {
    pub lookback_blocks: u64,
    pub block_pause: Duration,
}

impl ScanPolicy {
    /// Defaults for a role: the source chain tolerates range queries, the
    /// destination chain is read one block hash at a time and retried when
    /// empty.
    pub fn default_for(role: ChainRole) -> Self {
        match role {
            ChainRole::Source => Self {
                lookback_blocks: 30,
                range_query: true,
                chunk_size: 10,
                block_pause: Duration::from_millis(100),
                rate_limit_backoff: Duration::from_millis(1000),
                empty_retry: None,
            },
            ChainRole::Destination => Self {
                lookback_blocks: 24,
                range_query: false,
                chunk_size: 0,
                block_pause: Duration::from_millis(250),
                rate_limit_backoff: Duration::from_millis(1000),
                empty_retry: Some(EmptyRetry {
                    lookback_blocks: 3,
                    block_pause: Duration::from_millis(300),
                }),
            },
        }
    }
}

/// Identity, submission and deadline settings
#[derive(Debug, Clone)]
pub struct WardenConfig {
    pub private_key: Redacted<String>,
    pub contract_info_path: PathBuf,
    /// Relay ledger; `None` disables cross-pass de-duplication
    pub ledger_path: Option<PathBuf>,
    pub gas_limit: u64,
    pub receipt_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub rpc_timeout: Duration,
}

/// Default functions
fn default_contract_info_path() -> PathBuf {
    PathBuf::from("contract_info.json")
}

fn default_gas_limit() -> u64 {
    500_000
}

fn default_receipt_timeout_secs() -> u64 {
    120
}

fn default_receipt_poll_interval_ms() -> u64 {
    1000
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build the configuration from any variable lookup
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let source = chain_from_vars(&var, ChainRole::Source)?;
        let destination = chain_from_vars(&var, ChainRole::Destination)?;

        let warden = WardenConfig {
            private_key: Redacted(
                var("WARDEN_PRIVATE_KEY")
                    .ok_or_else(|| eyre!("WARDEN_PRIVATE_KEY environment variable is required"))?,
            ),
            contract_info_path: var("CONTRACT_INFO_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(default_contract_info_path),
            ledger_path: var("WARDEN_LEDGER_PATH")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            gas_limit: parse_or(&var, "GAS_LIMIT", default_gas_limit())?,
            receipt_timeout: Duration::from_secs(parse_or(
                &var,
                "RECEIPT_TIMEOUT_SECS",
                default_receipt_timeout_secs(),
            )?),
            receipt_poll_interval: Duration::from_millis(parse_or(
                &var,
                "RECEIPT_POLL_INTERVAL_MS",
                default_receipt_poll_interval_ms(),
            )?),
            rpc_timeout: Duration::from_secs(parse_or(
                &var,
                "RPC_TIMEOUT_SECS",
                default_rpc_timeout_secs(),
            )?),
        };

        let config = Config {
            source,
            destination,
            warden,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn chain(&self, role: ChainRole) -> &ChainConfig {
        match role {
            ChainRole::Source => &self.source,
            ChainRole::Destination => &self.destination,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for chain in [&self.source, &self.destination] {
            if chain.rpc_url.is_empty() {
                return Err(eyre!("{}.rpc_url cannot be empty", chain.role));
            }
            if chain.scan.lookback_blocks == 0 {
                return Err(eyre!("{}.lookback_blocks must be at least 1", chain.role));
            }
            if let Some(retry) = chain.scan.empty_retry {
                if retry.lookback_blocks == 0 {
                    return Err(eyre!(
                        "{}.empty_retry_lookback must be at least 1",
                        chain.role
                    ));
                }
            }
        }

        let key = self.warden.private_key.expose();
        if key.len() != 66
            || !key.starts_with("0x")
            || !key[2..].chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(eyre!(
                "warden.private_key must be 66 chars (0x + 64 hex chars)"
            ));
        }

        if self.warden.gas_limit == 0 {
            return Err(eyre!("warden.gas_limit must be positive"));
        }

        if self.warden.receipt_poll_interval.is_zero() {
            return Err(eyre!("warden.receipt_poll_interval must be positive"));
        }

        if self.warden.receipt_timeout < self.warden.receipt_poll_interval {
            return Err(eyre!(
                "warden.receipt_timeout must not be shorter than the poll interval"
            ));
        }

        if self.warden.rpc_timeout.is_zero() {
            return Err(eyre!("warden.rpc_timeout must be positive"));
        }

        Ok(())
    }
}

fn env_prefix(role: ChainRole) -> &'static str {
    match role {
        ChainRole::Source => "SOURCE",
        ChainRole::Destination => "DESTINATION",
    }
}

fn chain_from_vars(var: &impl Fn(&str) -> Option<String>, role: ChainRole) -> Result<ChainConfig> {
    let prefix = env_prefix(role);
    let key = |name: &str| format!("{}_{}", prefix, name);

    let rpc_raw = var(&key("RPC_URL"))
        .ok_or_else(|| eyre!("{} environment variable is required", key("RPC_URL")))?;
    let urls = parse_rpc_urls(&rpc_raw);
    if urls.is_empty() {
        return Err(eyre!("{} cannot be empty", key("RPC_URL")));
    }

    let defaults = ScanPolicy::default_for(role);
    let empty_retry = match var(&key("EMPTY_RETRY_LOOKBACK")) {
        Some(raw) => {
            let lookback_blocks: u64 = raw
                .trim()
                .parse()
                .wrap_err_with(|| format!("{} must be a valid u64", key("EMPTY_RETRY_LOOKBACK")))?;
            // 0 turns the retry off
            (lookback_blocks > 0).then(|| EmptyRetry {
                lookback_blocks,
                block_pause: Duration::from_millis(300),
            })
        }
        None => defaults.empty_retry,
    }
    .map(|retry| -> Result<EmptyRetry> {
        Ok(EmptyRetry {
            block_pause: Duration::from_millis(parse_or(
                var,
                &key("EMPTY_RETRY_PAUSE_MS"),
                retry.block_pause.as_millis() as u64,
            )?),
            ..retry
        })
    })
    .transpose()?;

    let scan = ScanPolicy {
        lookback_blocks: parse_or(var, &key("LOOKBACK_BLOCKS"), defaults.lookback_blocks)?,
        range_query: parse_or(var, &key("RANGE_QUERY"), defaults.range_query)?,
        chunk_size: parse_or(var, &key("CHUNK_SIZE"), defaults.chunk_size)?,
        block_pause: Duration::from_millis(parse_or(
            var,
            &key("BLOCK_PAUSE_MS"),
            defaults.block_pause.as_millis() as u64,
        )?),
        rate_limit_backoff: Duration::from_millis(parse_or(
            var,
            &key("RATE_LIMIT_BACKOFF_MS"),
            defaults.rate_limit_backoff.as_millis() as u64,
        )?),
        empty_retry,
    };

    Ok(ChainConfig {
        role,
        rpc_url: urls[0].clone(),
        rpc_fallback_urls: urls[1..].to_vec(),
        chain_id: var(&key("CHAIN_ID"))
            .map(|v| {
                v.trim()
                    .parse()
                    .wrap_err_with(|| format!("{} must be a valid u64", key("CHAIN_ID")))
            })
            .transpose()?,
        scan,
    })
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .wrap_err_with(|| format!("{} has an invalid value {:?}", name, raw)),
        None => Ok(default),
    }
}
