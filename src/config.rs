//! Runtime configuration from environment variables.
//!
//! `.env` is loaded through `dotenvy` when present.
//!
//! ## Environment Variables
//!
//! Required (one of):
//! - `RPC_URL`: Full JSON-RPC endpoint
//! - `ALCHEMY_API_KEY`: Used to build an Alchemy mainnet URL when `RPC_URL` is unset
//!
//! Optional (with defaults):
//! - `VAULT_ADDRESS`: Pool vault (default: Balancer V3 vault)
//! - `STABLE_POOLS`: Comma-separated stable pool addresses (default: none)
//! - `SAVINGS_RATE_SOURCE`: Savings rate contract, empty to disable (default: Pot)
//! - `SAVINGS_ASSET`: Underlying asset (default: DAI)
//! - `SAVINGS_SHARE`: Share token (default: sDAI)
//! - `SAVINGS_RATE_SYMBOL`: `dsr` or `ssr` (default: `dsr`)
//! - `POLL_INTERVAL_SECS`: Watch loop polling interval (default: 12)
//! - `BATCH_SIZE`: Maximum blocks per log query (default: 500)
//! - `MAX_HISTORY`: Snapshots retained per entity (default: 128)
//! - `RESYNC_INTERVAL_BLOCKS`: Periodic regeneration interval, 0 to disable (default: 0)
//!
//! ## Example
//!
//! ```no_run
//! use dex_state_sync::config::Config;
//! use dex_state_sync::error::SyncResult;
//!
//! # fn main() -> SyncResult<()> {
//! let config = Config::from_env()?;
//! println!("Tracking {} entities", config.tracked_entities().len());
//! # Ok(())
//! # }
//! ```

use std::env;
use std::str::FromStr;

use alloy::primitives::{address, Address};

use crate::error::{SyncError, SyncResult};
use crate::events::LogDecoder;
use crate::regen::{SavingsSource, TrackedEntity};
use crate::snapshot::RateSymbol;

/// Balancer V3 vault on mainnet.
pub const DEFAULT_VAULT: Address = address!("bA1333333333a1BA1108E8412f11850A5C319bA9");
/// Maker Pot (DSR) on mainnet.
pub const DEFAULT_SAVINGS_RATE_SOURCE: Address = address!("197E90f9FAD81970bA7976f33CbD77088E5D7cf7");
/// DAI on mainnet.
pub const DEFAULT_SAVINGS_ASSET: Address = address!("6B175474E89094C44Da98b954EedeAC495271d0F");
/// sDAI on mainnet.
pub const DEFAULT_SAVINGS_SHARE: Address = address!("83F20F44975D03b1b09e64809B757c47f942BEeA");

const PLACEHOLDER_API_KEY: &str = "your_alchemy_api_key_here";

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON-RPC endpoint
    rpc_url: String,

    /// Vault the stable pools are registered in
    vault: Address,

    /// Stable pools to track
    stable_pools: Vec<Address>,

    /// Savings vault to track
    savings: Option<SavingsSource>,

    /// Polling interval in seconds
    poll_interval_secs: u64,

    /// Maximum blocks per log query
    batch_size: u64,

    /// Snapshots retained per entity
    max_history: usize,

    /// Blocks between periodic regenerations, 0 when disabled
    resync_interval_blocks: u64,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a config error if no RPC endpoint is configured or a value
    /// fails to parse.
    pub fn from_env() -> SyncResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SyncResult<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string());

        let rpc_url = match get("RPC_URL").filter(|v| !v.is_empty()) {
            Some(url) => url,
            None => {
                let key = get("ALCHEMY_API_KEY").ok_or_else(|| {
                    SyncError::config("RPC_URL or ALCHEMY_API_KEY environment variable is required", None)
                })?;
                if key.is_empty() || key == PLACEHOLDER_API_KEY {
                    return Err(SyncError::config(
                        "ALCHEMY_API_KEY must be set to a valid Alchemy API key",
                        None,
                    ));
                }
                format!("https://eth-mainnet.g.alchemy.com/v2/{key}")
            }
        };

        let vault = parse_or(get("VAULT_ADDRESS"), "VAULT_ADDRESS", DEFAULT_VAULT)?;

        let stable_pools = get("STABLE_POOLS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| parse_address(s, "STABLE_POOLS"))
            .collect::<SyncResult<Vec<_>>>()?;

        let savings = match get("SAVINGS_RATE_SOURCE") {
            Some(source) if source.is_empty() => None,
            source => Some(SavingsSource {
                rate_source: parse_or(source, "SAVINGS_RATE_SOURCE", DEFAULT_SAVINGS_RATE_SOURCE)?,
                asset: parse_or(get("SAVINGS_ASSET"), "SAVINGS_ASSET", DEFAULT_SAVINGS_ASSET)?,
                share: parse_or(get("SAVINGS_SHARE"), "SAVINGS_SHARE", DEFAULT_SAVINGS_SHARE)?,
                rate_symbol: parse_or(get("SAVINGS_RATE_SYMBOL"), "SAVINGS_RATE_SYMBOL", RateSymbol::Dsr)?,
            }),
        };

        let poll_interval_secs = parse_or(get("POLL_INTERVAL_SECS"), "POLL_INTERVAL_SECS", 12)?;
        let batch_size = parse_or(get("BATCH_SIZE"), "BATCH_SIZE", 500)?;
        let max_history = parse_or(get("MAX_HISTORY"), "MAX_HISTORY", 128)?;
        let resync_interval_blocks =
            parse_or(get("RESYNC_INTERVAL_BLOCKS"), "RESYNC_INTERVAL_BLOCKS", 0)?;

        if batch_size == 0 {
            return Err(SyncError::config("BATCH_SIZE must be greater than zero", None));
        }
        if max_history == 0 {
            return Err(SyncError::config("MAX_HISTORY must be greater than zero", None));
        }

        Ok(Self {
            rpc_url,
            vault,
            stable_pools,
            savings,
            poll_interval_secs,
            batch_size,
            max_history,
            resync_interval_blocks,
        })
    }

    /// JSON-RPC endpoint.
    #[must_use]
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Vault the stable pools are registered in.
    #[must_use]
    pub const fn vault(&self) -> Address {
        self.vault
    }

    /// Configured stable pools.
    #[must_use]
    pub fn stable_pools(&self) -> &[Address] {
        &self.stable_pools
    }

    /// Configured savings vault, if any.
    #[must_use]
    pub const fn savings(&self) -> Option<&SavingsSource> {
        self.savings.as_ref()
    }

    /// Polling interval in seconds.
    #[must_use]
    pub const fn poll_interval_secs(&self) -> u64 {
        self.poll_interval_secs
    }

    /// Maximum blocks per log query.
    #[must_use]
    pub const fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// Snapshots retained per entity.
    #[must_use]
    pub const fn max_history(&self) -> usize {
        self.max_history
    }

    /// Blocks between periodic regenerations, `None` when disabled.
    #[must_use]
    pub const fn resync_interval_blocks(&self) -> Option<u64> {
        if self.resync_interval_blocks == 0 {
            None
        } else {
            Some(self.resync_interval_blocks)
        }
    }

    /// Every configured entity, savings vault first.
    #[must_use]
    pub fn tracked_entities(&self) -> Vec<TrackedEntity> {
        self.savings
            .iter()
            .copied()
            .map(TrackedEntity::Savings)
            .chain(self.stable_pools.iter().copied().map(TrackedEntity::StablePool))
            .collect()
    }

    /// Addresses whose logs the feed must fetch.
    #[must_use]
    pub fn log_addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.savings.iter().map(|s| s.rate_source).collect();
        if !self.stable_pools.is_empty() {
            addresses.push(self.vault);
            addresses.extend(self.stable_pools.iter().copied());
        }
        addresses
    }

    /// Decoder routing the configured entities' logs.
    #[must_use]
    pub fn decoder(&self) -> LogDecoder {
        let vault = (!self.stable_pools.is_empty()).then_some(self.vault);
        LogDecoder::new(vault, self.savings.iter().map(|s| (s.rate_source, s.rate_symbol)))
    }
}

fn parse_address(value: &str, name: &str) -> SyncResult<Address> {
    value.parse::<Address>().map_err(|e| {
        SyncError::config(
            format!("{name} must contain valid Ethereum addresses (0x + 40 hex chars), got: {value}"),
            Some(Box::new(e)),
        )
    })
}

fn parse_or<T>(value: Option<String>, name: &str, default: T) -> SyncResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => v
            .parse::<T>()
            .map_err(|e| SyncError::config(format!("{name} is invalid ({v}): {e}"), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> SyncResult<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_config_requires_rpc_endpoint() {
        assert!(load(&[]).is_err());
    }

    #[test]
    fn test_config_validation_placeholder_api_key() {
        assert!(load(&[("ALCHEMY_API_KEY", PLACEHOLDER_API_KEY)]).is_err());
        assert!(load(&[("ALCHEMY_API_KEY", "")]).is_err());
    }

    #[test]
    fn test_config_rpc_url_construction() {
        let config = load(&[("ALCHEMY_API_KEY", "test_api_key")]).unwrap();
        assert_eq!(config.rpc_url(), "https://eth-mainnet.g.alchemy.com/v2/test_api_key");

        let config = load(&[("RPC_URL", "http://localhost:8545"), ("ALCHEMY_API_KEY", "k")]).unwrap();
        assert_eq!(config.rpc_url(), "http://localhost:8545");
    }

    #[test]
    fn test_config_defaults() {
        let config = load(&[("RPC_URL", "http://localhost:8545")]).unwrap();
        assert_eq!(config.vault(), DEFAULT_VAULT);
        assert!(config.stable_pools().is_empty());
        assert_eq!(config.savings().unwrap().rate_source, DEFAULT_SAVINGS_RATE_SOURCE);
        assert_eq!(config.savings().unwrap().rate_symbol, RateSymbol::Dsr);
        assert_eq!(config.poll_interval_secs(), 12);
        assert_eq!(config.batch_size(), 500);
        assert_eq!(config.max_history(), 128);
        assert_eq!(config.resync_interval_blocks(), None);
        assert_eq!(config.tracked_entities().len(), 1);
        assert_eq!(config.log_addresses(), vec![DEFAULT_SAVINGS_RATE_SOURCE]);
    }

    #[test]
    fn test_config_stable_pools_list() {
        let config = load(&[
            ("RPC_URL", "http://localhost:8545"),
            (
                "STABLE_POOLS",
                "0x00000000000000000000000000000000000000aa, 0x00000000000000000000000000000000000000bb",
            ),
            ("SAVINGS_RATE_SOURCE", ""),
        ])
        .unwrap();

        assert_eq!(config.stable_pools().len(), 2);
        assert!(config.savings().is_none());
        assert!(matches!(config.tracked_entities()[0], TrackedEntity::StablePool(_)));
        assert_eq!(config.log_addresses()[0], DEFAULT_VAULT);
    }

    #[test]
    fn test_config_validation_invalid_pool_address() {
        assert!(load(&[("RPC_URL", "http://localhost:8545"), ("STABLE_POOLS", "invalid_address")]).is_err());
    }

    #[test]
    fn test_config_invalid_numbers() {
        assert!(load(&[("RPC_URL", "http://x"), ("BATCH_SIZE", "lots")]).is_err());
        assert!(load(&[("RPC_URL", "http://x"), ("BATCH_SIZE", "0")]).is_err());
        assert!(load(&[("RPC_URL", "http://x"), ("SAVINGS_RATE_SYMBOL", "apr")]).is_err());
    }

    #[test]
    fn test_config_ssr_savings() {
        let config = load(&[
            ("RPC_URL", "http://x"),
            ("SAVINGS_RATE_SOURCE", "0xa3931d71877C0E7a3148CB7Eb4463524FEc27fbD"),
            ("SAVINGS_RATE_SYMBOL", "ssr"),
            ("RESYNC_INTERVAL_BLOCKS", "300"),
        ])
        .unwrap();
        assert_eq!(config.savings().unwrap().rate_symbol, RateSymbol::Ssr);
        assert_eq!(config.resync_interval_blocks(), Some(300));
    }
}
