//! Immutable per-block snapshots of tracked on-chain entities.
//!
//! A [`Snapshot`] records what the engine knows about one entity (a savings
//! vault or a vault stable pool) as of one block. Snapshots are never mutated:
//! the event applier and the regenerator always build a new value, and the
//! synchronizer shares them behind [`std::sync::Arc`] so readers holding the
//! "current" snapshot are never affected by an update in flight.
//!
//! ## Entity kinds
//!
//! - [`EntityState::Savings`]: a rate-accruing vault. `chi` is the accumulator
//!   as of `rho`; the value at a later timestamp is extrapolated at quote time.
//! - [`EntityState::StablePool`]: live balances (scaled to 18 decimals) held by
//!   the vault for one pool, its fees and its amplification ramp.
//!
//! ## Example
//!
//! ```
//! use alloy::primitives::{address, U256};
//! use dex_state_sync::math::RAY;
//! use dex_state_sync::snapshot::{EntityState, Flags, RateSymbol, SavingsState, Snapshot};
//!
//! let vault = address!("197E90f9FAD81970bA7976f33CbD77088E5D7cf7");
//! let state = SavingsState {
//!     asset: address!("6B175474E89094C44Da98b954EedeAC495271d0F"),
//!     share: address!("83F20F44975D03b1b09e64809B757c47f942BEeA"),
//!     chi: RAY,
//!     rho: 1_700_000_000,
//!     rate: RAY,
//!     rate_symbol: RateSymbol::Dsr,
//! };
//! let snapshot = Snapshot::new(vault, 19_000_000, Flags::default(), EntityState::Savings(state));
//!
//! let later = snapshot.at_block(19_000_001);
//! assert_eq!(snapshot.block_number(), 19_000_000);
//! assert_eq!(later.block_number(), 19_000_001);
//! assert_eq!(later.last_update_timestamp(), 1_700_000_000);
//! ```

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{SyncError, SyncResult};

/// Precision the amplification parameter is stored with.
pub const AMP_PRECISION: u64 = 1_000;

/// Disabling flags. Any set flag makes the pricing engine refuse to quote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    /// Entity paused by its governance.
    pub paused: bool,
    /// Entity frozen (no new positions).
    pub frozen: bool,
    /// Entity's backing seized.
    pub seized: bool,
}

impl Flags {
    /// Whether any disabling flag is set.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.paused || self.frozen || self.seized
    }
}

/// Name under which a savings vault files its per-second rate.
///
/// Maker's `Pot` calls it `dsr`, the `sUSDS` vault calls it `ssr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateSymbol {
    /// DAI savings rate.
    Dsr,
    /// Sky savings rate.
    Ssr,
}

impl RateSymbol {
    /// The `bytes32` value the vault emits as `what` when the rate is filed.
    #[must_use]
    pub fn what(self) -> B256 {
        let mut word = [0u8; 32];
        word[..3].copy_from_slice(self.as_str().as_bytes());
        B256::from(word)
    }

    /// Lowercase symbol.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dsr => "dsr",
            Self::Ssr => "ssr",
        }
    }
}

impl fmt::Display for RateSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RateSymbol {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dsr" => Ok(Self::Dsr),
            "ssr" => Ok(Self::Ssr),
            other => Err(SyncError::config(
                format!("unknown savings rate symbol '{other}', expected 'dsr' or 'ssr'"),
                None,
            )),
        }
    }
}

/// State of a rate-accruing savings vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavingsState {
    /// Underlying asset (e.g. DAI).
    pub asset: Address,
    /// Vault share token (e.g. sDAI).
    pub share: Address,
    /// Accumulator as of `rho`, ray scaled.
    pub chi: U256,
    /// Timestamp of the last accumulator update.
    pub rho: u64,
    /// Per-second compounding rate, ray scaled.
    pub rate: U256,
    /// Symbol the vault files its rate under.
    pub rate_symbol: RateSymbol,
}

/// One token registered in a vault pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolToken {
    /// Token address.
    pub address: Address,
    /// Token decimals (at most 18).
    pub decimals: u8,
}

impl PoolToken {
    /// `10^(18 - decimals)`, the factor that scales raw amounts to 18 decimals.
    ///
    /// # Errors
    ///
    /// Returns a math error for tokens with more than 18 decimals.
    pub fn scaling_factor(&self) -> SyncResult<U256> {
        let diff = 18u8.checked_sub(self.decimals).ok_or_else(|| {
            SyncError::math(format!(
                "token {} has {} decimals, at most 18 supported",
                self.address, self.decimals
            ))
        })?;
        Ok(U256::from(10u8).pow(U256::from(diff)))
    }
}

/// Amplification ramp of a stable pool. Values include [`AMP_PRECISION`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmpRamp {
    /// Amp at `start_time`.
    pub start_value: u64,
    /// Amp at and after `end_time`.
    pub end_value: u64,
    /// Ramp start timestamp.
    pub start_time: u64,
    /// Ramp end timestamp.
    pub end_time: u64,
}

impl AmpRamp {
    /// A ramp that holds `value` forever.
    #[must_use]
    pub const fn constant(value: u64, since: u64) -> Self {
        Self {
            start_value: value,
            end_value: value,
            start_time: since,
            end_time: since,
        }
    }

    /// Amplification parameter at `timestamp`, linearly interpolated while
    /// the ramp is in progress.
    #[must_use]
    pub fn value_at(&self, timestamp: u64) -> u64 {
        if timestamp >= self.end_time || self.end_time <= self.start_time {
            return self.end_value;
        }

        let elapsed = u128::from(timestamp.saturating_sub(self.start_time));
        let duration = u128::from(self.end_time - self.start_time);
        let start = u128::from(self.start_value);
        let end = u128::from(self.end_value);

        let value = if end > start {
            start + (end - start) * elapsed / duration
        } else {
            start - (start - end) * elapsed / duration
        };
        // Interpolation stays between start and end, both u64.
        u64::try_from(value).unwrap_or(self.end_value)
    }

    /// Whether the ramp is still moving at `timestamp`.
    #[must_use]
    pub const fn is_updating(&self, timestamp: u64) -> bool {
        timestamp < self.end_time && self.start_value != self.end_value
    }
}

/// State of one stable pool held by the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StablePoolState {
    /// Pool tokens in vault registration order.
    pub tokens: Vec<PoolToken>,
    /// Live balances scaled to 18 decimals, same order as `tokens`.
    pub balances_live_scaled18: Vec<U256>,
    /// Static swap fee percentage, wad scaled.
    pub swap_fee: U256,
    /// Share of the swap fee kept by the protocol, wad scaled.
    pub aggregate_swap_fee: U256,
    /// Amplification ramp.
    pub amp: AmpRamp,
}

impl StablePoolState {
    /// Index of `token` in the pool, if registered.
    #[must_use]
    pub fn token_index(&self, token: Address) -> Option<usize> {
        self.tokens.iter().position(|t| t.address == token)
    }

    /// Check the shape invariants of the pool state.
    ///
    /// # Errors
    ///
    /// Returns an invariant violation when the pool has fewer than two tokens
    /// or when balances and tokens disagree in length.
    pub fn validate(&self) -> SyncResult<()> {
        if self.tokens.len() < 2 {
            return Err(SyncError::invariant(format!(
                "stable pool needs at least 2 tokens, got {}",
                self.tokens.len()
            )));
        }
        if self.tokens.len() != self.balances_live_scaled18.len() {
            return Err(SyncError::invariant(format!(
                "stable pool has {} tokens but {} balances",
                self.tokens.len(),
                self.balances_live_scaled18.len()
            )));
        }
        Ok(())
    }
}

/// Protocol-specific part of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityState {
    /// Rate-accruing savings vault.
    Savings(SavingsState),
    /// Vault stable pool.
    StablePool(StablePoolState),
}

impl EntityState {
    /// Short kind name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Savings(_) => "savings",
            Self::StablePool(_) => "stable_pool",
        }
    }
}

/// Immutable state of one entity as of one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    entity: Address,
    block_number: u64,
    flags: Flags,
    state: EntityState,
}

impl Snapshot {
    /// Build a snapshot.
    #[must_use]
    pub const fn new(entity: Address, block_number: u64, flags: Flags, state: EntityState) -> Self {
        Self {
            entity,
            block_number,
            flags,
            state,
        }
    }

    /// Entity this snapshot describes.
    #[must_use]
    pub const fn entity(&self) -> Address {
        self.entity
    }

    /// Block this snapshot is valid as of.
    #[must_use]
    pub const fn block_number(&self) -> u64 {
        self.block_number
    }

    /// Disabling flags.
    #[must_use]
    pub const fn flags(&self) -> Flags {
        self.flags
    }

    /// Protocol state.
    #[must_use]
    pub const fn state(&self) -> &EntityState {
        &self.state
    }

    /// Timestamp of the last time-dependent update: `rho` for savings vaults,
    /// the amp ramp start for stable pools.
    #[must_use]
    pub const fn last_update_timestamp(&self) -> u64 {
        match &self.state {
            EntityState::Savings(s) => s.rho,
            EntityState::StablePool(p) => p.amp.start_time,
        }
    }

    /// Same state, re-stamped at `block_number`.
    #[must_use]
    pub fn at_block(&self, block_number: u64) -> Self {
        Self {
            block_number,
            ..self.clone()
        }
    }

    /// New snapshot with `state` replaced.
    #[must_use]
    pub fn with_state(&self, state: EntityState) -> Self {
        Self {
            entity: self.entity,
            block_number: self.block_number,
            flags: self.flags,
            state,
        }
    }

    /// New snapshot with `flags` replaced.
    #[must_use]
    pub fn with_flags(&self, flags: Flags) -> Self {
        Self {
            flags,
            ..self.clone()
        }
    }
}
