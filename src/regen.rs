//! Full-state regeneration from direct reads.
//!
//! The [`Regenerator`] rebuilds snapshots through a [`StateReader`] pinned to
//! one block, ignoring all incremental history. Pools the engine cannot price
//! (paused, with a hooks contract, or holding rate-bearing tokens) are left
//! out as [`Regenerated::Excluded`] instead of being tracked with partial data.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{SyncError, SyncResult};
use crate::snapshot::{
    AmpRamp, EntityState, Flags, PoolToken, RateSymbol, SavingsState, Snapshot, StablePoolState,
};

/// A savings vault the engine tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavingsSource {
    /// Contract holding `chi`, `rho` and the rate; emits the savings events.
    pub rate_source: Address,
    /// Underlying asset.
    pub asset: Address,
    /// Share token.
    pub share: Address,
    /// Name the rate is filed under.
    pub rate_symbol: RateSymbol,
}

/// An entity the engine tracks, as configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackedEntity {
    /// Savings vault, keyed by its rate source.
    Savings(SavingsSource),
    /// Vault stable pool, keyed by the pool address.
    StablePool(Address),
}

impl TrackedEntity {
    /// Registry key of the entity.
    #[must_use]
    pub const fn id(&self) -> Address {
        match self {
            Self::Savings(source) => source.rate_source,
            Self::StablePool(pool) => *pool,
        }
    }
}

/// Raw savings vault values at one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavingsReading {
    /// Accumulator as of `rho`.
    pub chi: U256,
    /// Last drip timestamp.
    pub rho: u64,
    /// Per-second rate.
    pub rate: U256,
}

/// Raw vault pool values at one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolReading {
    /// Registered tokens with their decimals.
    pub tokens: Vec<PoolToken>,
    /// Live balances scaled to 18 decimals.
    pub balances_live_scaled18: Vec<U256>,
    /// Static swap fee percentage.
    pub swap_fee: U256,
    /// Aggregate (protocol) swap fee percentage.
    pub aggregate_swap_fee: U256,
    /// Amplification ramp.
    pub amp: AmpRamp,
    /// Pool paused in the vault.
    pub paused: bool,
    /// Pool initialized in the vault.
    pub initialized: bool,
    /// Pool has a hooks contract.
    pub has_hooks: bool,
    /// Some token is priced through a rate provider.
    pub has_rate_tokens: bool,
}

/// Direct-read client used exclusively for regeneration.
#[async_trait]
pub trait StateReader: Send + Sync {
    /// Read a savings vault at `block`.
    async fn read_savings(&self, source: &SavingsSource, block: u64) -> SyncResult<SavingsReading>;

    /// Read a vault pool at `block`.
    async fn read_pool(&self, pool: Address, block: u64) -> SyncResult<PoolReading>;
}

#[async_trait]
impl<R: StateReader + ?Sized> StateReader for Arc<R> {
    async fn read_savings(&self, source: &SavingsSource, block: u64) -> SyncResult<SavingsReading> {
        (**self).read_savings(source, block).await
    }

    async fn read_pool(&self, pool: Address, block: u64) -> SyncResult<PoolReading> {
        (**self).read_pool(pool, block).await
    }
}

/// Why an entity was left out of a regenerated registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExclusionReason {
    /// Paused at the read block.
    Paused,
    /// Not yet initialized in the vault.
    Uninitialized,
    /// Carries a hooks contract.
    Hooks,
    /// Holds tokens priced through rate providers.
    RateTokens,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Paused => "paused",
            Self::Uninitialized => "not initialized",
            Self::Hooks => "has hooks",
            Self::RateTokens => "has rate-bearing tokens",
        };
        f.write_str(reason)
    }
}

/// Outcome of regenerating one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Regenerated {
    /// Authoritative snapshot.
    Snapshot(Snapshot),
    /// Entity is unsupported at this block.
    Excluded(ExclusionReason),
}

/// Rebuilds snapshots from direct reads.
#[derive(Debug, Clone)]
pub struct Regenerator<R> {
    reader: R,
}

impl<R: StateReader> Regenerator<R> {
    /// Create a regenerator over `reader`.
    pub const fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Underlying reader.
    pub const fn reader(&self) -> &R {
        &self.reader
    }

    /// Regenerate one entity at `block`.
    ///
    /// # Errors
    ///
    /// Returns a regeneration error naming the entity and block when a read
    /// fails or returns inconsistent data.
    #[instrument(skip(self, entity), fields(entity = %entity.id()))]
    pub async fn regenerate(&self, entity: &TrackedEntity, block: u64) -> SyncResult<Regenerated> {
        let id = entity.id();
        let result = match entity {
            TrackedEntity::Savings(source) => self.regenerate_savings(source, block).await,
            TrackedEntity::StablePool(pool) => self.regenerate_pool(*pool, block).await,
        };

        result.map_err(|e| {
            if e.is_regeneration() {
                e
            } else {
                let message = e.to_string();
                SyncError::regeneration(Some(id), block, message, Some(Box::new(e)))
            }
        })
    }

    /// Regenerate every entity at `block` concurrently.
    ///
    /// Results are returned in input order; one failure does not affect the
    /// other entities.
    pub async fn regenerate_all(
        &self,
        entities: &[TrackedEntity],
        block: u64,
    ) -> Vec<(Address, SyncResult<Regenerated>)> {
        let results = join_all(entities.iter().map(|e| self.regenerate(e, block))).await;
        let outcome: Vec<_> = entities.iter().map(TrackedEntity::id).zip(results).collect();

        let failed = outcome.iter().filter(|(_, r)| r.is_err()).count();
        info!(block, entities = entities.len(), failed, "Regenerated entities");
        outcome
    }

    async fn regenerate_savings(&self, source: &SavingsSource, block: u64) -> SyncResult<Regenerated> {
        let reading = self.reader.read_savings(source, block).await?;
        if reading.chi.is_zero() {
            return Err(SyncError::regeneration(
                Some(source.rate_source),
                block,
                "savings vault reports a zero accumulator",
                None,
            ));
        }

        debug!(chi = %reading.chi, rho = reading.rho, rate = %reading.rate, "Read savings vault");
        let state = SavingsState {
            asset: source.asset,
            share: source.share,
            chi: reading.chi,
            rho: reading.rho,
            rate: reading.rate,
            rate_symbol: source.rate_symbol,
        };
        Ok(Regenerated::Snapshot(Snapshot::new(
            source.rate_source,
            block,
            Flags::default(),
            EntityState::Savings(state),
        )))
    }

    async fn regenerate_pool(&self, pool: Address, block: u64) -> SyncResult<Regenerated> {
        let reading = self.reader.read_pool(pool, block).await?;

        let exclusion = if reading.paused {
            Some(ExclusionReason::Paused)
        } else if !reading.initialized {
            Some(ExclusionReason::Uninitialized)
        } else if reading.has_hooks {
            Some(ExclusionReason::Hooks)
        } else if reading.has_rate_tokens {
            Some(ExclusionReason::RateTokens)
        } else {
            None
        };
        if let Some(reason) = exclusion {
            warn!(%pool, block, %reason, "Excluding pool from registry");
            return Ok(Regenerated::Excluded(reason));
        }

        let state = StablePoolState {
            tokens: reading.tokens,
            balances_live_scaled18: reading.balances_live_scaled18,
            swap_fee: reading.swap_fee,
            aggregate_swap_fee: reading.aggregate_swap_fee,
            amp: reading.amp,
        };
        state
            .validate()
            .map_err(|e| SyncError::regeneration(Some(pool), block, e.to_string(), Some(Box::new(e))))?;

        Ok(Regenerated::Snapshot(Snapshot::new(
            pool,
            block,
            Flags::default(),
            EntityState::StablePool(state),
        )))
    }
}
