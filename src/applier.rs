//! Pure event application: `(snapshot, event) -> snapshot'`.
//!
//! [`apply`] matches exhaustively on [`TrackedEvent`] and never touches the
//! registry. Events that do not concern the snapshot's protocol return
//! [`Applied::Unchanged`]; events that would drive a balance negative or that
//! do not fit the pool's shape are reported as invariant violations.

use alloy::primitives::{I256, U256};

use crate::error::{SyncError, SyncResult};
use crate::events::TrackedEvent;
use crate::math::mul_down;
use crate::pricing::savings::chi_at;
use crate::snapshot::{AmpRamp, EntityState, Flags, SavingsState, Snapshot, StablePoolState};

/// Block the applied events were emitted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockContext {
    /// Block number.
    pub number: u64,
    /// Block timestamp.
    pub timestamp: u64,
}

impl BlockContext {
    /// Create a block context.
    #[must_use]
    pub const fn new(number: u64, timestamp: u64) -> Self {
        Self { number, timestamp }
    }
}

/// Outcome of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The event produced a new snapshot.
    Updated(Snapshot),
    /// The event does not affect this snapshot.
    Unchanged,
}

/// Apply `event` to `snapshot`.
///
/// The returned snapshot keeps the input's block number; the synchronizer
/// stamps it with the block once every log of the block has been applied.
///
/// # Errors
///
/// Returns an invariant violation for negative balances, delta vectors that
/// do not match the pool's token count, or swaps through unregistered tokens.
/// Math errors are returned when scaling overflows.
pub fn apply(snapshot: &Snapshot, event: &TrackedEvent, block: BlockContext) -> SyncResult<Applied> {
    match snapshot.state() {
        EntityState::Savings(state) => apply_savings(snapshot, state, event, block),
        EntityState::StablePool(state) => apply_pool(snapshot, state, event, block),
    }
}

fn apply_savings(
    snapshot: &Snapshot,
    state: &SavingsState,
    event: &TrackedEvent,
    block: BlockContext,
) -> SyncResult<Applied> {
    let next = match event {
        TrackedEvent::Drip { chi } => {
            let chi = match chi {
                Some(chi) => *chi,
                None => chi_at(state, block.timestamp)?,
            };
            if chi.is_zero() {
                return Err(SyncError::invariant(format!(
                    "savings vault {} dripped to a zero accumulator",
                    snapshot.entity()
                )));
            }
            SavingsState {
                chi,
                rho: block.timestamp,
                ..state.clone()
            }
        }
        TrackedEvent::RateFiled { what, rate } => {
            if *what != state.rate_symbol.what() {
                return Ok(Applied::Unchanged);
            }
            // The vault only files after a drip in the same block, so chi is current.
            SavingsState {
                rate: *rate,
                rho: block.timestamp,
                ..state.clone()
            }
        }
        TrackedEvent::PoolBalanceChanged { .. }
        | TrackedEvent::Swap { .. }
        | TrackedEvent::PausedStateChanged { .. }
        | TrackedEvent::SwapFeeChanged { .. }
        | TrackedEvent::AggregateSwapFeeChanged { .. }
        | TrackedEvent::AmpUpdateStarted { .. }
        | TrackedEvent::AmpUpdateStopped { .. } => return Ok(Applied::Unchanged),
    };

    Ok(Applied::Updated(
        snapshot.with_state(EntityState::Savings(next)),
    ))
}

fn apply_pool(
    snapshot: &Snapshot,
    state: &StablePoolState,
    event: &TrackedEvent,
    block: BlockContext,
) -> SyncResult<Applied> {
    let next = match event {
        TrackedEvent::PoolBalanceChanged { deltas } => StablePoolState {
            balances_live_scaled18: apply_deltas(snapshot, state, deltas)?,
            ..state.clone()
        },
        TrackedEvent::Swap {
            token_in,
            token_out,
            amount_in,
            amount_out,
            swap_fee_amount,
        } => {
            let index_in = pool_index(snapshot, state, *token_in)?;
            let index_out = pool_index(snapshot, state, *token_out)?;

            // The protocol share of the fee leaves the pool balance.
            let aggregate_fee = mul_down(*swap_fee_amount, state.aggregate_swap_fee)?;
            let net_in = amount_in.checked_sub(aggregate_fee).ok_or_else(|| {
                SyncError::invariant(format!(
                    "swap on {} charged aggregate fee {aggregate_fee} above amount in {amount_in}",
                    snapshot.entity()
                ))
            })?;

            let mut balances = state.balances_live_scaled18.clone();
            balances[index_in] = add_scaled(state, index_in, balances[index_in], net_in)?;
            balances[index_out] =
                sub_scaled(snapshot, state, index_out, balances[index_out], *amount_out)?;

            StablePoolState {
                balances_live_scaled18: balances,
                ..state.clone()
            }
        }
        TrackedEvent::PausedStateChanged { paused } => {
            return Ok(Applied::Updated(snapshot.with_flags(Flags {
                paused: *paused,
                ..snapshot.flags()
            })));
        }
        TrackedEvent::SwapFeeChanged { swap_fee } => StablePoolState {
            swap_fee: *swap_fee,
            ..state.clone()
        },
        TrackedEvent::AggregateSwapFeeChanged { aggregate_swap_fee } => StablePoolState {
            aggregate_swap_fee: *aggregate_swap_fee,
            ..state.clone()
        },
        TrackedEvent::AmpUpdateStarted {
            start_value,
            end_value,
            start_time,
            end_time,
        } => StablePoolState {
            amp: AmpRamp {
                start_value: *start_value,
                end_value: *end_value,
                start_time: *start_time,
                end_time: *end_time,
            },
            ..state.clone()
        },
        TrackedEvent::AmpUpdateStopped { current_value } => StablePoolState {
            amp: AmpRamp::constant(*current_value, block.timestamp),
            ..state.clone()
        },
        TrackedEvent::Drip { .. } | TrackedEvent::RateFiled { .. } => {
            return Ok(Applied::Unchanged)
        }
    };

    Ok(Applied::Updated(
        snapshot.with_state(EntityState::StablePool(next)),
    ))
}

fn pool_index(
    snapshot: &Snapshot,
    state: &StablePoolState,
    token: alloy::primitives::Address,
) -> SyncResult<usize> {
    state.token_index(token).ok_or_else(|| {
        SyncError::invariant(format!(
            "token {token} is not registered in pool {}",
            snapshot.entity()
        ))
    })
}

fn scaled(state: &StablePoolState, index: usize, raw: U256) -> SyncResult<U256> {
    let factor = state.tokens[index].scaling_factor()?;
    raw.checked_mul(factor)
        .ok_or_else(|| SyncError::math(format!("overflow scaling {raw} by {factor}")))
}

fn add_scaled(state: &StablePoolState, index: usize, balance: U256, raw: U256) -> SyncResult<U256> {
    let amount = scaled(state, index, raw)?;
    balance
        .checked_add(amount)
        .ok_or_else(|| SyncError::math(format!("overflow adding {amount} to balance {balance}")))
}

fn sub_scaled(
    snapshot: &Snapshot,
    state: &StablePoolState,
    index: usize,
    balance: U256,
    raw: U256,
) -> SyncResult<U256> {
    let amount = scaled(state, index, raw)?;
    balance.checked_sub(amount).ok_or_else(|| {
        SyncError::invariant(format!(
            "balance {index} of {} would go negative: {balance} - {amount}",
            snapshot.entity()
        ))
    })
}

fn apply_deltas(
    snapshot: &Snapshot,
    state: &StablePoolState,
    deltas: &[I256],
) -> SyncResult<Vec<U256>> {
    if deltas.len() != state.balances_live_scaled18.len() {
        return Err(SyncError::invariant(format!(
            "pool {} has {} balances but event carries {} deltas",
            snapshot.entity(),
            state.balances_live_scaled18.len(),
            deltas.len()
        )));
    }

    state
        .balances_live_scaled18
        .iter()
        .zip(deltas)
        .enumerate()
        .map(|(index, (balance, delta))| {
            if delta.is_negative() {
                sub_scaled(snapshot, state, index, *balance, delta.unsigned_abs())
            } else {
                add_scaled(state, index, *balance, delta.unsigned_abs())
            }
        })
        .collect()
}
