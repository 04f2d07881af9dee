//! Share/asset conversion for rate-accruing savings vaults.
//!
//! ```text
//! chi(ts)  = ts > rho ? rpow(rate, ts - rho, RAY) * chi / RAY : chi
//!
//! deposit  (sell assets, exact in)  = floor(assets * RAY / chi)
//! redeem   (sell shares, exact in)  = floor(shares * chi / RAY)
//! mint     (buy shares, exact out)  = ceil(shares * chi / RAY)
//! withdraw (buy assets, exact out)  = ceil(assets * RAY / chi)
//! ```
//!
//! Amounts the trader receives truncate; amounts the trader owes round up.

use alloy::primitives::U256;

use crate::error::{SyncError, SyncResult};
use crate::math::{div_up, ray_div_down, ray_mul, rpow, RAY};
use crate::snapshot::SavingsState;

/// Accumulator extrapolated to `timestamp`.
///
/// # Errors
///
/// Returns a math error if compounding overflows.
pub fn chi_at(state: &SavingsState, timestamp: u64) -> SyncResult<U256> {
    if timestamp <= state.rho {
        return Ok(state.chi);
    }
    let growth = rpow(state.rate, timestamp - state.rho, RAY)?;
    ray_mul(growth, state.chi)
}

fn nonzero_chi(state: &SavingsState, timestamp: u64) -> SyncResult<U256> {
    let chi = chi_at(state, timestamp)?;
    if chi.is_zero() {
        return Err(SyncError::invariant("savings accumulator is zero"));
    }
    Ok(chi)
}

/// Shares received for depositing `assets`.
///
/// # Errors
///
/// Returns a math error on overflow or an invariant violation for a zero accumulator.
pub fn preview_deposit(state: &SavingsState, assets: U256, timestamp: u64) -> SyncResult<U256> {
    ray_div_down(assets, nonzero_chi(state, timestamp)?)
}

/// Assets owed to mint exactly `shares`.
///
/// # Errors
///
/// Returns a math error on overflow or an invariant violation for a zero accumulator.
pub fn preview_mint(state: &SavingsState, shares: U256, timestamp: u64) -> SyncResult<U256> {
    let chi = nonzero_chi(state, timestamp)?;
    let product = shares
        .checked_mul(chi)
        .ok_or_else(|| SyncError::math(format!("overflow computing {shares} * chi")))?;
    div_up(product, RAY)
}

/// Assets received for redeeming `shares`.
///
/// # Errors
///
/// Returns a math error on overflow or an invariant violation for a zero accumulator.
pub fn preview_redeem(state: &SavingsState, shares: U256, timestamp: u64) -> SyncResult<U256> {
    ray_mul(shares, nonzero_chi(state, timestamp)?)
}

/// Shares owed to withdraw exactly `assets`.
///
/// # Errors
///
/// Returns a math error on overflow or an invariant violation for a zero accumulator.
pub fn preview_withdraw(state: &SavingsState, assets: U256, timestamp: u64) -> SyncResult<U256> {
    let chi = nonzero_chi(state, timestamp)?;
    let scaled = assets
        .checked_mul(RAY)
        .ok_or_else(|| SyncError::math(format!("overflow computing {assets} * RAY")))?;
    div_up(scaled, chi)
}
