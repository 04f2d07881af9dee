//! Fixed-point integer arithmetic shared by every pricing formula.
//!
//! All amounts are [`U256`] values scaled either by [`RAY`] (10^27, used by
//! the savings-rate accumulator) or by [`WAD`] (10^18, used by vault pool
//! balances and fees). Nothing here touches floating point: results must match
//! on-chain computation bit for bit.
//!
//! Every operation is checked. An overflow or a division by zero is reported
//! as [`SyncError::Math`] instead of wrapping or panicking.
//!
//! # Rounding
//!
//! Truncating helpers (`ray_mul`, `ray_div_down`, `mul_down`, `div_down`) are
//! used for amounts paid out to the trader. Round-up helpers (`div_up`,
//! `mul_up`, `div_up_wad`, `mul_div_up`) are used for amounts owed by the
//! trader.
//!
//! ```
//! use alloy::primitives::U256;
//! use dex_state_sync::math::{div_up, ray_mul, RAY};
//!
//! let chi = RAY * U256::from(105) / U256::from(100);
//! let shares = U256::from(1_000u64);
//! assert_eq!(ray_mul(shares, chi).unwrap(), U256::from(1_050u64));
//! assert_eq!(div_up(U256::from(7u64), U256::from(2u64)).unwrap(), U256::from(4u64));
//! ```

use alloy::primitives::U256;

use crate::error::{SyncError, SyncResult};

/// 10^27, the scale of the savings-rate accumulator and its per-second rate.
pub const RAY: U256 = U256::from_limbs([0x9fd0_803c_e800_0000, 0x033b_2e3c, 0, 0]);

/// 10^18, the scale of vault pool balances and fee percentages.
pub const WAD: U256 = U256::from_limbs([0x0de0_b6b3_a764_0000, 0, 0, 0]);

fn checked_mul(a: U256, b: U256) -> SyncResult<U256> {
    a.checked_mul(b)
        .ok_or_else(|| SyncError::math(format!("overflow computing {a} * {b}")))
}

fn checked_div(a: U256, b: U256) -> SyncResult<U256> {
    if b.is_zero() {
        return Err(SyncError::math(format!("division of {a} by zero")));
    }
    Ok(a / b)
}

/// `a * b / RAY`, truncating.
///
/// # Errors
///
/// Returns a math error if `a * b` overflows.
pub fn ray_mul(a: U256, b: U256) -> SyncResult<U256> {
    Ok(checked_mul(a, b)? / RAY)
}

/// `a * RAY / b`, truncating.
///
/// # Errors
///
/// Returns a math error on overflow or when `b` is zero.
pub fn ray_div_down(a: U256, b: U256) -> SyncResult<U256> {
    checked_div(checked_mul(a, RAY)?, b)
}

/// Raw round-up division: `a == 0 ? 0 : (a - 1) / b + 1`.
///
/// # Errors
///
/// Returns a math error when `b` is zero.
pub fn div_up(a: U256, b: U256) -> SyncResult<U256> {
    if b.is_zero() {
        return Err(SyncError::math(format!("division of {a} by zero")));
    }
    if a.is_zero() {
        return Ok(U256::ZERO);
    }
    Ok((a - U256::from(1u8)) / b + U256::from(1u8))
}

/// `x^n` in fixed point with scale `base`, rounding half up at every step.
///
/// This mirrors the exponentiation-by-squaring routine the savings vaults use
/// to compound their per-second rate, including its rounding.
///
/// # Errors
///
/// Returns a math error on overflow or when `base` is zero.
pub fn rpow(x: U256, n: u64, base: U256) -> SyncResult<U256> {
    if base.is_zero() {
        return Err(SyncError::math("rpow with zero base"));
    }
    if x.is_zero() {
        return Ok(if n == 0 { base } else { U256::ZERO });
    }

    let half = base / U256::from(2u8);
    let mut z = if n % 2 == 0 { base } else { x };
    let mut x = x;
    let mut n = n / 2;

    while n > 0 {
        let xx = checked_mul(x, x)?;
        let xx_round = xx
            .checked_add(half)
            .ok_or_else(|| SyncError::math("overflow rounding rpow square"))?;
        x = xx_round / base;

        if n % 2 == 1 {
            let zx = checked_mul(z, x)?;
            let zx_round = zx
                .checked_add(half)
                .ok_or_else(|| SyncError::math("overflow rounding rpow product"))?;
            z = zx_round / base;
        }
        n /= 2;
    }

    Ok(z)
}

/// `a * b / WAD`, truncating.
///
/// # Errors
///
/// Returns a math error if `a * b` overflows.
pub fn mul_down(a: U256, b: U256) -> SyncResult<U256> {
    Ok(checked_mul(a, b)? / WAD)
}

/// `a * b / WAD`, rounding up.
///
/// # Errors
///
/// Returns a math error if `a * b` overflows.
pub fn mul_up(a: U256, b: U256) -> SyncResult<U256> {
    div_up(checked_mul(a, b)?, WAD)
}

/// `a * WAD / b`, truncating.
///
/// # Errors
///
/// Returns a math error on overflow or when `b` is zero.
pub fn div_down(a: U256, b: U256) -> SyncResult<U256> {
    checked_div(checked_mul(a, WAD)?, b)
}

/// `a * WAD / b`, rounding up.
///
/// # Errors
///
/// Returns a math error on overflow or when `b` is zero.
pub fn div_up_wad(a: U256, b: U256) -> SyncResult<U256> {
    div_up(checked_mul(a, WAD)?, b)
}

/// `a * b / c`, rounding up.
///
/// # Errors
///
/// Returns a math error on overflow or when `c` is zero.
pub fn mul_div_up(a: U256, b: U256, c: U256) -> SyncResult<U256> {
    div_up(checked_mul(a, b)?, c)
}

/// `WAD - x`, saturating at zero.
#[must_use]
pub fn complement(x: U256) -> U256 {
    WAD.saturating_sub(x)
}
