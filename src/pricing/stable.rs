//! Stable-swap invariant math for vault stable pools.
//!
//! All balances are live balances scaled to 18 decimals; the amplification
//! parameter carries [`AMP_PRECISION`]. Both Newton iterations stop once two
//! consecutive estimates are within 1 wei of each other and give up after 255
//! rounds.

use alloy::primitives::U256;

use crate::error::{SyncError, SyncResult};
use crate::math::div_up;
use crate::snapshot::AMP_PRECISION;

const MAX_ITERATIONS: usize = 255;

fn mul(a: U256, b: U256) -> SyncResult<U256> {
    a.checked_mul(b)
        .ok_or_else(|| SyncError::math(format!("stable math overflow computing {a} * {b}")))
}

fn div(a: U256, b: U256) -> SyncResult<U256> {
    if b.is_zero() {
        return Err(SyncError::math("stable math division by zero"));
    }
    Ok(a / b)
}

fn add(a: U256, b: U256) -> SyncResult<U256> {
    a.checked_add(b)
        .ok_or_else(|| SyncError::math(format!("stable math overflow computing {a} + {b}")))
}

fn sub(a: U256, b: U256) -> SyncResult<U256> {
    a.checked_sub(b)
        .ok_or_else(|| SyncError::math(format!("stable math underflow computing {a} - {b}")))
}

fn converged(current: U256, previous: U256) -> bool {
    let one = U256::from(1u8);
    if current > previous {
        current - previous <= one
    } else {
        previous - current <= one
    }
}

/// Stable-swap invariant `D` for `balances` at amplification `amp`.
///
/// # Errors
///
/// Returns a math error on overflow or if the iteration does not converge.
pub fn compute_invariant(amp: u64, balances: &[U256]) -> SyncResult<U256> {
    let sum = balances.iter().try_fold(U256::ZERO, |acc, b| add(acc, *b))?;
    if sum.is_zero() {
        return Ok(U256::ZERO);
    }

    let n = U256::from(balances.len());
    let precision = U256::from(AMP_PRECISION);
    let amp_times_total = mul(U256::from(amp), n)?;

    let mut invariant = sum;
    for _ in 0..MAX_ITERATIONS {
        let mut d_p = invariant;
        for balance in balances {
            d_p = div(mul(d_p, invariant)?, mul(*balance, n)?)?;
        }

        let previous = invariant;
        let numerator = mul(
            add(div(mul(amp_times_total, sum)?, precision)?, mul(d_p, n)?)?,
            invariant,
        )?;
        let denominator = add(
            div(mul(sub(amp_times_total, precision)?, invariant)?, precision)?,
            mul(add(n, U256::from(1u8))?, d_p)?,
        )?;
        invariant = div(numerator, denominator)?;

        if converged(invariant, previous) {
            return Ok(invariant);
        }
    }

    Err(SyncError::math("stable invariant did not converge"))
}

/// Balance of token `index` that keeps `invariant` given the other balances.
///
/// # Errors
///
/// Returns a math error on overflow or if the iteration does not converge.
pub fn compute_balance(
    amp: u64,
    balances: &[U256],
    invariant: U256,
    index: usize,
) -> SyncResult<U256> {
    let n = U256::from(balances.len());
    let precision = U256::from(AMP_PRECISION);
    let amp_times_total = mul(U256::from(amp), n)?;

    let Some(first) = balances.first() else {
        return Err(SyncError::math("stable math on an empty pool"));
    };
    let mut sum = *first;
    let mut p_d = mul(*first, n)?;
    for balance in &balances[1..] {
        p_d = div(mul(mul(p_d, *balance)?, n)?, invariant)?;
        sum = add(sum, *balance)?;
    }
    sum = sub(sum, balances[index])?;

    let inv2 = mul(invariant, invariant)?;
    let c = mul(
        div_up(mul(inv2, precision)?, mul(amp_times_total, p_d)?)?,
        balances[index],
    )?;
    let b = add(sum, div(mul(invariant, precision)?, amp_times_total)?)?;

    let mut balance = div_up(add(inv2, c)?, add(invariant, b)?)?;
    for _ in 0..MAX_ITERATIONS {
        let previous = balance;
        let numerator = add(mul(balance, balance)?, c)?;
        let denominator = sub(add(mul(balance, U256::from(2u8))?, b)?, invariant)?;
        balance = div_up(numerator, denominator)?;

        if converged(balance, previous) {
            return Ok(balance);
        }
    }

    Err(SyncError::math("stable balance did not converge"))
}

/// Amount of token `index_out` paid for exactly `amount_in` of `index_in`.
///
/// # Errors
///
/// Returns a math error on overflow, non-convergence, or when the pool
/// cannot pay the output.
pub fn compute_out_given_exact_in(
    amp: u64,
    balances: &[U256],
    index_in: usize,
    index_out: usize,
    amount_in: U256,
    invariant: U256,
) -> SyncResult<U256> {
    let mut moved = balances.to_vec();
    moved[index_in] = add(moved[index_in], amount_in)?;
    let final_out = compute_balance(amp, &moved, invariant, index_out)?;
    sub(sub(balances[index_out], final_out)?, U256::from(1u8))
}

/// Amount of token `index_in` owed for exactly `amount_out` of `index_out`.
///
/// # Errors
///
/// Returns a math error on overflow, non-convergence, or when `amount_out`
/// exceeds the pool balance.
pub fn compute_in_given_exact_out(
    amp: u64,
    balances: &[U256],
    index_in: usize,
    index_out: usize,
    amount_out: U256,
    invariant: U256,
) -> SyncResult<U256> {
    let mut moved = balances.to_vec();
    moved[index_out] = sub(moved[index_out], amount_out)?;
    let final_in = compute_balance(amp, &moved, invariant, index_in)?;
    add(sub(final_in, balances[index_in])?, U256::from(1u8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::WAD;

    const AMP: u64 = 200 * AMP_PRECISION;

    fn wad(units: u64) -> U256 {
        U256::from(units) * WAD
    }

    #[test]
    fn test_balanced_invariant_is_sum() {
        let balances = [wad(1_000_000), wad(1_000_000)];
        let invariant = compute_invariant(AMP, &balances).unwrap();
        let sum = wad(2_000_000);
        let diff = if invariant > sum { invariant - sum } else { sum - invariant };
        assert!(diff <= U256::from(10u8), "invariant {invariant} far from {sum}");
    }

    #[test]
    fn test_empty_pool_invariant() {
        assert_eq!(compute_invariant(AMP, &[U256::ZERO, U256::ZERO]).unwrap(), U256::ZERO);
    }

    #[test]
    fn test_compute_balance_recovers_current() {
        let balances = [wad(1_000_000), wad(900_000)];
        let invariant = compute_invariant(AMP, &balances).unwrap();
        let recovered = compute_balance(AMP, &balances, invariant, 1).unwrap();
        let diff = if recovered > balances[1] {
            recovered - balances[1]
        } else {
            balances[1] - recovered
        };
        assert!(diff <= U256::from(10u8));
    }

    #[test]
    fn test_swap_near_peg() {
        let balances = [wad(1_000_000), wad(1_000_000)];
        let invariant = compute_invariant(AMP, &balances).unwrap();

        let out = compute_out_given_exact_in(AMP, &balances, 0, 1, wad(1_000), invariant).unwrap();
        assert!(out < wad(1_000));
        assert!(out > wad(999));

        let owed = compute_in_given_exact_out(AMP, &balances, 0, 1, wad(1_000), invariant).unwrap();
        assert!(owed > wad(1_000));
        assert!(owed < wad(1_001));
    }

    #[test]
    fn test_exact_in_and_exact_out_agree() {
        let balances = [wad(500_000), wad(1_500_000)];
        let invariant = compute_invariant(AMP, &balances).unwrap();
        let amount_in = wad(10_000);

        let out = compute_out_given_exact_in(AMP, &balances, 0, 1, amount_in, invariant).unwrap();
        let owed = compute_in_given_exact_out(AMP, &balances, 0, 1, out, invariant).unwrap();
        let tolerance = U256::from(1_000_000u32);
        assert!(owed <= amount_in + tolerance);
        assert!(owed >= amount_in - tolerance);
    }

    #[test]
    fn test_draining_pool_is_error() {
        let balances = [wad(100), wad(100)];
        let invariant = compute_invariant(AMP, &balances).unwrap();
        assert!(compute_in_given_exact_out(AMP, &balances, 0, 1, wad(101), invariant).is_err());
    }
}
