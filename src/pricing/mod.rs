//! Pricing engine: pure quote functions over a [`Snapshot`].
//!
//! [`quote_snapshot`] depends on nothing but its arguments. Time-dependent
//! quantities (the savings accumulator, the amplification ramp) are evaluated
//! at the timestamp the caller passes in.
//!
//! # Directions
//!
//! - [`SwapSide::Sell`]: `amount` is the exact input, the quote is the output.
//! - [`SwapSide::Buy`]: `amount` is the exact output, the quote is the input owed.
//!
//! Outputs truncate and owed inputs round up, so a quote never favors the trader.
//!
//! # Example
//!
//! ```
//! use alloy::primitives::{address, U256};
//! use dex_state_sync::math::RAY;
//! use dex_state_sync::pricing::{quote_snapshot, Quote, QuoteRequest, SwapSide};
//! use dex_state_sync::snapshot::{EntityState, Flags, RateSymbol, SavingsState, Snapshot};
//!
//! let dai = address!("6B175474E89094C44Da98b954EedeAC495271d0F");
//! let sdai = address!("83F20F44975D03b1b09e64809B757c47f942BEeA");
//! let state = SavingsState {
//!     asset: dai,
//!     share: sdai,
//!     chi: RAY * U256::from(105) / U256::from(100),
//!     rho: 0,
//!     rate: RAY,
//!     rate_symbol: RateSymbol::Dsr,
//! };
//! let snapshot = Snapshot::new(sdai, 1, Flags::default(), EntityState::Savings(state));
//!
//! let request = QuoteRequest::new(dai, sdai, U256::from(105u64), SwapSide::Sell);
//! assert_eq!(quote_snapshot(&snapshot, &request, 0), Quote::Amount(U256::from(100u64)));
//! ```

pub mod savings;
pub mod stable;

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::math::{complement, div_up, mul_div_up, mul_up};
use crate::snapshot::{EntityState, SavingsState, Snapshot, StablePoolState};

/// Smallest scaled amount the vault accepts for either side of a swap.
pub const MINIMUM_TRADE_AMOUNT: u64 = 1_000_000;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapSide {
    /// Exact input, quote the output.
    Sell,
    /// Exact output, quote the input.
    Buy,
}

/// A quote query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRequest {
    /// Token paid by the trader.
    pub token_in: Address,
    /// Token received by the trader.
    pub token_out: Address,
    /// Exact input for [`SwapSide::Sell`], exact output for [`SwapSide::Buy`].
    pub amount: U256,
    /// Direction.
    pub side: SwapSide,
}

impl QuoteRequest {
    /// Create a quote request.
    #[must_use]
    pub const fn new(token_in: Address, token_out: Address, amount: U256, side: SwapSide) -> Self {
        Self {
            token_in,
            token_out,
            amount,
            side,
        }
    }
}

/// Why a quote has no numeric answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnavailableReason {
    /// A disabling flag is set on the snapshot.
    Disabled,
    /// No state is known for the entity at the requested block.
    NotAvailable,
    /// The entity does not trade this token pair.
    UnsupportedPair,
    /// The pool cannot pay the requested output.
    InsufficientLiquidity,
    /// The trade is below the vault's minimum trade amount.
    BelowMinimum,
    /// Arithmetic failed (overflow, non-convergence).
    MathFailure(String),
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("entity is disabled"),
            Self::NotAvailable => f.write_str("no state available"),
            Self::UnsupportedPair => f.write_str("unsupported token pair"),
            Self::InsufficientLiquidity => f.write_str("insufficient liquidity"),
            Self::BelowMinimum => f.write_str("below minimum trade amount"),
            Self::MathFailure(message) => write!(f, "math failure: {message}"),
        }
    }
}

/// Result of a quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quote {
    /// Output amount for a sell, owed input for a buy.
    Amount(U256),
    /// No numeric answer.
    Unavailable(UnavailableReason),
}

impl Quote {
    /// The quoted amount, if any.
    #[must_use]
    pub const fn amount(&self) -> Option<U256> {
        match self {
            Self::Amount(amount) => Some(*amount),
            Self::Unavailable(_) => None,
        }
    }

    /// Whether the quote carries a numeric answer.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Amount(_))
    }
}

/// Quote `request` against `snapshot` at `timestamp`.
#[must_use]
pub fn quote_snapshot(snapshot: &Snapshot, request: &QuoteRequest, timestamp: u64) -> Quote {
    if snapshot.flags().is_disabled() {
        return Quote::Unavailable(UnavailableReason::Disabled);
    }
    if request.token_in == request.token_out {
        return Quote::Unavailable(UnavailableReason::UnsupportedPair);
    }

    let result = match snapshot.state() {
        EntityState::Savings(state) => quote_savings(state, request, timestamp),
        EntityState::StablePool(state) => quote_stable(state, request, timestamp),
    };

    match result {
        Ok(quote) => quote,
        Err(e) => {
            debug!(entity = %snapshot.entity(), error = %e, "Quote failed");
            Quote::Unavailable(UnavailableReason::MathFailure(e.to_string()))
        }
    }
}

fn quote_savings(state: &SavingsState, request: &QuoteRequest, timestamp: u64) -> SyncResult<Quote> {
    let amount = request.amount;
    let quoted = if request.token_in == state.asset && request.token_out == state.share {
        match request.side {
            SwapSide::Sell => savings::preview_deposit(state, amount, timestamp)?,
            SwapSide::Buy => savings::preview_mint(state, amount, timestamp)?,
        }
    } else if request.token_in == state.share && request.token_out == state.asset {
        match request.side {
            SwapSide::Sell => savings::preview_redeem(state, amount, timestamp)?,
            SwapSide::Buy => savings::preview_withdraw(state, amount, timestamp)?,
        }
    } else {
        return Ok(Quote::Unavailable(UnavailableReason::UnsupportedPair));
    };
    Ok(Quote::Amount(quoted))
}

fn quote_stable(state: &StablePoolState, request: &QuoteRequest, timestamp: u64) -> SyncResult<Quote> {
    state.validate()?;
    let (Some(index_in), Some(index_out)) = (
        state.token_index(request.token_in),
        state.token_index(request.token_out),
    ) else {
        return Ok(Quote::Unavailable(UnavailableReason::UnsupportedPair));
    };

    let factor_in = state.tokens[index_in].scaling_factor()?;
    let factor_out = state.tokens[index_out].scaling_factor()?;
    let minimum = U256::from(MINIMUM_TRADE_AMOUNT);
    let balances = &state.balances_live_scaled18;
    let amp = state.amp.value_at(timestamp);
    let invariant = stable::compute_invariant(amp, balances)?;

    let scale = |raw: U256, factor: U256| {
        raw.checked_mul(factor)
            .ok_or_else(|| SyncError::math(format!("overflow scaling {raw} by {factor}")))
    };

    match request.side {
        SwapSide::Sell => {
            let given = scale(request.amount, factor_in)?;
            if given < minimum {
                return Ok(Quote::Unavailable(UnavailableReason::BelowMinimum));
            }
            let fee = mul_up(given, state.swap_fee)?;
            let net_in = given.saturating_sub(fee);
            let out = match stable::compute_out_given_exact_in(
                amp, balances, index_in, index_out, net_in, invariant,
            ) {
                Ok(out) => out,
                Err(_) => return Ok(Quote::Unavailable(UnavailableReason::InsufficientLiquidity)),
            };
            if out < minimum {
                return Ok(Quote::Unavailable(UnavailableReason::BelowMinimum));
            }
            Ok(Quote::Amount(out / factor_out))
        }
        SwapSide::Buy => {
            let given = scale(request.amount, factor_out)?;
            if given < minimum {
                return Ok(Quote::Unavailable(UnavailableReason::BelowMinimum));
            }
            if given >= balances[index_out] {
                return Ok(Quote::Unavailable(UnavailableReason::InsufficientLiquidity));
            }
            let owed = stable::compute_in_given_exact_out(
                amp, balances, index_in, index_out, given, invariant,
            )?;
            if owed < minimum {
                return Ok(Quote::Unavailable(UnavailableReason::BelowMinimum));
            }
            let fee = mul_div_up(owed, state.swap_fee, complement(state.swap_fee))?;
            let gross = owed
                .checked_add(fee)
                .ok_or_else(|| SyncError::math("overflow adding swap fee"))?;
            Ok(Quote::Amount(div_up(gross, factor_in)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{RAY, WAD};
    use crate::snapshot::{AmpRamp, Flags, PoolToken, RateSymbol, AMP_PRECISION};
    use alloy::primitives::address;

    const ASSET: Address = address!("6B175474E89094C44Da98b954EedeAC495271d0F");
    const SHARE: Address = address!("83F20F44975D03b1b09e64809B757c47f942BEeA");
    const USDC: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");

    fn savings(chi: U256) -> Snapshot {
        Snapshot::new(
            SHARE,
            1,
            Flags::default(),
            EntityState::Savings(SavingsState {
                asset: ASSET,
                share: SHARE,
                chi,
                rho: 0,
                rate: RAY,
                rate_symbol: RateSymbol::Dsr,
            }),
        )
    }

    fn pool(swap_fee: U256) -> Snapshot {
        let million = U256::from(1_000_000u64) * WAD;
        Snapshot::new(
            address!("00000000000000000000000000000000000000aa"),
            1,
            Flags::default(),
            EntityState::StablePool(StablePoolState {
                tokens: vec![
                    PoolToken {
                        address: ASSET,
                        decimals: 18,
                    },
                    PoolToken {
                        address: USDC,
                        decimals: 6,
                    },
                ],
                balances_live_scaled18: vec![million, million],
                swap_fee,
                aggregate_swap_fee: U256::ZERO,
                amp: AmpRamp::constant(1_000 * AMP_PRECISION, 0),
            }),
        )
    }

    #[test]
    fn test_savings_directions() {
        let snapshot = savings(RAY * U256::from(2u8));
        let ten = U256::from(10u8);
        let q = |token_in, token_out, side| {
            quote_snapshot(&snapshot, &QuoteRequest::new(token_in, token_out, ten, side), 0)
        };
        assert_eq!(q(ASSET, SHARE, SwapSide::Sell), Quote::Amount(U256::from(5u8)));
        assert_eq!(q(ASSET, SHARE, SwapSide::Buy), Quote::Amount(U256::from(20u8)));
        assert_eq!(q(SHARE, ASSET, SwapSide::Sell), Quote::Amount(U256::from(20u8)));
        assert_eq!(q(SHARE, ASSET, SwapSide::Buy), Quote::Amount(U256::from(5u8)));
        assert_eq!(
            q(USDC, SHARE, SwapSide::Sell),
            Quote::Unavailable(UnavailableReason::UnsupportedPair)
        );
    }

    #[test]
    fn test_disabled_snapshot_refuses() {
        let snapshot = savings(RAY).with_flags(Flags {
            frozen: true,
            ..Flags::default()
        });
        let request = QuoteRequest::new(ASSET, SHARE, U256::from(1u8), SwapSide::Sell);
        assert_eq!(
            quote_snapshot(&snapshot, &request, 0),
            Quote::Unavailable(UnavailableReason::Disabled)
        );
    }

    #[test]
    fn test_stable_sell_unscales_output() {
        let snapshot = pool(U256::ZERO);
        let request = QuoteRequest::new(ASSET, USDC, U256::from(1_000u64) * WAD, SwapSide::Sell);
        let out = quote_snapshot(&snapshot, &request, 0).amount().unwrap();
        // Close to 1000 USDC with 6 decimals, never above it
        assert!(out <= U256::from(1_000_000_000u64));
        assert!(out > U256::from(999_000_000u64));
    }

    #[test]
    fn test_stable_fee_reduces_output_and_raises_input() {
        let amount = U256::from(1_000u64) * WAD;
        let sell = QuoteRequest::new(ASSET, USDC, amount, SwapSide::Sell);
        let no_fee = quote_snapshot(&pool(U256::ZERO), &sell, 0).amount().unwrap();
        let with_fee = quote_snapshot(&pool(WAD / U256::from(100u8)), &sell, 0)
            .amount()
            .unwrap();
        assert!(with_fee < no_fee);

        let buy = QuoteRequest::new(USDC, ASSET, amount, SwapSide::Buy);
        let no_fee = quote_snapshot(&pool(U256::ZERO), &buy, 0).amount().unwrap();
        let with_fee = quote_snapshot(&pool(WAD / U256::from(100u8)), &buy, 0)
            .amount()
            .unwrap();
        assert!(with_fee > no_fee);
    }

    #[test]
    fn test_stable_rejects_dust_and_drain() {
        let snapshot = pool(U256::ZERO);
        let dust = QuoteRequest::new(ASSET, USDC, U256::from(10u8), SwapSide::Sell);
        assert_eq!(
            quote_snapshot(&snapshot, &dust, 0),
            Quote::Unavailable(UnavailableReason::BelowMinimum)
        );

        let drain = QuoteRequest::new(ASSET, USDC, U256::from(2_000_000_000_000u64), SwapSide::Buy);
        assert_eq!(
            quote_snapshot(&snapshot, &drain, 0),
            Quote::Unavailable(UnavailableReason::InsufficientLiquidity)
        );
    }

    #[test]
    fn test_stable_buy_rejects_dust_input() {
        // SHARE is abundant, so a minimum-size buy costs far less than the minimum
        let snapshot = Snapshot::new(
            address!("00000000000000000000000000000000000000aa"),
            1,
            Flags::default(),
            EntityState::StablePool(StablePoolState {
                tokens: vec![
                    PoolToken {
                        address: ASSET,
                        decimals: 18,
                    },
                    PoolToken {
                        address: SHARE,
                        decimals: 18,
                    },
                ],
                balances_live_scaled18: vec![WAD, U256::from(100u8) * WAD],
                swap_fee: U256::ZERO,
                aggregate_swap_fee: U256::ZERO,
                amp: AmpRamp::constant(AMP_PRECISION, 0),
            }),
        );
        let buy = QuoteRequest::new(ASSET, SHARE, U256::from(MINIMUM_TRADE_AMOUNT), SwapSide::Buy);
        assert_eq!(
            quote_snapshot(&snapshot, &buy, 0),
            Quote::Unavailable(UnavailableReason::BelowMinimum)
        );

        let amount = U256::from(1_000u64) * U256::from(MINIMUM_TRADE_AMOUNT);
        let larger = QuoteRequest::new(ASSET, SHARE, amount, SwapSide::Buy);
        assert!(quote_snapshot(&snapshot, &larger, 0).is_available());
    }

    #[test]
    fn test_quote_is_pure() {
        let snapshot = pool(WAD / U256::from(1_000u16));
        let request = QuoteRequest::new(USDC, ASSET, U256::from(5_000_000u64), SwapSide::Sell);
        assert_eq!(
            quote_snapshot(&snapshot, &request, 42),
            quote_snapshot(&snapshot, &request, 42)
        );
    }
}
