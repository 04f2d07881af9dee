//! Rounding and refusal properties of the pricing engine.

#![allow(clippy::unwrap_used)]

use alloy::primitives::{address, Address, U256};
use dex_state_sync::math::{RAY, WAD};
use dex_state_sync::pricing::savings::{
    chi_at, preview_deposit, preview_mint, preview_redeem, preview_withdraw,
};
use dex_state_sync::pricing::{quote_snapshot, Quote, QuoteRequest, SwapSide, UnavailableReason};
use dex_state_sync::snapshot::{
    AmpRamp, EntityState, Flags, PoolToken, RateSymbol, SavingsState, Snapshot, StablePoolState,
    AMP_PRECISION,
};

const DAI: Address = address!("6B175474E89094C44Da98b954EedeAC495271d0F");
const SDAI: Address = address!("83F20F44975D03b1b09e64809B757c47f942BEeA");
const POT: Address = address!("197E90f9FAD81970bA7976f33CbD77088E5D7cf7");
const USDC: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
const USDT: Address = address!("dAC17F958D2ee523a2206206994597C13D831ec7");

/// 5% APY expressed as a per-second rate.
const DSR_5_PERCENT: u128 = 1_000_000_001_547_125_957_863_212_448;

fn savings_state(chi: U256, rate: U256) -> SavingsState {
    SavingsState {
        asset: DAI,
        share: SDAI,
        chi,
        rho: 1_700_000_000,
        rate,
        rate_symbol: RateSymbol::Dsr,
    }
}

fn chi_105() -> U256 {
    RAY * U256::from(105u64) / U256::from(100u64)
}

fn stable_snapshot(flags: Flags) -> Snapshot {
    let state = StablePoolState {
        tokens: vec![
            PoolToken {
                address: USDC,
                decimals: 6,
            },
            PoolToken {
                address: USDT,
                decimals: 6,
            },
        ],
        balances_live_scaled18: vec![
            U256::from(5_000_000u64) * WAD,
            U256::from(5_000_000u64) * WAD,
        ],
        swap_fee: WAD / U256::from(10_000u64),
        aggregate_swap_fee: WAD / U256::from(2u64),
        amp: AmpRamp::constant(1_000 * AMP_PRECISION, 0),
    };
    Snapshot::new(POT, 1, flags, EntityState::StablePool(state))
}

#[test]
fn test_savings_known_values() {
    let state = savings_state(chi_105(), RAY);
    let amount = U256::from(1_000u64) * WAD;

    assert_eq!(
        preview_deposit(&state, amount, 1_700_000_000).unwrap(),
        U256::from(952_380_952_380_952_380_952u128)
    );
    assert_eq!(
        preview_mint(&state, amount, 1_700_000_000).unwrap(),
        U256::from(1_050u64) * WAD
    );
    assert_eq!(
        preview_redeem(&state, amount, 1_700_000_000).unwrap(),
        U256::from(1_050u64) * WAD
    );
    assert_eq!(
        preview_withdraw(&state, amount, 1_700_000_000).unwrap(),
        U256::from(952_380_952_380_952_380_953u128)
    );
}

#[test]
fn test_savings_round_trips_never_favor_trader() {
    let state = savings_state(chi_105(), U256::from(DSR_5_PERCENT));
    let ts = 1_700_086_400;

    for raw in [1u128, 7, 999, 1_000_003, 123_456_789_012_345_678, 10u128.pow(24) + 17] {
        let x = U256::from(raw);

        // Buying back the shares a deposit yields never costs less than the deposit
        let shares = preview_deposit(&state, x, ts).unwrap();
        assert!(preview_mint(&state, shares, ts).unwrap() <= x);
        assert!(preview_mint(&state, x, ts).unwrap() >= preview_redeem(&state, x, ts).unwrap());

        // Redeeming what a mint costs never returns more than was paid
        let cost = preview_mint(&state, x, ts).unwrap();
        assert!(preview_deposit(&state, cost, ts).unwrap() >= x);

        assert!(preview_withdraw(&state, x, ts).unwrap() >= preview_deposit(&state, x, ts).unwrap());
    }
}

#[test]
fn test_chi_is_monotonic_in_time() {
    let state = savings_state(chi_105(), U256::from(DSR_5_PERCENT));
    let mut previous = chi_at(&state, 1_700_000_000).unwrap();
    assert_eq!(previous, chi_105());

    for elapsed in [1u64, 60, 3_600, 86_400, 31_536_000] {
        let chi = chi_at(&state, 1_700_000_000 + elapsed).unwrap();
        assert!(chi >= previous);
        previous = chi;
    }

    // One year at 5% APY lands within 1e-9 of 1.05 * 1.05
    let expected = chi_105() * U256::from(105u64) / U256::from(100u64);
    let diff = if previous > expected { previous - expected } else { expected - previous };
    assert!(diff < RAY / U256::from(1_000_000_000u64));
}

#[test]
fn test_stable_quotes_are_near_parity_and_direction_consistent() {
    let snapshot = stable_snapshot(Flags::default());
    let amount = U256::from(1_000_000_000u64); // 1,000 USDC

    let sell = quote_snapshot(&snapshot, &QuoteRequest::new(USDC, USDT, amount, SwapSide::Sell), 0)
        .amount()
        .unwrap();
    let buy = quote_snapshot(&snapshot, &QuoteRequest::new(USDC, USDT, amount, SwapSide::Buy), 0)
        .amount()
        .unwrap();

    // Fee of 1bp and a balanced deep pool
    assert!(sell < amount);
    assert!(sell > amount * U256::from(9_998u64) / U256::from(10_000u64));
    assert!(buy > amount);
    assert!(buy < amount * U256::from(10_002u64) / U256::from(10_000u64));
}

#[test]
fn test_stable_larger_trades_get_worse_prices() {
    let snapshot = stable_snapshot(Flags::default());
    let small = U256::from(1_000_000_000u64);
    let large = small * U256::from(2_000u64);

    let out_small = quote_snapshot(&snapshot, &QuoteRequest::new(USDC, USDT, small, SwapSide::Sell), 0)
        .amount()
        .unwrap();
    let out_large = quote_snapshot(&snapshot, &QuoteRequest::new(USDC, USDT, large, SwapSide::Sell), 0)
        .amount()
        .unwrap();

    assert!(out_large * small < out_small * large);
}

#[test]
fn test_disabled_snapshots_refuse_every_direction() {
    let flag_sets = [
        Flags {
            paused: true,
            ..Flags::default()
        },
        Flags {
            frozen: true,
            ..Flags::default()
        },
        Flags {
            seized: true,
            ..Flags::default()
        },
    ];

    for flags in flag_sets {
        let pool = stable_snapshot(flags);
        let savings = Snapshot::new(
            POT,
            1,
            flags,
            EntityState::Savings(savings_state(chi_105(), RAY)),
        );

        for side in [SwapSide::Sell, SwapSide::Buy] {
            for (snapshot, a, b) in [(&pool, USDC, USDT), (&savings, DAI, SDAI)] {
                for (token_in, token_out) in [(a, b), (b, a)] {
                    let request = QuoteRequest::new(token_in, token_out, WAD, side);
                    assert_eq!(
                        quote_snapshot(snapshot, &request, 0),
                        Quote::Unavailable(UnavailableReason::Disabled)
                    );
                }
            }
        }
    }
}

#[test]
fn test_unknown_tokens_and_dust_are_refused() {
    let snapshot = stable_snapshot(Flags::default());

    let unknown = QuoteRequest::new(USDC, DAI, U256::from(1_000_000u64), SwapSide::Sell);
    assert_eq!(
        quote_snapshot(&snapshot, &unknown, 0),
        Quote::Unavailable(UnavailableReason::UnsupportedPair)
    );

    // Scaled 1e12 per raw unit, still above the minimum
    let one_unit = QuoteRequest::new(USDC, USDT, U256::from(1u64), SwapSide::Sell);
    assert!(!matches!(
        quote_snapshot(&snapshot, &one_unit, 0),
        Quote::Unavailable(UnavailableReason::BelowMinimum)
    ));

    let drain = QuoteRequest::new(USDC, USDT, U256::from(5_000_000u64) * U256::from(1_000_000u64), SwapSide::Buy);
    assert_eq!(
        quote_snapshot(&snapshot, &drain, 0),
        Quote::Unavailable(UnavailableReason::InsufficientLiquidity)
    );
}
