//! Shared fixtures for integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use alloy::primitives::{address, Address, Log, B256, I256, U256};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;

use dex_state_sync::error::{SyncError, SyncResult};
use dex_state_sync::events::{LogDecoder, PoolBalanceChanged, PoolPausedStateChanged, Swap};
use dex_state_sync::math::{RAY, WAD};
use dex_state_sync::regen::{
    PoolReading, Regenerator, SavingsReading, SavingsSource, StateReader, TrackedEntity,
};
use dex_state_sync::rpc::feed::{BlockFeed, BlockLogs};
use dex_state_sync::snapshot::{AmpRamp, PoolToken, RateSymbol, AMP_PRECISION};
use dex_state_sync::sync::StateSynchronizer;

pub const VAULT: Address = address!("bA1333333333a1BA1108E8412f11850A5C319bA9");
pub const POOL: Address = address!("00000000000000000000000000000000000000aa");
pub const SUSDS: Address = address!("a3931d71877C0E7a3148CB7Eb4463524FEc27fbD");
pub const USDS: Address = address!("dC035D45d973E3EC169d2276DDab16f1e407384F");
pub const TOKEN_A: Address = address!("0000000000000000000000000000000000000001");
pub const TOKEN_B: Address = address!("0000000000000000000000000000000000000002");

pub const SAVINGS: SavingsSource = SavingsSource {
    rate_source: SUSDS,
    asset: USDS,
    share: SUSDS,
    rate_symbol: RateSymbol::Ssr,
};

/// Balance of the first pool token as read at `block`.
///
/// Direct reads tag the state with their block so tests can tell which
/// regeneration won.
pub fn tagged_balance(block: u64) -> U256 {
    U256::from(1_000u64) * WAD + U256::from(block)
}

/// Configurable [`StateReader`].
pub struct MockReader {
    pub delays: HashMap<u64, Duration>,
    pub failing_blocks: Mutex<HashSet<u64>>,
    pub paused_from: Option<u64>,
    pub calls: AtomicU32,
}

impl Default for MockReader {
    fn default() -> Self {
        Self {
            delays: HashMap::new(),
            failing_blocks: Mutex::new(HashSet::new()),
            paused_from: None,
            calls: AtomicU32::new(0),
        }
    }
}

impl MockReader {
    pub fn with_delays(delays: &[(u64, u64)]) -> Self {
        Self {
            delays: delays
                .iter()
                .map(|(block, ms)| (*block, Duration::from_millis(*ms)))
                .collect(),
            ..Self::default()
        }
    }

    pub fn fail_at(&self, block: u64) {
        self.failing_blocks.lock().unwrap().insert(block);
    }

    pub fn recover_at(&self, block: u64) {
        self.failing_blocks.lock().unwrap().remove(&block);
    }

    async fn enter(&self, block: u64) -> SyncResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(&block) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing_blocks.lock().unwrap().contains(&block) {
            return Err(SyncError::rpc(format!("node unavailable at {block}"), None));
        }
        Ok(())
    }
}

#[async_trait]
impl StateReader for MockReader {
    async fn read_savings(&self, _: &SavingsSource, block: u64) -> SyncResult<SavingsReading> {
        self.enter(block).await?;
        Ok(SavingsReading {
            chi: RAY * U256::from(105u64) / U256::from(100u64),
            rho: 1_700_000_000,
            rate: RAY,
        })
    }

    async fn read_pool(&self, _: Address, block: u64) -> SyncResult<PoolReading> {
        self.enter(block).await?;
        Ok(PoolReading {
            tokens: vec![
                PoolToken {
                    address: TOKEN_A,
                    decimals: 18,
                },
                PoolToken {
                    address: TOKEN_B,
                    decimals: 6,
                },
            ],
            balances_live_scaled18: vec![tagged_balance(block), U256::from(1_000u64) * WAD],
            swap_fee: WAD / U256::from(10_000u64),
            aggregate_swap_fee: WAD / U256::from(2u64),
            amp: AmpRamp::constant(200 * AMP_PRECISION, 0),
            paused: self.paused_from.is_some_and(|from| block >= from),
            initialized: true,
            has_hooks: false,
            has_rate_tokens: false,
        })
    }
}

pub fn entities() -> Vec<TrackedEntity> {
    vec![
        TrackedEntity::Savings(SAVINGS),
        TrackedEntity::StablePool(POOL),
    ]
}

pub fn decoder() -> LogDecoder {
    LogDecoder::new(Some(VAULT), [(SUSDS, RateSymbol::Ssr)])
}

pub fn synchronizer<R: StateReader>(reader: R) -> StateSynchronizer<R> {
    StateSynchronizer::new(Regenerator::new(reader), entities(), decoder(), 32)
}

pub fn deltas_log(pool: Address, deltas: &[i128]) -> Log {
    let event = PoolBalanceChanged {
        pool,
        liquidityProvider: Address::ZERO,
        totalSupply: U256::ZERO,
        deltas: deltas.iter().map(|d| I256::try_from(*d).unwrap()).collect(),
        swapFeeAmountsRaw: vec![U256::ZERO; deltas.len()],
    };
    Log {
        address: VAULT,
        data: event.encode_log_data(),
    }
}

pub fn swap_log(pool: Address, token_in: Address, token_out: Address, amount_in: U256, amount_out: U256) -> Log {
    let event = Swap {
        pool,
        tokenIn: token_in,
        tokenOut: token_out,
        amountIn: amount_in,
        amountOut: amount_out,
        swapFeePercentage: U256::ZERO,
        swapFeeAmount: U256::ZERO,
    };
    Log {
        address: VAULT,
        data: event.encode_log_data(),
    }
}

pub fn pause_log(pool: Address, paused: bool) -> Log {
    Log {
        address: VAULT,
        data: PoolPausedStateChanged { pool, paused }.encode_log_data(),
    }
}

pub fn block_hash(number: u64, fork: u8) -> B256 {
    let mut bytes = [fork; 32];
    bytes[24..].copy_from_slice(&number.to_be_bytes());
    B256::from(bytes)
}

pub fn block(number: u64, logs: Vec<Log>) -> BlockLogs {
    BlockLogs {
        number,
        timestamp: 1_700_000_000 + number * 12,
        hash: block_hash(number, 0),
        parent_hash: block_hash(number - 1, 0),
        logs,
    }
}

/// Scripted [`BlockFeed`]: each poll pops the next batch of blocks.
#[derive(Default)]
pub struct ScriptedFeed {
    pub polls: Mutex<Vec<(u64, Vec<BlockLogs>)>>,
}

impl ScriptedFeed {
    pub fn new(mut polls: Vec<(u64, Vec<BlockLogs>)>) -> Self {
        polls.reverse();
        Self {
            polls: Mutex::new(polls),
        }
    }
}

#[async_trait]
impl BlockFeed for ScriptedFeed {
    async fn latest_block(&self) -> SyncResult<u64> {
        let polls = self.polls.lock().unwrap();
        Ok(polls.last().map_or(0, |(head, _)| *head))
    }

    async fn blocks(&self, from: u64, to: u64) -> SyncResult<Vec<BlockLogs>> {
        let (_, blocks) = self.polls.lock().unwrap().pop().unwrap_or_default();
        Ok(blocks
            .into_iter()
            .filter(|b| b.number >= from && b.number <= to)
            .collect())
    }
}
