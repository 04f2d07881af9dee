//! Log decoding for savings vaults, the pool vault and stable pools.
//!
//! Event signatures are generated with Alloy's `sol!` macro so topic hashes
//! and ABI layouts are checked at compile time. Decoded logs are mapped onto
//! the closed [`TrackedEvent`] enum; the event applier matches on it
//! exhaustively.
//!
//! ## Emitters
//!
//! | Emitter                  | Events                                              | Entity          |
//! |--------------------------|-----------------------------------------------------|-----------------|
//! | savings vault, `ssr`     | `Drip`, `File`                                      | emitter         |
//! | savings vault, `dsr`     | anonymous `LogNote` for `drip()` / `file(bytes32,uint256)` | emitter  |
//! | pool vault               | `PoolBalanceChanged`, `Swap`, pause and fee changes | indexed `pool`  |
//! | any other address        | `AmpUpdateStarted`, `AmpUpdateStopped`              | emitter         |
//!
//! ## Failure policy
//!
//! [`LogDecoder::decode`] never fails: a log whose signature is unknown yields
//! `None`, and a log whose signature matches but whose payload is malformed is
//! logged at `warn` and also yields `None`, so one bad log cannot halt the
//! synchronizer.
//!
//! ## Example
//!
//! ```
//! use alloy::primitives::{address, Log, LogData, U256};
//! use alloy::sol_types::SolEvent;
//! use dex_state_sync::events::{LogDecoder, PoolPausedStateChanged, TrackedEvent};
//!
//! let vault = address!("bA1333333333a1BA1108E8412f11850A5C319bA9");
//! let pool = address!("00000000000000000000000000000000000000aa");
//! let decoder = LogDecoder::new(Some(vault), []);
//!
//! let event = PoolPausedStateChanged { pool, paused: true };
//! let log = Log { address: vault, data: event.encode_log_data() };
//!
//! let decoded = decoder.decode(&log).unwrap();
//! assert_eq!(decoded.entity, pool);
//! assert_eq!(decoded.event, TrackedEvent::PausedStateChanged { paused: true });
//! ```

use alloy::primitives::{Address, Log, B256, I256, U256};
use alloy::rpc::types::Filter;
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};
use std::collections::HashMap;
use tracing::{trace, warn};

use crate::error::{SyncError, SyncResult};
use crate::snapshot::RateSymbol;

sol! {
    /// Events of an `sUSDS`-style savings vault.
    interface ISavingsVaultEvents {
        /// Accumulator updated to `chi` at the current block timestamp.
        event Drip(uint256 chi, uint256 diff);
        /// Governance changed parameter `what` to `data`.
        event File(bytes32 indexed what, uint256 data);
    }

    /// Calls of a Maker `Pot`, whose `LogNote` topic0 carries the selector.
    interface IPotNotes {
        function drip() external returns (uint256 tmp);
        function file(bytes32 what, uint256 data) external;
    }

    /// Events of the pool vault.
    interface IVaultEvents {
        event PoolBalanceChanged(
            address indexed pool,
            address indexed liquidityProvider,
            uint256 totalSupply,
            int256[] deltas,
            uint256[] swapFeeAmountsRaw
        );
        event Swap(
            address indexed pool,
            address indexed tokenIn,
            address indexed tokenOut,
            uint256 amountIn,
            uint256 amountOut,
            uint256 swapFeePercentage,
            uint256 swapFeeAmount
        );
        event PoolPausedStateChanged(address indexed pool, bool paused);
        event SwapFeePercentageChanged(address indexed pool, uint256 swapFeePercentage);
        event AggregateSwapFeePercentageChanged(address indexed pool, uint256 aggregateSwapFeePercentage);
    }

    /// Events emitted by a stable pool itself.
    interface IStablePoolEvents {
        event AmpUpdateStarted(uint256 startValue, uint256 endValue, uint256 startTime, uint256 endTime);
        event AmpUpdateStopped(uint256 currentValue);
    }
}

pub use ISavingsVaultEvents::{Drip, File};
pub use IStablePoolEvents::{AmpUpdateStarted, AmpUpdateStopped};
pub use IVaultEvents::{
    AggregateSwapFeePercentageChanged, PoolBalanceChanged, PoolPausedStateChanged, Swap,
    SwapFeePercentageChanged,
};

/// A decoded event, independent of the emitter's ABI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackedEvent {
    /// Savings accumulator dripped at the block timestamp. `chi` is `None`
    /// when the emitter does not publish the new value and it must be
    /// recomputed from the previous accumulator.
    Drip {
        /// New accumulator, when published.
        chi: Option<U256>,
    },
    /// A savings vault parameter was filed.
    RateFiled {
        /// Parameter name as `bytes32`.
        what: B256,
        /// New value.
        rate: U256,
    },
    /// Liquidity was added or removed; signed raw per-token deltas.
    PoolBalanceChanged {
        /// Raw token balance deltas in registration order.
        deltas: Vec<I256>,
    },
    /// A swap moved raw amounts through the pool.
    Swap {
        /// Token paid into the pool.
        token_in: Address,
        /// Token paid out of the pool.
        token_out: Address,
        /// Raw amount in, fees included.
        amount_in: U256,
        /// Raw amount out.
        amount_out: U256,
        /// Raw swap fee charged in `token_in`.
        swap_fee_amount: U256,
    },
    /// Pool paused or unpaused.
    PausedStateChanged {
        /// New paused state.
        paused: bool,
    },
    /// Static swap fee changed.
    SwapFeeChanged {
        /// New fee percentage, wad scaled.
        swap_fee: U256,
    },
    /// Protocol share of the swap fee changed.
    AggregateSwapFeeChanged {
        /// New aggregate fee percentage, wad scaled.
        aggregate_swap_fee: U256,
    },
    /// Amplification ramp started.
    AmpUpdateStarted {
        /// Amp at `start_time`, with precision.
        start_value: u64,
        /// Amp at `end_time`, with precision.
        end_value: u64,
        /// Ramp start.
        start_time: u64,
        /// Ramp end.
        end_time: u64,
    },
    /// Amplification ramp stopped at `current_value`.
    AmpUpdateStopped {
        /// Amp frozen at this value, with precision.
        current_value: u64,
    },
}

impl TrackedEvent {
    /// Event name for logs and statistics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Drip { .. } => "Drip",
            Self::RateFiled { .. } => "RateFiled",
            Self::PoolBalanceChanged { .. } => "PoolBalanceChanged",
            Self::Swap { .. } => "Swap",
            Self::PausedStateChanged { .. } => "PausedStateChanged",
            Self::SwapFeeChanged { .. } => "SwapFeeChanged",
            Self::AggregateSwapFeeChanged { .. } => "AggregateSwapFeeChanged",
            Self::AmpUpdateStarted { .. } => "AmpUpdateStarted",
            Self::AmpUpdateStopped { .. } => "AmpUpdateStopped",
        }
    }
}

/// A decoded event together with the entity it addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLog {
    /// Entity the event applies to.
    pub entity: Address,
    /// Decoded event.
    pub event: TrackedEvent,
}

/// Stateless mapping from raw logs to [`DecodedLog`]s.
#[derive(Debug, Clone, Default)]
pub struct LogDecoder {
    vault: Option<Address>,
    savings: HashMap<Address, RateSymbol>,
}

impl LogDecoder {
    /// Create a decoder for the given pool vault and savings vaults.
    ///
    /// Savings vaults filing `dsr` are decoded as Maker `Pot` notes, vaults
    /// filing `ssr` through their typed `Drip`/`File` events.
    #[must_use]
    pub fn new(
        vault: Option<Address>,
        savings: impl IntoIterator<Item = (Address, RateSymbol)>,
    ) -> Self {
        Self {
            vault,
            savings: savings.into_iter().collect(),
        }
    }

    /// Decode `log`, returning `None` for unknown or malformed logs.
    #[must_use]
    pub fn decode(&self, log: &Log) -> Option<DecodedLog> {
        match self.try_decode(log) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(emitter = %log.address, error = %e, "Skipping malformed log");
                None
            }
        }
    }

    /// Decode `log`, distinguishing "no match" (`Ok(None)`) from malformed
    /// payloads (`Err`).
    ///
    /// # Errors
    ///
    /// Returns a decoding error when the signature matches a known event but
    /// the topics or data cannot be decoded.
    pub fn try_decode(&self, log: &Log) -> SyncResult<Option<DecodedLog>> {
        let Some(topic0) = log.topics().first().copied() else {
            trace!(emitter = %log.address, "Log without topics");
            return Ok(None);
        };

        let event = if let Some(symbol) = self.savings.get(&log.address) {
            match symbol {
                RateSymbol::Dsr => decode_pot_note(log, topic0)?,
                RateSymbol::Ssr => decode_savings_event(log, topic0)?,
            }
            .map(|event| DecodedLog {
                entity: log.address,
                event,
            })
        } else if Some(log.address) == self.vault {
            decode_vault_event(log, topic0)?
        } else {
            decode_pool_event(log, topic0)?.map(|event| DecodedLog {
                entity: log.address,
                event,
            })
        };

        Ok(event)
    }
}

fn malformed(name: &str, e: impl std::error::Error + Send + Sync + 'static) -> SyncError {
    SyncError::decoding(format!("failed to decode {name} log"), Some(Box::new(e)))
}

fn to_u64(name: &str, value: U256) -> SyncResult<u64> {
    u64::try_from(value)
        .map_err(|_| SyncError::decoding(format!("{name} value {value} does not fit in u64"), None))
}

fn decode_pot_note(log: &Log, topic0: B256) -> SyncResult<Option<TrackedEvent>> {
    let selector = &topic0[..4];

    if selector == IPotNotes::dripCall::SELECTOR.as_slice() {
        return Ok(Some(TrackedEvent::Drip { chi: None }));
    }

    if selector == IPotNotes::fileCall::SELECTOR.as_slice() {
        let topics = log.topics();
        if topics.len() < 4 {
            return Err(SyncError::decoding(
                format!("file note carries {} topics, expected 4", topics.len()),
                None,
            ));
        }
        return Ok(Some(TrackedEvent::RateFiled {
            what: topics[2],
            rate: U256::from_be_bytes(topics[3].0),
        }));
    }

    Ok(None)
}

fn decode_savings_event(log: &Log, topic0: B256) -> SyncResult<Option<TrackedEvent>> {
    let event = match topic0 {
        Drip::SIGNATURE_HASH => {
            let drip = Drip::decode_log_data(&log.data, true).map_err(|e| malformed("Drip", e))?;
            TrackedEvent::Drip {
                chi: Some(drip.chi),
            }
        }
        File::SIGNATURE_HASH => {
            let file = File::decode_log_data(&log.data, true).map_err(|e| malformed("File", e))?;
            TrackedEvent::RateFiled {
                what: file.what,
                rate: file.data,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn decode_vault_event(log: &Log, topic0: B256) -> SyncResult<Option<DecodedLog>> {
    let decoded = match topic0 {
        PoolBalanceChanged::SIGNATURE_HASH => {
            let e = PoolBalanceChanged::decode_log_data(&log.data, true)
                .map_err(|e| malformed("PoolBalanceChanged", e))?;
            DecodedLog {
                entity: e.pool,
                event: TrackedEvent::PoolBalanceChanged { deltas: e.deltas },
            }
        }
        Swap::SIGNATURE_HASH => {
            let e = Swap::decode_log_data(&log.data, true).map_err(|e| malformed("Swap", e))?;
            DecodedLog {
                entity: e.pool,
                event: TrackedEvent::Swap {
                    token_in: e.tokenIn,
                    token_out: e.tokenOut,
                    amount_in: e.amountIn,
                    amount_out: e.amountOut,
                    swap_fee_amount: e.swapFeeAmount,
                },
            }
        }
        PoolPausedStateChanged::SIGNATURE_HASH => {
            let e = PoolPausedStateChanged::decode_log_data(&log.data, true)
                .map_err(|e| malformed("PoolPausedStateChanged", e))?;
            DecodedLog {
                entity: e.pool,
                event: TrackedEvent::PausedStateChanged { paused: e.paused },
            }
        }
        SwapFeePercentageChanged::SIGNATURE_HASH => {
            let e = SwapFeePercentageChanged::decode_log_data(&log.data, true)
                .map_err(|e| malformed("SwapFeePercentageChanged", e))?;
            DecodedLog {
                entity: e.pool,
                event: TrackedEvent::SwapFeeChanged {
                    swap_fee: e.swapFeePercentage,
                },
            }
        }
        AggregateSwapFeePercentageChanged::SIGNATURE_HASH => {
            let e = AggregateSwapFeePercentageChanged::decode_log_data(&log.data, true)
                .map_err(|e| malformed("AggregateSwapFeePercentageChanged", e))?;
            DecodedLog {
                entity: e.pool,
                event: TrackedEvent::AggregateSwapFeeChanged {
                    aggregate_swap_fee: e.aggregateSwapFeePercentage,
                },
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(decoded))
}

fn decode_pool_event(log: &Log, topic0: B256) -> SyncResult<Option<TrackedEvent>> {
    let event = match topic0 {
        AmpUpdateStarted::SIGNATURE_HASH => {
            let e = AmpUpdateStarted::decode_log_data(&log.data, true)
                .map_err(|e| malformed("AmpUpdateStarted", e))?;
            TrackedEvent::AmpUpdateStarted {
                start_value: to_u64("startValue", e.startValue)?,
                end_value: to_u64("endValue", e.endValue)?,
                start_time: to_u64("startTime", e.startTime)?,
                end_time: to_u64("endTime", e.endTime)?,
            }
        }
        AmpUpdateStopped::SIGNATURE_HASH => {
            let e = AmpUpdateStopped::decode_log_data(&log.data, true)
                .map_err(|e| malformed("AmpUpdateStopped", e))?;
            TrackedEvent::AmpUpdateStopped {
                current_value: to_u64("currentValue", e.currentValue)?,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

/// Filter for every log emitted by `addresses` in `[from_block, to_block]`.
#[must_use]
pub fn create_tracked_filter(addresses: Vec<Address>, from_block: u64, to_block: u64) -> Filter {
    Filter::new()
        .address(addresses)
        .from_block(from_block)
        .to_block(to_block)
}
