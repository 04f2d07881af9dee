//! Block-pinned contract reads backing regeneration.
//!
//! Every call is issued with an explicit block tag so a regeneration at block
//! `B` never mixes values from different blocks.

use alloy::primitives::{Address, U256};
use alloy::sol;
use async_trait::async_trait;
use tracing::{debug, instrument};

use super::http::Provider;
use crate::error::{SyncError, SyncResult};
use crate::regen::{PoolReading, SavingsReading, SavingsSource, StateReader};
use crate::snapshot::{AmpRamp, PoolToken, RateSymbol, AMP_PRECISION};

sol! {
    #[sol(rpc)]
    interface IVaultReads {
        struct LiquidityManagement {
            bool disableUnbalancedLiquidity;
            bool enableAddLiquidityCustom;
            bool enableRemoveLiquidityCustom;
            bool enableDonation;
        }

        struct PoolConfig {
            LiquidityManagement liquidityManagement;
            uint256 staticSwapFeePercentage;
            uint256 aggregateSwapFeePercentage;
            uint256 aggregateYieldFeePercentage;
            uint40 tokenDecimalDiffs;
            uint32 pauseWindowEndTime;
            bool isPoolRegistered;
            bool isPoolInitialized;
            bool isPoolPaused;
            bool isPoolInRecoveryMode;
        }

        struct HooksConfig {
            bool enableHookAdjustedAmounts;
            bool shouldCallBeforeInitialize;
            bool shouldCallAfterInitialize;
            bool shouldCallComputeDynamicSwapFee;
            bool shouldCallBeforeSwap;
            bool shouldCallAfterSwap;
            bool shouldCallBeforeAddLiquidity;
            bool shouldCallAfterAddLiquidity;
            bool shouldCallBeforeRemoveLiquidity;
            bool shouldCallAfterRemoveLiquidity;
            address hooksContract;
        }

        struct TokenInfo {
            uint8 tokenType;
            address rateProvider;
            bool paysYieldFees;
        }

        function getPoolConfig(address pool) external view returns (PoolConfig memory);
        function getHooksConfig(address pool) external view returns (HooksConfig memory);
        function getPoolTokenInfo(address pool) external view returns (
            address[] memory tokens,
            TokenInfo[] memory tokenInfo,
            uint256[] memory balancesRaw,
            uint256[] memory lastBalancesLiveScaled18
        );
        function getCurrentLiveBalances(address pool) external view returns (uint256[] memory balancesLiveScaled18);
    }
}

sol! {
    #[sol(rpc)]
    interface IStablePoolReads {
        struct AmplificationState {
            uint64 startValue;
            uint64 endValue;
            uint32 startTime;
            uint32 endTime;
        }

        function getAmplificationState() external view returns (AmplificationState memory amplificationState, uint256 precision);
    }
}

sol! {
    #[sol(rpc)]
    interface ISavingsReads {
        function chi() external view returns (uint256);
        function rho() external view returns (uint256);
        function dsr() external view returns (uint256);
        function ssr() external view returns (uint256);
    }
}

/// One 5-bit slot of the vault's packed decimal diffs.
const DECIMAL_DIFF_MASK: u64 = 0x1F;

/// Decimals of token `index` from the vault's packed `tokenDecimalDiffs`.
///
/// # Errors
///
/// Returns a decoding error if the diff exceeds 18.
pub fn decimals_from_diffs(diffs: u64, index: usize) -> SyncResult<u8> {
    let shift = 5 * u32::try_from(index)
        .map_err(|_| SyncError::decoding(format!("Token index {index} out of range"), None))?;
    let diff = diffs.checked_shr(shift).unwrap_or(0) & DECIMAL_DIFF_MASK;
    18u8.checked_sub(u8::try_from(diff).unwrap_or(u8::MAX))
        .ok_or_else(|| SyncError::decoding(format!("Decimal diff {diff} exceeds 18"), None))
}

/// [`StateReader`] over a JSON-RPC provider.
#[derive(Debug, Clone)]
pub struct RpcStateReader {
    provider: Provider,
    vault: Address,
}

impl RpcStateReader {
    /// Reader for pools registered in `vault`.
    #[must_use]
    pub const fn new(provider: Provider, vault: Address) -> Self {
        Self { provider, vault }
    }

    /// Vault the pools are registered in.
    #[must_use]
    pub const fn vault(&self) -> Address {
        self.vault
    }
}

fn call_error(
    what: &str,
    target: Address,
    block: u64,
    e: impl std::error::Error + Send + Sync + 'static,
) -> SyncError {
    SyncError::rpc(
        format!("{what} failed for {target} at block {block}"),
        Some(Box::new(e)),
    )
}

fn to_u64(value: U256, what: &str) -> SyncResult<u64> {
    u64::try_from(value)
        .map_err(|_| SyncError::decoding(format!("{what} does not fit in u64: {value}"), None))
}

#[async_trait]
impl StateReader for RpcStateReader {
    #[instrument(skip(self, source), fields(rate_source = %source.rate_source))]
    async fn read_savings(&self, source: &SavingsSource, block: u64) -> SyncResult<SavingsReading> {
        let contract = ISavingsReads::new(source.rate_source, self.provider.clone());

        let chi = contract
            .chi()
            .block(block.into())
            .call()
            .await
            .map_err(|e| call_error("chi()", source.rate_source, block, e))?
            ._0;
        let rho = contract
            .rho()
            .block(block.into())
            .call()
            .await
            .map_err(|e| call_error("rho()", source.rate_source, block, e))?
            ._0;
        let rate = match source.rate_symbol {
            RateSymbol::Dsr => {
                contract
                    .dsr()
                    .block(block.into())
                    .call()
                    .await
                    .map_err(|e| call_error("dsr()", source.rate_source, block, e))?
                    ._0
            }
            RateSymbol::Ssr => {
                contract
                    .ssr()
                    .block(block.into())
                    .call()
                    .await
                    .map_err(|e| call_error("ssr()", source.rate_source, block, e))?
                    ._0
            }
        };

        debug!(%chi, %rho, %rate, block, "Savings vault read");
        Ok(SavingsReading {
            chi,
            rho: to_u64(rho, "rho")?,
            rate,
        })
    }

    #[instrument(skip(self), fields(vault = %self.vault))]
    async fn read_pool(&self, pool: Address, block: u64) -> SyncResult<PoolReading> {
        let vault = IVaultReads::new(self.vault, self.provider.clone());

        let config = vault
            .getPoolConfig(pool)
            .block(block.into())
            .call()
            .await
            .map_err(|e| call_error("getPoolConfig()", pool, block, e))?
            ._0;
        let hooks = vault
            .getHooksConfig(pool)
            .block(block.into())
            .call()
            .await
            .map_err(|e| call_error("getHooksConfig()", pool, block, e))?
            ._0;
        let IVaultReads::getPoolTokenInfoReturn {
            tokens,
            tokenInfo: token_info,
            ..
        } = vault
            .getPoolTokenInfo(pool)
            .block(block.into())
            .call()
            .await
            .map_err(|e| call_error("getPoolTokenInfo()", pool, block, e))?;
        let balances = vault
            .getCurrentLiveBalances(pool)
            .block(block.into())
            .call()
            .await
            .map_err(|e| call_error("getCurrentLiveBalances()", pool, block, e))?
            .balancesLiveScaled18;

        let amp_state = IStablePoolReads::new(pool, self.provider.clone())
            .getAmplificationState()
            .block(block.into())
            .call()
            .await
            .map_err(|e| call_error("getAmplificationState()", pool, block, e))?;

        if amp_state.precision != U256::from(AMP_PRECISION) {
            return Err(SyncError::decoding(
                format!("Unexpected amplification precision {}", amp_state.precision),
                None,
            ));
        }

        let diffs: u64 = config.tokenDecimalDiffs.to();
        let tokens = tokens
            .iter()
            .enumerate()
            .map(|(i, address)| {
                Ok(PoolToken {
                    address: *address,
                    decimals: decimals_from_diffs(diffs, i)?,
                })
            })
            .collect::<SyncResult<Vec<_>>>()?;

        let amp = amp_state.amplificationState;
        let reading = PoolReading {
            tokens,
            balances_live_scaled18: balances,
            swap_fee: config.staticSwapFeePercentage,
            aggregate_swap_fee: config.aggregateSwapFeePercentage,
            amp: AmpRamp {
                start_value: amp.startValue,
                end_value: amp.endValue,
                start_time: u64::from(amp.startTime),
                end_time: u64::from(amp.endTime),
            },
            paused: config.isPoolPaused,
            initialized: config.isPoolInitialized,
            has_hooks: hooks.hooksContract != Address::ZERO,
            has_rate_tokens: token_info.iter().any(|info| info.tokenType != 0),
        };

        debug!(
            %pool,
            block,
            tokens = reading.tokens.len(),
            paused = reading.paused,
            "Pool read"
        );
        Ok(reading)
    }
}
