//! Block-ordered log delivery.
//!
//! A [`BlockFeed`] hands the synchronizer one [`BlockLogs`] per block, in
//! ascending block order, with the logs of each block in log-index order.
//! Blocks without tracked logs are still delivered so the continuity check
//! sees every header.

use std::collections::BTreeMap;

use alloy::primitives::{Address, Log as PrimitiveLog, B256};
use alloy::providers::Provider as _;
use alloy::rpc::types::{BlockTransactionsKind, Log};
use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, instrument, warn};

use super::http::{get_latest_block, Provider};
use crate::applier::BlockContext;
use crate::error::{SyncError, SyncResult};
use crate::events::create_tracked_filter;
use crate::reorg::BlockRecord;

/// Default number of blocks per `eth_getLogs` request.
pub const DEFAULT_BATCH_SIZE: u64 = 500;

/// Header and tracked logs of one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLogs {
    /// Block number.
    pub number: u64,
    /// Block timestamp (Unix seconds).
    pub timestamp: u64,
    /// Block hash.
    pub hash: B256,
    /// Parent block hash.
    pub parent_hash: B256,
    /// Logs emitted by tracked addresses, in log-index order.
    pub logs: Vec<PrimitiveLog>,
}

impl BlockLogs {
    /// Context handed to the state applier.
    #[must_use]
    pub const fn context(&self) -> BlockContext {
        BlockContext::new(self.number, self.timestamp)
    }

    /// Header summary for the continuity check.
    #[must_use]
    pub const fn record(&self) -> BlockRecord {
        BlockRecord::new(self.number, self.hash, self.parent_hash, self.timestamp)
    }
}

/// Source of ordered block logs.
#[async_trait]
pub trait BlockFeed: Send + Sync {
    /// Current head block number.
    async fn latest_block(&self) -> SyncResult<u64>;

    /// Every block in `from..=to` with its tracked logs, ascending.
    async fn blocks(&self, from: u64, to: u64) -> SyncResult<Vec<BlockLogs>>;
}

/// [`BlockFeed`] polling a JSON-RPC node.
#[derive(Debug, Clone)]
pub struct RpcBlockFeed {
    provider: Provider,
    addresses: Vec<Address>,
    batch_size: u64,
}

impl RpcBlockFeed {
    /// Feed of logs emitted by `addresses`.
    #[must_use]
    pub fn new(provider: Provider, addresses: Vec<Address>, batch_size: u64) -> Self {
        Self {
            provider,
            addresses,
            batch_size: batch_size.max(1),
        }
    }

    async fn fetch_logs(&self, from: u64, to: u64) -> SyncResult<Vec<Log>> {
        let filter = create_tracked_filter(self.addresses.clone(), from, to);
        let logs = self.provider.get_logs(&filter).await.map_err(|e| {
            SyncError::rpc(
                format!("Failed to fetch logs for blocks {from}..={to}"),
                Some(Box::new(e)),
            )
        })?;
        debug!(from, to, count = logs.len(), "Fetched logs");
        Ok(logs)
    }

    async fn fetch_header(&self, number: u64) -> SyncResult<(u64, B256, B256)> {
        let block = self
            .provider
            .get_block_by_number(number.into(), BlockTransactionsKind::Hashes)
            .await
            .map_err(|e| SyncError::rpc(format!("Failed to fetch block {number}"), Some(Box::new(e))))?
            .ok_or_else(|| SyncError::rpc(format!("Block {number} not found"), None))?;
        Ok((
            block.header.timestamp,
            block.header.hash,
            block.header.parent_hash,
        ))
    }
}

/// Group RPC logs by block, ordered by log index, dropping removed logs.
///
/// # Errors
///
/// Returns a decoding error if a log lacks its block number or log index.
pub fn group_by_block(logs: Vec<Log>) -> SyncResult<BTreeMap<u64, Vec<PrimitiveLog>>> {
    let mut indexed: BTreeMap<u64, Vec<(u64, PrimitiveLog)>> = BTreeMap::new();

    for log in logs {
        if log.removed {
            warn!(tx = ?log.transaction_hash, "Skipping removed log");
            continue;
        }
        let block = log
            .block_number
            .ok_or_else(|| SyncError::decoding("Log missing block number", None))?;
        let index = log
            .log_index
            .ok_or_else(|| SyncError::decoding("Log missing log index", None))?;
        indexed.entry(block).or_default().push((index, log.inner));
    }

    Ok(indexed
        .into_iter()
        .map(|(block, mut logs)| {
            logs.sort_by_key(|(index, _)| *index);
            (block, logs.into_iter().map(|(_, log)| log).collect())
        })
        .collect())
}

#[async_trait]
impl BlockFeed for RpcBlockFeed {
    async fn latest_block(&self) -> SyncResult<u64> {
        get_latest_block(&self.provider).await
    }

    #[instrument(skip(self), fields(addresses = self.addresses.len()))]
    async fn blocks(&self, from: u64, to: u64) -> SyncResult<Vec<BlockLogs>> {
        if from > to {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        let mut start = from;
        while start <= to {
            let end = start.saturating_add(self.batch_size - 1).min(to);

            let mut grouped = group_by_block(self.fetch_logs(start, end).await?)?;
            let headers = join_all((start..=end).map(|n| self.fetch_header(n))).await;

            for (number, header) in (start..=end).zip(headers) {
                let (timestamp, hash, parent_hash) = header?;
                out.push(BlockLogs {
                    number,
                    timestamp,
                    hash,
                    parent_hash,
                    logs: grouped.remove(&number).unwrap_or_default(),
                });
            }

            if end == u64::MAX {
                break;
            }
            start = end + 1;
        }

        debug!(from, to, blocks = out.len(), "Block range assembled");
        Ok(out)
    }
}
