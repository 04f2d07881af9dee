//! Parent-hash continuity checks over delivered block headers.

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Header fields needed to verify chain linkage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Block number
    pub number: u64,

    /// Block hash
    pub hash: B256,

    /// Parent block hash
    pub parent_hash: B256,

    /// Block timestamp (Unix epoch seconds)
    pub timestamp: u64,
}

impl BlockRecord {
    /// Create a block record.
    #[must_use]
    pub const fn new(number: u64, hash: B256, parent_hash: B256, timestamp: u64) -> Self {
        Self {
            number,
            hash,
            parent_hash,
            timestamp,
        }
    }
}

/// How a delivered block relates to the last accepted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainEvent {
    /// First block seen.
    First,
    /// Direct child of the last accepted block.
    Continuous,
    /// Blocks between the last accepted one and this one were skipped.
    Gap {
        /// Block number that was expected next.
        expected: u64,
        /// Block number delivered.
        got: u64,
    },
    /// Parent hash does not match the last accepted block.
    Reorg {
        /// Block whose parent did not link.
        at: u64,
        /// Hash previously accepted at `at - 1`.
        expected_parent: B256,
        /// Parent hash the new block carries.
        got_parent: B256,
    },
    /// Block at or below the last accepted one with the hash already seen.
    Stale,
}

impl ChainEvent {
    /// Whether the engine must regenerate before trusting incremental state.
    #[must_use]
    pub const fn requires_resync(&self) -> bool {
        matches!(self, Self::Gap { .. } | Self::Reorg { .. })
    }
}

/// Tracks the last accepted header and classifies each new one.
///
/// Every classification except [`ChainEvent::Stale`] moves the tip to the
/// observed block, so the caller resyncs from it and then continues.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReorgDetector {
    /// Last accepted block
    last_block: Option<BlockRecord>,

    /// Reorgs observed so far
    reorg_count: u64,

    /// Gaps observed so far
    gap_count: u64,
}

impl ReorgDetector {
    /// Detector with no accepted block.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_block: None,
            reorg_count: 0,
            gap_count: 0,
        }
    }

    /// Detector anchored at `block`.
    #[must_use]
    pub const fn with_block(block: BlockRecord) -> Self {
        Self {
            last_block: Some(block),
            reorg_count: 0,
            gap_count: 0,
        }
    }

    /// Last accepted block.
    #[must_use]
    pub const fn last_block(&self) -> Option<&BlockRecord> {
        self.last_block.as_ref()
    }

    /// Reorgs observed.
    #[must_use]
    pub const fn reorg_count(&self) -> u64 {
        self.reorg_count
    }

    /// Gaps observed.
    #[must_use]
    pub const fn gap_count(&self) -> u64 {
        self.gap_count
    }

    /// Classify `block` against the last accepted block and accept it.
    pub fn observe(&mut self, block: &BlockRecord) -> ChainEvent {
        let Some(last) = self.last_block else {
            debug!(block = block.number, "First block observed");
            self.last_block = Some(*block);
            return ChainEvent::First;
        };

        let event = if block.number <= last.number {
            if block.number == last.number && block.hash != last.hash {
                // Same height, different block: the tip was replaced
                ChainEvent::Reorg {
                    at: block.number,
                    expected_parent: last.parent_hash,
                    got_parent: block.parent_hash,
                }
            } else {
                return ChainEvent::Stale;
            }
        } else if block.number > last.number + 1 {
            ChainEvent::Gap {
                expected: last.number + 1,
                got: block.number,
            }
        } else if block.parent_hash == last.hash {
            ChainEvent::Continuous
        } else {
            ChainEvent::Reorg {
                at: block.number,
                expected_parent: last.hash,
                got_parent: block.parent_hash,
            }
        };

        match event {
            ChainEvent::Gap { expected, got } => {
                self.gap_count += 1;
                warn!(expected, got, "Block gap detected");
            }
            ChainEvent::Reorg {
                at,
                expected_parent,
                got_parent,
            } => {
                self.reorg_count += 1;
                warn!(block = at, %expected_parent, %got_parent, "REORG DETECTED: parent hash mismatch");
            }
            _ => debug!(block = block.number, "Chain continuous"),
        }

        self.last_block = Some(*block);
        event
    }
}
