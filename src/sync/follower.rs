//! Drives a [`StateSynchronizer`] from a [`BlockFeed`].
//!
//! Each poll fetches every block after the last processed one, checks header
//! continuity and either applies the block's logs or regenerates at that
//! block. Periodic and invariant-triggered resyncs run between blocks. A
//! reorg drops the retained history entirely, since only the tip header is
//! tracked and the fork point is unknown.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::retry::{retry_with_backoff, RetryPolicy};
use super::StateSynchronizer;
use crate::error::{SyncError, SyncResult};
use crate::regen::StateReader;
use crate::reorg::{ChainEvent, ReorgDetector};
use crate::rpc::feed::BlockFeed;

/// Why a resync ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResyncCause {
    /// Blocks were skipped.
    Gap,
    /// Parent hash did not link.
    Reorg,
    /// Configured interval elapsed.
    Periodic,
    /// Invariant violations flagged entities.
    Flagged,
    /// A previous resync failed and is being retried at the head.
    Recovery,
}

/// What one poll did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollOutcome {
    /// Head block seen by the poll.
    pub head: u64,
    /// Blocks whose logs were applied.
    pub blocks_applied: u64,
    /// Logs handed to the synchronizer.
    pub logs_applied: u64,
    /// Resyncs run, with the block each was pinned to.
    pub resyncs: Vec<(u64, ResyncCause)>,
}

/// Incremental follower of one chain.
#[derive(Debug)]
pub struct ChainFollower<F, R> {
    feed: F,
    sync: Arc<StateSynchronizer<R>>,
    detector: ReorgDetector,
    next_block: u64,
    last_resync: u64,
    resync_interval: Option<u64>,
    retry: RetryPolicy,
    recovering: bool,
}

impl<F: BlockFeed, R: StateReader> ChainFollower<F, R> {
    /// Follower continuing after `initialized_at`, the block the
    /// synchronizer was initialized at.
    pub fn new(
        feed: F,
        sync: Arc<StateSynchronizer<R>>,
        initialized_at: u64,
        resync_interval: Option<u64>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            feed,
            sync,
            detector: ReorgDetector::new(),
            next_block: initialized_at.saturating_add(1),
            last_resync: initialized_at,
            resync_interval: resync_interval.filter(|n| *n > 0),
            retry,
            recovering: false,
        }
    }

    /// Next block the follower will process.
    pub const fn next_block(&self) -> u64 {
        self.next_block
    }

    /// Continuity tracker.
    pub const fn detector(&self) -> &ReorgDetector {
        &self.detector
    }

    /// Synchronizer being driven.
    pub fn synchronizer(&self) -> &Arc<StateSynchronizer<R>> {
        &self.sync
    }

    /// Process every block up to the current head.
    ///
    /// # Errors
    ///
    /// Returns feed errors, and regeneration errors once retries are
    /// exhausted. After a failed resync the next poll regenerates at the head
    /// before applying anything.
    #[instrument(skip(self), fields(next_block = self.next_block))]
    pub async fn poll(&mut self) -> SyncResult<PollOutcome> {
        let head = self.feed.latest_block().await?;
        let mut outcome = PollOutcome {
            head,
            ..PollOutcome::default()
        };

        if self.recovering {
            self.resync_at(head, ResyncCause::Recovery, &mut outcome).await?;
            self.detector = ReorgDetector::new();
            self.next_block = head.saturating_add(1);
            return Ok(outcome);
        }

        if head < self.next_block {
            debug!(head, next = self.next_block, "No new blocks");
            return Ok(outcome);
        }

        for block in self.feed.blocks(self.next_block, head).await? {
            let event = match self.detector.observe(&block.record()) {
                // Nothing to link against yet, but blocks after the start were skipped
                ChainEvent::First if block.number > self.next_block => ChainEvent::Gap {
                    expected: self.next_block,
                    got: block.number,
                },
                event => event,
            };
            match event {
                ChainEvent::Stale => {
                    debug!(block = block.number, "Skipping stale block");
                    continue;
                }
                ChainEvent::Gap { .. } => {
                    self.next_block = block.number.saturating_add(1);
                    self.resync_at(block.number, ResyncCause::Gap, &mut outcome).await?;
                    continue;
                }
                ChainEvent::Reorg { .. } => {
                    self.next_block = block.number.saturating_add(1);
                    self.resync_at(block.number, ResyncCause::Reorg, &mut outcome).await?;
                    continue;
                }
                ChainEvent::First | ChainEvent::Continuous => {}
            }

            self.sync.on_block_logs(block.context(), &block.logs);
            self.next_block = block.number.saturating_add(1);
            outcome.blocks_applied += 1;
            outcome.logs_applied += block.logs.len() as u64;

            if self
                .resync_interval
                .is_some_and(|n| block.number.saturating_sub(self.last_resync) >= n)
            {
                self.resync_at(block.number, ResyncCause::Periodic, &mut outcome).await?;
            } else if !self.sync.flagged_for_resync().is_empty() {
                self.resync_flagged_at(block.number, &mut outcome).await?;
            }
        }

        Ok(outcome)
    }

    async fn resync_at(
        &mut self,
        block: u64,
        cause: ResyncCause,
        outcome: &mut PollOutcome,
    ) -> SyncResult<()> {
        info!(block, ?cause, "Resyncing");
        let sync = &self.sync;
        let result = if cause == ResyncCause::Reorg {
            retry_with_backoff(&self.retry, "resync_after_reorg", SyncError::is_regeneration, move || {
                sync.resync_after_reorg(block)
            })
            .await
        } else {
            retry_with_backoff(&self.retry, "resync", SyncError::is_regeneration, move || {
                sync.resync(block)
            })
            .await
        };
        self.finish_resync(block, cause, outcome, result)
    }

    async fn resync_flagged_at(&mut self, block: u64, outcome: &mut PollOutcome) -> SyncResult<()> {
        let flagged = self.sync.flagged_for_resync().len();
        warn!(block, flagged, "Resyncing entities flagged by invariant violations");
        let sync = &self.sync;
        let result = retry_with_backoff(&self.retry, "resync_flagged", SyncError::is_regeneration, move || {
            sync.resync_flagged(block)
        })
        .await;
        match result {
            Ok(()) => {
                outcome.resyncs.push((block, ResyncCause::Flagged));
                Ok(())
            }
            Err(e) => {
                self.recovering = true;
                Err(e)
            }
        }
    }

    fn finish_resync(
        &mut self,
        block: u64,
        cause: ResyncCause,
        outcome: &mut PollOutcome,
        result: SyncResult<()>,
    ) -> SyncResult<()> {
        match result {
            Ok(()) => {
                self.last_resync = block;
                self.recovering = false;
                outcome.resyncs.push((block, cause));
                Ok(())
            }
            Err(e) => {
                self.recovering = true;
                Err(e)
            }
        }
    }
}
