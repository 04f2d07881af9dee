//! Chain follower behaviour over a scripted block feed.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

mod common;

use std::sync::Arc;

use alloy::primitives::U256;
use dex_state_sync::snapshot::EntityState;
use dex_state_sync::sync::{ChainFollower, ResyncCause, RetryPolicy};

use common::*;

fn first_balance(sync: &dex_state_sync::sync::StateSynchronizer<Arc<MockReader>>) -> U256 {
    match sync.latest_snapshot(POOL).unwrap().state() {
        EntityState::StablePool(state) => state.balances_live_scaled18[0],
        EntityState::Savings(_) => unreachable!("expected a pool snapshot"),
    }
}

async fn initialized(reader: &Arc<MockReader>, at: u64) -> Arc<dex_state_sync::sync::StateSynchronizer<Arc<MockReader>>> {
    let sync = Arc::new(synchronizer(Arc::clone(reader)));
    sync.initialize(at).await.unwrap();
    sync
}

#[tokio::test]
async fn test_continuous_blocks_are_applied() {
    let reader = Arc::new(MockReader::default());
    let sync = initialized(&reader, 100).await;

    let feed = ScriptedFeed::new(vec![(
        102,
        vec![
            block(101, vec![deltas_log(POOL, &[5, 0])]),
            block(102, vec![deltas_log(POOL, &[5, 0])]),
        ],
    )]);
    let mut follower = ChainFollower::new(feed, Arc::clone(&sync), 100, None, RetryPolicy::immediate(1));

    let outcome = follower.poll().await.unwrap();
    assert_eq!(outcome.head, 102);
    assert_eq!(outcome.blocks_applied, 2);
    assert_eq!(outcome.logs_applied, 2);
    assert!(outcome.resyncs.is_empty());
    assert_eq!(follower.next_block(), 103);
    assert_eq!(first_balance(&sync), tagged_balance(100) + U256::from(10u64));
}

#[tokio::test]
async fn test_reorg_triggers_resync_at_new_block() {
    let reader = Arc::new(MockReader::default());
    let sync = initialized(&reader, 100).await;

    let mut orphaned = block(102, vec![deltas_log(POOL, &[5, 0])]);
    orphaned.parent_hash = block_hash(101, 9);

    let feed = ScriptedFeed::new(vec![(
        102,
        vec![block(101, vec![deltas_log(POOL, &[5, 0])]), orphaned],
    )]);
    let mut follower = ChainFollower::new(feed, Arc::clone(&sync), 100, None, RetryPolicy::immediate(1));

    let outcome = follower.poll().await.unwrap();
    assert_eq!(outcome.blocks_applied, 1);
    assert_eq!(outcome.resyncs, vec![(102, ResyncCause::Reorg)]);
    assert_eq!(follower.detector().reorg_count(), 1);

    // Regenerated state replaces the incremental one
    assert_eq!(sync.latest_snapshot(POOL).unwrap().block_number(), 102);
    assert_eq!(first_balance(&sync), tagged_balance(102));

    // Block 101 came from the orphaned branch and is no longer served
    assert!(sync.get_snapshot(POOL, 101).is_err());
}

#[tokio::test]
async fn test_gap_triggers_resync() {
    let reader = Arc::new(MockReader::default());
    let sync = initialized(&reader, 100).await;

    let feed = ScriptedFeed::new(vec![(
        105,
        vec![block(101, Vec::new()), block(105, vec![deltas_log(POOL, &[5, 0])])],
    )]);
    let mut follower = ChainFollower::new(feed, Arc::clone(&sync), 100, None, RetryPolicy::immediate(1));

    let outcome = follower.poll().await.unwrap();
    assert_eq!(outcome.resyncs, vec![(105, ResyncCause::Gap)]);
    assert_eq!(first_balance(&sync), tagged_balance(105));
    assert_eq!(follower.next_block(), 106);
}

#[tokio::test]
async fn test_periodic_resync() {
    let reader = Arc::new(MockReader::default());
    let sync = initialized(&reader, 100).await;

    let blocks = (101..=104).map(|n| block(n, Vec::new())).collect();
    let feed = ScriptedFeed::new(vec![(104, blocks)]);
    let mut follower = ChainFollower::new(feed, Arc::clone(&sync), 100, Some(2), RetryPolicy::immediate(1));

    let outcome = follower.poll().await.unwrap();
    assert_eq!(
        outcome.resyncs,
        vec![(102, ResyncCause::Periodic), (104, ResyncCause::Periodic)]
    );
    assert_eq!(sync.latest_snapshot(POOL).unwrap().block_number(), 104);
}

#[tokio::test]
async fn test_invariant_violation_triggers_flagged_resync() {
    let reader = Arc::new(MockReader::default());
    let sync = initialized(&reader, 100).await;

    let feed = ScriptedFeed::new(vec![(101, vec![block(101, vec![deltas_log(POOL, &[1])])])]);
    let mut follower = ChainFollower::new(feed, Arc::clone(&sync), 100, None, RetryPolicy::immediate(1));

    let outcome = follower.poll().await.unwrap();
    assert_eq!(outcome.resyncs, vec![(101, ResyncCause::Flagged)]);
    assert!(sync.flagged_for_resync().is_empty());
    assert_eq!(first_balance(&sync), tagged_balance(101));
}

#[tokio::test]
async fn test_failed_resync_recovers_at_head() {
    let reader = Arc::new(MockReader::default());
    let sync = initialized(&reader, 100).await;
    reader.fail_at(105);

    let feed = ScriptedFeed::new(vec![
        (105, vec![block(105, Vec::new())]),
        (107, Vec::new()),
    ]);
    let mut follower = ChainFollower::new(feed, Arc::clone(&sync), 100, None, RetryPolicy::immediate(2));

    // Gap at 105 cannot be regenerated
    assert!(follower.poll().await.unwrap_err().is_regeneration());
    assert_eq!(sync.latest_snapshot(POOL).unwrap().block_number(), 100);

    // Next poll regenerates at the new head instead of replaying
    let outcome = follower.poll().await.unwrap();
    assert_eq!(outcome.resyncs, vec![(107, ResyncCause::Recovery)]);
    assert_eq!(follower.next_block(), 108);
    assert_eq!(first_balance(&sync), tagged_balance(107));
}

#[tokio::test]
async fn test_no_new_blocks_is_a_noop() {
    let reader = Arc::new(MockReader::default());
    let sync = initialized(&reader, 100).await;

    let feed = ScriptedFeed::new(vec![(100, Vec::new())]);
    let mut follower = ChainFollower::new(feed, Arc::clone(&sync), 100, None, RetryPolicy::immediate(1));

    let outcome = follower.poll().await.unwrap();
    assert_eq!(outcome.blocks_applied, 0);
    assert_eq!(follower.next_block(), 101);
}
