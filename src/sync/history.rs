//! Bounded, copy-on-write snapshot history of one entity.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::snapshot::Snapshot;

/// Committed snapshots of one entity in ascending block order.
///
/// A history is never mutated once it is shared: commits build a new
/// history that shares the untouched snapshots through [`Arc`].
#[derive(Debug, Clone)]
pub struct EntityHistory {
    snapshots: VecDeque<Arc<Snapshot>>,
    regenerated_at: u64,
}

impl EntityHistory {
    /// History holding one regenerated snapshot.
    #[must_use]
    pub fn regenerated(snapshot: Snapshot) -> Self {
        let regenerated_at = snapshot.block_number();
        Self {
            snapshots: VecDeque::from([Arc::new(snapshot)]),
            regenerated_at,
        }
    }

    /// Latest committed snapshot.
    #[must_use]
    pub fn latest(&self) -> Option<&Arc<Snapshot>> {
        self.snapshots.back()
    }

    /// Block of the latest committed snapshot.
    #[must_use]
    pub fn latest_block(&self) -> u64 {
        self.latest().map_or(self.regenerated_at, |s| s.block_number())
    }

    /// Block of the last regeneration committed for this entity.
    #[must_use]
    pub const fn regenerated_at(&self) -> u64 {
        self.regenerated_at
    }

    /// Number of retained snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether no snapshot is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Most recent snapshot at or before `block`.
    #[must_use]
    pub fn at_or_before(&self, block: u64) -> Option<&Arc<Snapshot>> {
        self.snapshots
            .iter()
            .rev()
            .find(|s| s.block_number() <= block)
    }

    /// New history with an incrementally derived snapshot appended.
    ///
    /// The caller guarantees `snapshot` is newer than [`Self::latest_block`].
    #[must_use]
    pub fn with_incremental(&self, snapshot: Snapshot, max_history: usize) -> Self {
        let mut snapshots = self.snapshots.clone();
        snapshots.push_back(Arc::new(snapshot));
        trim(&mut snapshots, max_history);
        Self {
            snapshots,
            regenerated_at: self.regenerated_at,
        }
    }

    /// New history with a regenerated snapshot replacing every snapshot at or
    /// after its block.
    #[must_use]
    pub fn with_regenerated(&self, snapshot: Snapshot, max_history: usize) -> Self {
        let block = snapshot.block_number();
        let mut snapshots: VecDeque<_> = self
            .snapshots
            .iter()
            .filter(|s| s.block_number() < block)
            .cloned()
            .collect();
        snapshots.push_back(Arc::new(snapshot));
        trim(&mut snapshots, max_history);
        Self {
            snapshots,
            regenerated_at: block,
        }
    }
}

fn trim(snapshots: &mut VecDeque<Arc<Snapshot>>, max_history: usize) {
    while snapshots.len() > max_history.max(1) {
        snapshots.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::RAY;
    use crate::snapshot::{EntityState, Flags, RateSymbol, SavingsState};
    use alloy::primitives::{Address, U256};

    fn snapshot(block: u64, chi: u64) -> Snapshot {
        Snapshot::new(
            Address::ZERO,
            block,
            Flags::default(),
            EntityState::Savings(SavingsState {
                asset: Address::ZERO,
                share: Address::ZERO,
                chi: RAY + U256::from(chi),
                rho: 0,
                rate: RAY,
                rate_symbol: RateSymbol::Ssr,
            }),
        )
    }

    #[test]
    fn test_lookup_at_or_before() {
        let history = EntityHistory::regenerated(snapshot(10, 0))
            .with_incremental(snapshot(12, 1), 8)
            .with_incremental(snapshot(15, 2), 8);

        assert!(history.at_or_before(9).is_none());
        assert_eq!(history.at_or_before(10).unwrap().block_number(), 10);
        assert_eq!(history.at_or_before(14).unwrap().block_number(), 12);
        assert_eq!(history.at_or_before(100).unwrap().block_number(), 15);
        assert_eq!(history.latest_block(), 15);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = EntityHistory::regenerated(snapshot(1, 0));
        for block in 2..=10 {
            history = history.with_incremental(snapshot(block, block), 3);
        }
        assert_eq!(history.len(), 3);
        assert!(history.at_or_before(7).is_none());
        assert_eq!(history.latest_block(), 10);
    }

    #[test]
    fn test_regeneration_truncates_later_entries() {
        let history = EntityHistory::regenerated(snapshot(10, 0))
            .with_incremental(snapshot(11, 1), 8)
            .with_incremental(snapshot(12, 2), 8);

        let regenerated = history.with_regenerated(snapshot(11, 99), 8);
        assert_eq!(regenerated.regenerated_at(), 11);
        assert_eq!(regenerated.latest_block(), 11);
        assert_eq!(regenerated.len(), 2);
        assert_eq!(**regenerated.latest().unwrap(), snapshot(11, 99));

        // The original is untouched
        assert_eq!(history.latest_block(), 12);
    }
}
