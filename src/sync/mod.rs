//! State synchronizer: the single owner of the entity registry.
//!
//! # Registry
//!
//! The registry maps each entity to an [`EntityHistory`] behind an [`Arc`].
//! Commits never mutate a history in place: they build a new one and swap the
//! map entry while holding the write lock for the swap only. Readers clone the
//! `Arc` under a short read lock and work on a value nobody else can change.
//!
//! # Update paths
//!
//! - [`StateSynchronizer::on_block_logs`]: decode, apply in log order, commit
//!   one snapshot per touched entity. Computation happens outside the lock; the
//!   commit only goes through if the entity's history is still the one the
//!   update started from, otherwise a concurrent resync won and the update is
//!   discarded.
//! - [`StateSynchronizer::initialize`] / [`StateSynchronizer::resync`]: direct
//!   reads through the [`Regenerator`]. For each entity the result with the
//!   highest block wins, regardless of completion order, and a regeneration
//!   older than the entity's latest committed snapshot is dropped so the
//!   committed block never moves backwards.
//! - [`StateSynchronizer::resync_after_reorg`]: like `resync`, but the whole
//!   retained history is replaced, since snapshots before the reorg block may
//!   come from the orphaned branch.
//!
//! # Example
//!
//! ```no_run
//! use dex_state_sync::applier::BlockContext;
//! use dex_state_sync::events::LogDecoder;
//! use dex_state_sync::regen::{Regenerator, StateReader, TrackedEntity};
//! use dex_state_sync::sync::StateSynchronizer;
//!
//! async fn run<R: StateReader>(reader: R, entities: Vec<TrackedEntity>) -> Result<(), Box<dyn std::error::Error>> {
//!     let sync = StateSynchronizer::new(Regenerator::new(reader), entities, LogDecoder::default(), 64);
//!     sync.initialize(19_000_000).await?;
//!     sync.on_block_logs(BlockContext::new(19_000_001, 1_700_000_012), &[]);
//!     Ok(())
//! }
//! ```

pub mod follower;
mod history;
pub mod retry;

pub use follower::{ChainFollower, PollOutcome, ResyncCause};
pub use history::EntityHistory;
pub use retry::{retry_with_backoff, RetryPolicy};

use alloy::primitives::{Address, Log};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::applier::{apply, Applied, BlockContext};
use crate::error::{SyncError, SyncResult};
use crate::events::LogDecoder;
use crate::pricing::{quote_snapshot, Quote, QuoteRequest, UnavailableReason};
use crate::regen::{Regenerated, Regenerator, StateReader, TrackedEntity};
use crate::snapshot::Snapshot;

/// What a committed regeneration keeps of the entity's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retention {
    /// Keep snapshots older than the regenerated block.
    Earlier,
    /// Keep nothing but the regenerated snapshot.
    Nothing,
}

#[derive(Debug, Default)]
struct Registry {
    entities: HashMap<Address, Arc<EntityHistory>>,
    /// Highest regeneration block committed per entity, excluded ones included.
    regenerations: HashMap<Address, u64>,
}

/// Processing counters.
#[derive(Debug, Default)]
struct Counters {
    blocks_processed: AtomicU64,
    logs_decoded: AtomicU64,
    logs_skipped: AtomicU64,
    unknown_entity_events: AtomicU64,
    events_applied: AtomicU64,
    invariant_violations: AtomicU64,
    stale_blocks_ignored: AtomicU64,
    snapshots_committed: AtomicU64,
    updates_discarded: AtomicU64,
    regenerations_committed: AtomicU64,
    regenerations_superseded: AtomicU64,
    regeneration_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time copy of the synchronizer's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Blocks handed to `on_block_logs`.
    pub blocks_processed: u64,
    /// Logs decoded into a tracked event.
    pub logs_decoded: u64,
    /// Logs with no matching event, or malformed.
    pub logs_skipped: u64,
    /// Events addressed to entities outside the registry.
    pub unknown_entity_events: u64,
    /// Events that produced a new snapshot.
    pub events_applied: u64,
    /// Events rejected by an invariant check.
    pub invariant_violations: u64,
    /// Entity updates ignored because the block was already superseded.
    pub stale_blocks_ignored: u64,
    /// Incremental snapshots committed.
    pub snapshots_committed: u64,
    /// Incremental snapshots dropped because a resync committed first.
    pub updates_discarded: u64,
    /// Regenerated snapshots committed.
    pub regenerations_committed: u64,
    /// Regenerated snapshots dropped because a newer one was committed.
    pub regenerations_superseded: u64,
    /// Failed entity regenerations.
    pub regeneration_failures: u64,
}

/// Owner of the entity registry.
#[derive(Debug)]
pub struct StateSynchronizer<R> {
    regenerator: Regenerator<R>,
    entities: Vec<TrackedEntity>,
    decoder: LogDecoder,
    max_history: usize,
    registry: RwLock<Registry>,
    needs_resync: Mutex<HashSet<Address>>,
    counters: Counters,
}

impl<R: StateReader> StateSynchronizer<R> {
    /// Create an empty synchronizer. Nothing is served until
    /// [`Self::initialize`] succeeds.
    pub fn new(
        regenerator: Regenerator<R>,
        entities: Vec<TrackedEntity>,
        decoder: LogDecoder,
        max_history: usize,
    ) -> Self {
        Self {
            regenerator,
            entities,
            decoder,
            max_history: max_history.max(1),
            registry: RwLock::new(Registry::default()),
            needs_resync: Mutex::new(HashSet::new()),
            counters: Counters::default(),
        }
    }

    /// Configured entities.
    pub fn tracked_entities(&self) -> &[TrackedEntity] {
        &self.entities
    }

    /// Populate the registry from direct reads at `block`.
    ///
    /// The registry is replaced only if every entity was read successfully.
    ///
    /// # Errors
    ///
    /// Returns the first regeneration error; the registry is left unchanged.
    #[instrument(skip(self))]
    pub async fn initialize(&self, block: u64) -> SyncResult<()> {
        let results = self.regenerator.regenerate_all(&self.entities, block).await;

        let mut fresh = Registry::default();
        for (entity, result) in results {
            match result {
                Ok(Regenerated::Snapshot(snapshot)) => {
                    fresh
                        .entities
                        .insert(entity, Arc::new(EntityHistory::regenerated(snapshot)));
                    fresh.regenerations.insert(entity, block);
                }
                Ok(Regenerated::Excluded(reason)) => {
                    info!(%entity, %reason, "Entity not tracked at initialization");
                    fresh.regenerations.insert(entity, block);
                }
                Err(e) => {
                    bump(&self.counters.regeneration_failures);
                    error!(%entity, error = %e, "Initialization failed");
                    return Err(e);
                }
            }
        }

        let tracked = fresh.entities.len();
        *self.write_registry() = fresh;
        self.lock_needs_resync().clear();
        info!(block, tracked, "Registry initialized");
        Ok(())
    }

    /// Apply the logs of one block, in order.
    ///
    /// Never fails: undecodable logs, events for unknown entities and events
    /// that break an invariant are logged and skipped. Entities whose latest
    /// snapshot is already at or past `block` are left untouched.
    pub fn on_block_logs(&self, block: BlockContext, logs: &[Log]) {
        bump(&self.counters.blocks_processed);

        // entity -> (base history, working snapshot, changed)
        let mut working: HashMap<Address, (Arc<EntityHistory>, Snapshot, bool)> = HashMap::new();
        let mut order: Vec<Address> = Vec::new();
        let mut ignored: HashSet<Address> = HashSet::new();

        for log in logs {
            let Some(decoded) = self.decoder.decode(log) else {
                bump(&self.counters.logs_skipped);
                continue;
            };
            bump(&self.counters.logs_decoded);

            let entity = decoded.entity;
            if ignored.contains(&entity) {
                continue;
            }

            if !working.contains_key(&entity) {
                let Some(base) = self.history(entity) else {
                    bump(&self.counters.unknown_entity_events);
                    let e = SyncError::UnknownEntity { entity };
                    debug!(event = decoded.event.name(), error = %e, "Skipping event");
                    ignored.insert(entity);
                    continue;
                };
                let Some(latest) = base.latest().map(|s| (**s).clone()) else {
                    ignored.insert(entity);
                    continue;
                };
                if block.number <= base.latest_block() {
                    bump(&self.counters.stale_blocks_ignored);
                    debug!(
                        %entity,
                        block = block.number,
                        latest = base.latest_block(),
                        "Ignoring already superseded block"
                    );
                    ignored.insert(entity);
                    continue;
                }
                working.insert(entity, (base, latest, false));
                order.push(entity);
            }

            let Some((_, snapshot, changed)) = working.get_mut(&entity) else {
                continue;
            };
            match apply(snapshot, &decoded.event, block) {
                Ok(Applied::Updated(next)) => {
                    bump(&self.counters.events_applied);
                    trace!(%entity, event = decoded.event.name(), "Event applied");
                    *snapshot = next;
                    *changed = true;
                }
                Ok(Applied::Unchanged) => {}
                Err(e) if e.is_invariant_violation() => {
                    bump(&self.counters.invariant_violations);
                    error!(
                        %entity,
                        block = block.number,
                        event = decoded.event.name(),
                        error = %e,
                        "Invariant violation, entity flagged for resync"
                    );
                    self.lock_needs_resync().insert(entity);
                }
                Err(e) => {
                    warn!(%entity, event = decoded.event.name(), error = %e, "Skipping event");
                }
            }
        }

        for entity in order {
            let Some((base, snapshot, true)) = working.remove(&entity) else {
                continue;
            };
            let next = Arc::new(base.with_incremental(snapshot.at_block(block.number), self.max_history));

            let mut registry = self.write_registry();
            let unchanged = registry
                .entities
                .get(&entity)
                .is_some_and(|current| Arc::ptr_eq(current, &base));
            if unchanged {
                registry.entities.insert(entity, next);
                bump(&self.counters.snapshots_committed);
            } else {
                bump(&self.counters.updates_discarded);
                debug!(%entity, block = block.number, "Discarding update superseded by resync");
            }
        }
    }

    /// Most recent snapshot of `entity` at or before `block`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotAvailable`] for unknown entities and for blocks
    /// older than the retained history.
    pub fn get_snapshot(&self, entity: Address, block: u64) -> SyncResult<Arc<Snapshot>> {
        self.history(entity)
            .and_then(|history| history.at_or_before(block).cloned())
            .ok_or(SyncError::not_available(entity, block))
    }

    /// Latest committed snapshot of `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotAvailable`] for unknown entities.
    pub fn latest_snapshot(&self, entity: Address) -> SyncResult<Arc<Snapshot>> {
        self.history(entity)
            .and_then(|history| history.latest().cloned())
            .ok_or(SyncError::not_available(entity, u64::MAX))
    }

    /// Regenerate every configured entity at `block`.
    ///
    /// Each successful entity is committed atomically even if others fail.
    ///
    /// # Errors
    ///
    /// Returns the first regeneration error after committing the successes.
    #[instrument(skip(self))]
    pub async fn resync(&self, block: u64) -> SyncResult<()> {
        self.resync_entities(&self.entities, block, Retention::Earlier).await
    }

    /// Regenerate every tracked entity at `block` after a reorg was detected
    /// there, dropping all previously retained snapshots.
    ///
    /// Only the latest header is known to the caller, so the fork point is
    /// unknown and no earlier snapshot can be trusted. Queries before `block`
    /// become [`SyncError::NotAvailable`] until new history accumulates.
    ///
    /// # Errors
    ///
    /// Returns the first regeneration error after committing the successes.
    #[instrument(skip(self))]
    pub async fn resync_after_reorg(&self, block: u64) -> SyncResult<()> {
        self.resync_entities(&self.entities, block, Retention::Nothing).await
    }

    /// Regenerate only the entities flagged by invariant violations.
    ///
    /// # Errors
    ///
    /// Returns the first regeneration error after committing the successes.
    pub async fn resync_flagged(&self, block: u64) -> SyncResult<()> {
        let flagged = self.flagged_for_resync();
        if flagged.is_empty() {
            return Ok(());
        }
        let entities: Vec<_> = self
            .entities
            .iter()
            .filter(|e| flagged.contains(&e.id()))
            .copied()
            .collect();
        self.resync_entities(&entities, block, Retention::Earlier).await
    }

    async fn resync_entities(
        &self,
        entities: &[TrackedEntity],
        block: u64,
        retention: Retention,
    ) -> SyncResult<()> {
        let results = self.regenerator.regenerate_all(entities, block).await;

        let mut first_error = None;
        for (entity, result) in results {
            match result {
                Ok(regenerated) => self.commit_regenerated(entity, block, regenerated, retention),
                Err(e) => {
                    bump(&self.counters.regeneration_failures);
                    error!(%entity, block, error = %e, "Resync failed, keeping previous snapshot");
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    fn commit_regenerated(
        &self,
        entity: Address,
        block: u64,
        regenerated: Regenerated,
        retention: Retention,
    ) {
        let mut registry = self.write_registry();

        if let Some(newer) = registry.regenerations.get(&entity).filter(|b| **b > block) {
            bump(&self.counters.regenerations_superseded);
            debug!(%entity, block, newer, "Regeneration superseded by a newer one");
            return;
        }
        if let Some(latest) = registry
            .entities
            .get(&entity)
            .map(|h| h.latest_block())
            .filter(|latest| *latest > block)
        {
            bump(&self.counters.regenerations_superseded);
            debug!(%entity, block, latest, "Regeneration older than the committed state");
            return;
        }
        registry.regenerations.insert(entity, block);

        match regenerated {
            Regenerated::Snapshot(snapshot) => {
                let next = match (registry.entities.get(&entity), retention) {
                    (Some(history), Retention::Earlier) => {
                        history.with_regenerated(snapshot, self.max_history)
                    }
                    _ => EntityHistory::regenerated(snapshot),
                };
                registry.entities.insert(entity, Arc::new(next));
                bump(&self.counters.regenerations_committed);
            }
            Regenerated::Excluded(reason) => {
                if registry.entities.remove(&entity).is_some() {
                    warn!(%entity, block, %reason, "Entity removed from registry");
                }
            }
        }
        drop(registry);

        self.lock_needs_resync().remove(&entity);
    }

    /// Quote `request` against `entity` as of `block`, at `timestamp`.
    pub fn quote(
        &self,
        entity: Address,
        block: u64,
        timestamp: u64,
        request: &QuoteRequest,
    ) -> Quote {
        match self.get_snapshot(entity, block) {
            Ok(snapshot) => quote_snapshot(&snapshot, request, timestamp),
            Err(e) => {
                debug!(error = %e, "Quote without state");
                Quote::Unavailable(UnavailableReason::NotAvailable)
            }
        }
    }

    /// Entities currently in the registry.
    pub fn entities(&self) -> Vec<Address> {
        let mut entities: Vec<_> = self.read_registry().entities.keys().copied().collect();
        entities.sort_unstable();
        entities
    }

    /// Highest block committed for any entity.
    pub fn latest_block(&self) -> Option<u64> {
        self.read_registry()
            .entities
            .values()
            .map(|h| h.latest_block())
            .max()
    }

    /// Entities flagged for resync by invariant violations.
    pub fn flagged_for_resync(&self) -> HashSet<Address> {
        self.lock_needs_resync().clone()
    }

    /// Counters since creation.
    pub fn stats(&self) -> SyncStats {
        let c = &self.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        SyncStats {
            blocks_processed: load(&c.blocks_processed),
            logs_decoded: load(&c.logs_decoded),
            logs_skipped: load(&c.logs_skipped),
            unknown_entity_events: load(&c.unknown_entity_events),
            events_applied: load(&c.events_applied),
            invariant_violations: load(&c.invariant_violations),
            stale_blocks_ignored: load(&c.stale_blocks_ignored),
            snapshots_committed: load(&c.snapshots_committed),
            updates_discarded: load(&c.updates_discarded),
            regenerations_committed: load(&c.regenerations_committed),
            regenerations_superseded: load(&c.regenerations_superseded),
            regeneration_failures: load(&c.regeneration_failures),
        }
    }

    fn history(&self, entity: Address) -> Option<Arc<EntityHistory>> {
        self.read_registry().entities.get(&entity).cloned()
    }

    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_needs_resync(&self) -> std::sync::MutexGuard<'_, HashSet<Address>> {
        self.needs_resync.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
