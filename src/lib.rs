//! # DEX State Sync
//!
//! Block-by-block state synchronization and pricing for on-chain liquidity
//! sources using [Alloy](https://github.com/alloy-rs/alloy).
//!
//! Two kinds of entities are tracked:
//!
//! - **Savings vaults** (sDAI over Maker's `Pot`, sUSDS): a per-second rate
//!   compounding into an accumulator `chi`.
//! - **Vault stable pools** (Balancer V3 style): balances held in a shared
//!   vault and priced with StableSwap math.
//!
//! ## Architecture
//!
//! 1. **Events** ([`events`]) - Decode raw logs into tracked events
//! 2. **Applier** ([`applier`]) - Pure `(snapshot, event) -> snapshot` transitions
//! 3. **Regeneration** ([`regen`]) - Authoritative state from block-pinned reads
//! 4. **Synchronizer** ([`sync`]) - Registry ownership, commits, resync, lookups
//! 5. **Pricing** ([`pricing`]) - Quotes against a snapshot
//! 6. **RPC** ([`rpc`]) - Provider, log feed and contract reads
//!
//! Incremental updates never touch the network; regeneration is the only path
//! that does, and it supersedes incremental state for its entity and block.
//!
//! ## Quick Start
//!
//! ```bash
//! RPC_URL=https://... STABLE_POOLS=0x... cargo run --release -- watch
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`error::SyncResult<T>`](error::SyncResult):
//!
//! ```rust
//! use dex_state_sync::error::{SyncError, SyncResult};
//!
//! fn example() -> SyncResult<()> {
//!     Err(SyncError::invariant("balance would go negative"))
//! }
//! assert!(example().unwrap_err().is_invariant_violation());
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod applier;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod math;
pub mod observability;
pub mod pricing;
pub mod regen;
pub mod reorg;
pub mod rpc;
pub mod snapshot;
pub mod sync;
