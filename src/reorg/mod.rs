//! Chain continuity tracking.
//!
//! The engine keeps no per-block undo log. When delivered headers stop
//! linking (a skipped block range or a parent hash that does not match the
//! last accepted block), the only recovery is a full regeneration at the new
//! block. [`ReorgDetector`] decides when that is needed.
//!
//! ```
//! use alloy::primitives::B256;
//! use dex_state_sync::reorg::{BlockRecord, ChainEvent, ReorgDetector};
//!
//! let mut detector = ReorgDetector::new();
//! let a = BlockRecord::new(10, B256::repeat_byte(1), B256::ZERO, 0);
//! let b = BlockRecord::new(11, B256::repeat_byte(2), B256::repeat_byte(9), 12);
//!
//! assert_eq!(detector.observe(&a), ChainEvent::First);
//! assert!(detector.observe(&b).requires_resync());
//! ```

pub mod detector;

pub use detector::{BlockRecord, ChainEvent, ReorgDetector};
