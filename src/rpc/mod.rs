//! RPC adapters for the synchronizer's two external seams.
//!
//! - [`http`]: provider construction and head-of-chain queries
//! - [`reader`]: [`RpcStateReader`], the direct-read client used by the
//!   regenerator, pinned to a block through `eth_call` block overrides
//! - [`feed`]: [`RpcBlockFeed`], logs of the tracked addresses grouped per
//!   block together with each block's timestamp and hashes
//!
//! ```text
//!            ┌──────────────┐   BlockLogs    ┌───────────────────┐
//!  node ───▶ │ RpcBlockFeed │ ─────────────▶ │ StateSynchronizer │
//!       │    └──────────────┘                └───────────────────┘
//!       │    ┌────────────────┐  readings             ▲
//!       └──▶ │ RpcStateReader │ ──────────────────────┘ (initialize / resync)
//!            └────────────────┘
//! ```

pub mod feed;
pub mod http;
pub mod reader;

pub use feed::{BlockFeed, BlockLogs, RpcBlockFeed};
pub use http::{check_connection, create_provider, get_latest_block, Provider};
pub use reader::RpcStateReader;
