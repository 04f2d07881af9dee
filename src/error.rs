//! Error types for the state synchronization engine.
//!
//! This module provides a unified error type [`SyncError`] covering every
//! failure the engine can observe, from a single malformed log up to a failed
//! regeneration of the whole registry.
//!
//! # Design
//!
//! Errors are organized by how far they are allowed to travel:
//! - [`SyncError::DecodingError`] and [`SyncError::UnknownEntity`]: local to one
//!   log; logged and skipped by the synchronizer, never returned to callers
//! - [`SyncError::RegenerationError`]: direct-read failures, surfaced to the
//!   caller of `initialize`/`resync` so it can retry with backoff
//! - [`SyncError::NotAvailable`]: a query for an entity/block with no known state
//! - [`SyncError::InvariantViolation`]: applier or upstream data bug (negative
//!   balance, malformed delta vector); logged at error level
//! - [`SyncError::ConfigError`], [`SyncError::RpcError`], [`SyncError::MathError`]:
//!   ambient failures of the surrounding layers
//!
//! # Example
//!
//! ```
//! use dex_state_sync::error::{SyncError, SyncResult};
//!
//! fn validate_chi(chi: u128) -> SyncResult<()> {
//!     if chi == 0 {
//!         return Err(SyncError::invariant("chi cannot be zero"));
//!     }
//!     Ok(())
//! }
//! ```

use alloy::primitives::Address;
use std::fmt;

/// Result type alias using [`SyncError`].
pub type SyncResult<T> = Result<T, SyncError>;

/// Boxed source error carried by the message-style variants.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the synchronization engine.
#[derive(Debug)]
pub enum SyncError {
    /// Configuration or environment variable errors.
    ConfigError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// RPC provider or network errors outside of regeneration
    /// (block feed, latest block lookups).
    RpcError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// A log does not match a known event signature or is malformed.
    DecodingError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// An event references an entity outside the registry.
    UnknownEntity {
        /// Entity the event was addressed to
        entity: Address,
    },

    /// The direct-read path failed while rebuilding state.
    RegenerationError {
        /// Entity being regenerated, if the failure is entity specific
        entity: Option<Address>,
        /// Block the regeneration was pinned to
        block: u64,
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// No state is known for the entity at or before the requested block.
    NotAvailable {
        /// Queried entity
        entity: Address,
        /// Queried block
        block: u64,
    },

    /// A computed state broke an invariant (negative balance, malformed deltas).
    InvariantViolation {
        /// Human-readable error message
        message: String,
    },

    /// Arithmetic errors: overflow, division by zero, non-convergence.
    MathError {
        /// Human-readable error message
        message: String,
    },
}

impl SyncError {
    /// Create a new configuration error.
    ///
    /// ```
    /// use dex_state_sync::error::SyncError;
    ///
    /// let err = SyncError::config("RPC_URL not set", None);
    /// assert!(matches!(err, SyncError::ConfigError { .. }));
    /// ```
    #[must_use]
    pub fn config(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::ConfigError {
            message: message.into(),
            source,
        }
    }

    /// Create a new RPC error.
    #[must_use]
    pub fn rpc(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::RpcError {
            message: message.into(),
            source,
        }
    }

    /// Create a new decoding error.
    #[must_use]
    pub fn decoding(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::DecodingError {
            message: message.into(),
            source,
        }
    }

    /// Create a regeneration error for one entity at a block.
    ///
    /// ```
    /// use alloy::primitives::Address;
    /// use dex_state_sync::error::SyncError;
    ///
    /// let err = SyncError::regeneration(Some(Address::ZERO), 100, "eth_call failed", None);
    /// assert!(err.is_regeneration());
    /// ```
    #[must_use]
    pub fn regeneration(
        entity: Option<Address>,
        block: u64,
        message: impl Into<String>,
        source: Option<BoxedSource>,
    ) -> Self {
        Self::RegenerationError {
            entity,
            block,
            message: message.into(),
            source,
        }
    }

    /// Create a not-available error.
    #[must_use]
    pub const fn not_available(entity: Address, block: u64) -> Self {
        Self::NotAvailable { entity, block }
    }

    /// Create an invariant violation.
    #[must_use]
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Create a math error.
    #[must_use]
    pub fn math(message: impl Into<String>) -> Self {
        Self::MathError {
            message: message.into(),
        }
    }

    /// Whether this error came from the regeneration path.
    #[must_use]
    pub const fn is_regeneration(&self) -> bool {
        matches!(self, Self::RegenerationError { .. })
    }

    /// Whether this error indicates an applier or upstream data bug.
    #[must_use]
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation { .. })
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError { message, .. } => write!(f, "Configuration error: {message}"),
            Self::RpcError { message, .. } => write!(f, "RPC error: {message}"),
            Self::DecodingError { message, .. } => write!(f, "Decoding error: {message}"),
            Self::UnknownEntity { entity } => write!(f, "Unknown entity: {entity}"),
            Self::RegenerationError {
                entity: Some(entity),
                block,
                message,
                ..
            } => write!(
                f,
                "Regeneration error for {entity} at block {block}: {message}"
            ),
            Self::RegenerationError {
                entity: None,
                block,
                message,
                ..
            } => write!(f, "Regeneration error at block {block}: {message}"),
            Self::NotAvailable { entity, block } => {
                write!(f, "No state available for {entity} at block {block}")
            }
            Self::InvariantViolation { message } => write!(f, "Invariant violation: {message}"),
            Self::MathError { message } => write!(f, "Math error: {message}"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigError { source, .. }
            | Self::RpcError { source, .. }
            | Self::DecodingError { source, .. }
            | Self::RegenerationError { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &dyn std::error::Error),
            Self::UnknownEntity { .. }
            | Self::NotAvailable { .. }
            | Self::InvariantViolation { .. }
            | Self::MathError { .. } => None,
        }
    }
}
