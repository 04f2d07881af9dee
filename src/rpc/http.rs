//! HTTP provider construction and head-of-chain queries.
//!
//! ## Example
//!
//! ```no_run
//! use dex_state_sync::error::SyncResult;
//! use dex_state_sync::rpc::{create_provider, get_latest_block};
//!
//! # async fn example() -> SyncResult<()> {
//! let provider = create_provider("https://eth-mainnet.g.alchemy.com/v2/API_KEY").await?;
//! let head = get_latest_block(&provider).await?;
//! println!("Head: {head}");
//! # Ok(())
//! # }
//! ```

use alloy::providers::{Provider as _, ProviderBuilder, RootProvider};
use alloy::transports::http::{Client, Http};
use tracing::{debug, info, instrument, warn};

use crate::error::{SyncError, SyncResult};

/// HTTP provider shared by the block feed and the state reader.
pub type Provider = RootProvider<Http<Client>>;

/// Host part of an RPC URL, without the API key path.
#[must_use]
pub fn redact_rpc_url(rpc_url: &str) -> &str {
    rpc_url.split("/v2/").next().unwrap_or("unknown")
}

/// Build an HTTP provider for `rpc_url`.
///
/// No request is sent; use [`check_connection`] to probe the node.
///
/// # Errors
///
/// Returns an RPC error if the URL cannot be parsed.
#[allow(clippy::unused_async)]
#[instrument(skip(rpc_url), fields(rpc_host = tracing::field::Empty))]
pub async fn create_provider(rpc_url: &str) -> SyncResult<Provider> {
    let host = redact_rpc_url(rpc_url);
    tracing::Span::current().record("rpc_host", host);

    let url = rpc_url.parse().map_err(|e| {
        let message = if rpc_url.starts_with("http") {
            format!("Failed to parse RPC URL for host '{host}'")
        } else {
            "Invalid RPC URL, expected 'https://...'. Set RPC_URL or ALCHEMY_API_KEY".to_string()
        };
        SyncError::rpc(message, Some(Box::new(e)))
    })?;

    let provider = ProviderBuilder::new().on_http(url);
    info!("RPC provider ready");
    Ok(provider)
}

/// Current head block number.
///
/// # Errors
///
/// Returns an RPC error if the request fails.
#[instrument(skip(provider), fields(block = tracing::field::Empty, duration_ms = tracing::field::Empty))]
pub async fn get_latest_block(provider: &Provider) -> SyncResult<u64> {
    let start = std::time::Instant::now();
    let block = provider
        .get_block_number()
        .await
        .map_err(|e| SyncError::rpc("Failed to fetch latest block number", Some(Box::new(e))))?;

    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    tracing::Span::current().record("block", block);
    tracing::Span::current().record("duration_ms", duration_ms);
    debug!(block, duration_ms, "Latest block fetched");

    Ok(block)
}

/// Probe the node by fetching the head block number.
///
/// # Errors
///
/// Returns an RPC error if the node does not answer.
#[instrument(skip(provider))]
pub async fn check_connection(provider: &Provider) -> SyncResult<u64> {
    match get_latest_block(provider).await {
        Ok(block) => {
            info!(block, "Connection check successful");
            Ok(block)
        }
        Err(e) => {
            warn!(error = %e, "Connection check failed");
            Err(SyncError::rpc(
                format!("Provider health check failed: {e}"),
                Some(Box::new(e)),
            ))
        }
    }
}
