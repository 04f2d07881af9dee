//! Command-line interface.
//!
//! # Commands
//!
//! - `snapshot`: Regenerate every configured entity at a block and print it
//! - `quote`: Price a trade against one entity at a block
//! - `watch`: Follow the chain and keep the registry current
//!
//! # Example
//!
//! ```bash
//! dex-state-sync snapshot --block 21000000
//! dex-state-sync quote --entity 0x197E90f9FAD81970bA7976f33CbD77088E5D7cf7 \
//!     --token-in 0x6B175474E89094C44Da98b954EedeAC495271d0F \
//!     --token-out 0x83F20F44975D03b1b09e64809B757c47f942BEeA \
//!     --amount 1000000000000000000000
//! dex-state-sync watch --interval 12
//! ```

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use alloy::providers::Provider as _;
use alloy::rpc::types::BlockTransactionsKind;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::pricing::{Quote, QuoteRequest, SwapSide};
use crate::regen::Regenerator;
use crate::rpc::{create_provider, get_latest_block, Provider, RpcBlockFeed, RpcStateReader};
use crate::snapshot::{EntityState, Snapshot};
use crate::sync::{ChainFollower, PollOutcome, RetryPolicy, StateSynchronizer};

/// Block-by-block state synchronization and pricing
#[derive(Parser, Debug)]
#[command(name = "dex-state-sync")]
#[command(about = "Track savings vaults and vault stable pools block by block", long_about = None)]
#[command(version)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Trade direction on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Side {
    /// Exact input
    Sell,
    /// Exact output
    Buy,
}

impl From<Side> for SwapSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Sell => Self::Sell,
            Side::Buy => Self::Buy,
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Regenerate all configured entities and print their snapshots
    Snapshot {
        /// Block to read at (default: latest)
        #[arg(short, long)]
        block: Option<u64>,

        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Quote a trade against one entity
    Quote {
        /// Entity to price against (savings rate source or pool address)
        #[arg(short, long)]
        entity: Address,

        /// Token given
        #[arg(long)]
        token_in: Address,

        /// Token received
        #[arg(long)]
        token_out: Address,

        /// Amount in raw units: input for `sell`, output for `buy`
        #[arg(short, long)]
        amount: U256,

        /// Trade direction
        #[arg(short, long, value_enum, default_value = "sell")]
        side: Side,

        /// Block to price at (default: latest)
        #[arg(short, long)]
        block: Option<u64>,
    },

    /// Follow the chain and keep all entities current
    Watch {
        /// Polling interval in seconds (default: from config)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Block to initialize at (default: latest)
        #[arg(short, long)]
        start_block: Option<u64>,
    },
}

/// Parse CLI arguments and execute the appropriate command.
///
/// # Errors
///
/// Returns configuration, RPC and regeneration errors.
pub async fn run() -> SyncResult<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Snapshot { block, json } => run_snapshot_command(&config, block, json).await,
        Commands::Quote {
            entity,
            token_in,
            token_out,
            amount,
            side,
            block,
        } => {
            let request = QuoteRequest::new(token_in, token_out, amount, side.into());
            run_quote_command(&config, entity, &request, block).await
        }
        Commands::Watch {
            interval,
            start_block,
        } => {
            let interval = interval.unwrap_or_else(|| config.poll_interval_secs());
            run_watch_command(&config, interval, start_block).await
        }
    }
}

type RpcSynchronizer = StateSynchronizer<RpcStateReader>;

async fn build_synchronizer(config: &Config) -> SyncResult<(Provider, Arc<RpcSynchronizer>)> {
    let provider = create_provider(config.rpc_url()).await?;
    let reader = RpcStateReader::new(provider.clone(), config.vault());
    let sync = StateSynchronizer::new(
        Regenerator::new(reader),
        config.tracked_entities(),
        config.decoder(),
        config.max_history(),
    );
    Ok((provider, Arc::new(sync)))
}

async fn block_timestamp(provider: &Provider, block: u64) -> SyncResult<u64> {
    provider
        .get_block_by_number(block.into(), BlockTransactionsKind::Hashes)
        .await
        .map_err(|e| SyncError::rpc(format!("Failed to fetch block {block}"), Some(Box::new(e))))?
        .map(|b| b.header.timestamp)
        .ok_or_else(|| SyncError::rpc(format!("Block {block} not found"), None))
}

async fn run_snapshot_command(config: &Config, block: Option<u64>, json: bool) -> SyncResult<()> {
    let (provider, sync) = build_synchronizer(config).await?;
    let block = match block {
        Some(b) => b,
        None => get_latest_block(&provider).await?,
    };

    info!(block, entities = config.tracked_entities().len(), "Regenerating snapshot");
    sync.initialize(block).await?;

    let snapshots = sync
        .entities()
        .into_iter()
        .map(|entity| sync.get_snapshot(entity, block))
        .collect::<SyncResult<Vec<_>>>()?;

    if json {
        let views: Vec<&Snapshot> = snapshots.iter().map(AsRef::as_ref).collect();
        let json = serde_json::to_string_pretty(&views)
            .map_err(|e| SyncError::decoding("Failed to serialize snapshots", Some(Box::new(e))))?;
        println!("{json}");
    } else {
        if snapshots.is_empty() {
            println!("{}", "No entities tracked at this block.".yellow().bold());
        }
        for snapshot in &snapshots {
            print_snapshot(snapshot);
        }
    }
    Ok(())
}

async fn run_quote_command(
    config: &Config,
    entity: Address,
    request: &QuoteRequest,
    block: Option<u64>,
) -> SyncResult<()> {
    let (provider, sync) = build_synchronizer(config).await?;
    let block = match block {
        Some(b) => b,
        None => get_latest_block(&provider).await?,
    };
    let timestamp = block_timestamp(&provider, block).await?;

    sync.initialize(block).await?;
    let quote = sync.quote(entity, block, timestamp, request);
    print_quote(block, request, &quote);
    Ok(())
}

async fn run_watch_command(config: &Config, interval: u64, start_block: Option<u64>) -> SyncResult<()> {
    info!("Starting watch mode");
    println!("{}", "🔍 Following the chain...".cyan().bold());
    println!();

    let (provider, sync) = build_synchronizer(config).await?;
    let start = match start_block {
        Some(b) => b,
        None => get_latest_block(&provider).await?,
    };

    let retry = RetryPolicy::default();
    let init = &sync;
    crate::sync::retry_with_backoff(&retry, "initialize", SyncError::is_regeneration, move || {
        init.initialize(start)
    })
    .await?;
    println!(
        "{} Initialized {} entities at block {}",
        "✅".green(),
        sync.entities().len(),
        start.to_string().yellow()
    );

    let feed = RpcBlockFeed::new(provider, config.log_addresses(), config.batch_size());
    let mut follower = ChainFollower::new(
        feed,
        Arc::clone(&sync),
        start,
        config.resync_interval_blocks(),
        retry,
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                println!();
                println!("{}", "🛑 Shutting down gracefully...".yellow().bold());
                let stats = serde_json::to_string_pretty(&sync.stats())
                    .unwrap_or_else(|e| format!("<stats unavailable: {e}>"));
                println!("{stats}");
                println!("{} Last processed block: {}", "📍".cyan(), follower.next_block().saturating_sub(1));
                break;
            }

            result = follower.poll() => {
                match result {
                    Ok(outcome) => print_poll(&outcome),
                    Err(e) => {
                        error!(error = %e, "Poll failed");
                        println!("{} {}", "⚠️  Error:".red().bold(), e);
                    }
                }
                tokio::time::sleep(Duration::from_secs(interval)).await;
            }
        }
    }

    Ok(())
}

fn print_snapshot(snapshot: &Snapshot) {
    let flags = snapshot.flags();
    let status = if flags.is_disabled() {
        "disabled".red().bold().to_string()
    } else {
        "active".green().to_string()
    };

    match snapshot.state() {
        EntityState::Savings(state) => println!(
            "{} {} [{}] {} | chi: {} | rho: {} | {}: {}",
            "🏦".cyan(),
            snapshot.entity().to_string().blue(),
            state.rate_symbol.as_str(),
            status,
            format_ray(state.chi).magenta(),
            state.rho,
            state.rate_symbol,
            format_ray(state.rate)
        ),
        EntityState::StablePool(state) => {
            let balances: Vec<String> = state
                .balances_live_scaled18
                .iter()
                .map(|b| format_units(*b, 18))
                .collect();
            println!(
                "{} {} [stable] {} | amp: {} | fee: {} | balances: {}",
                "🌊".cyan(),
                snapshot.entity().to_string().blue(),
                status,
                state.amp.end_value,
                format_units(state.swap_fee, 16),
                balances.join(" / ").magenta()
            );
        }
    }
}

fn print_quote(block: u64, request: &QuoteRequest, quote: &Quote) {
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    let direction = match request.side {
        SwapSide::Sell => "sell",
        SwapSide::Buy => "buy",
    };
    match quote {
        Quote::Amount(amount) => println!(
            "{} {} Block: {} | {} {} → {} | amount: {} | quote: {}",
            "💱".cyan(),
            timestamp.to_string().dimmed(),
            block.to_string().yellow(),
            direction,
            request.token_in,
            request.token_out,
            request.amount,
            amount.to_string().green().bold()
        ),
        Quote::Unavailable(reason) => println!(
            "{} {} Block: {} | {} | unavailable: {}",
            "💱".cyan(),
            timestamp.to_string().dimmed(),
            block.to_string().yellow(),
            direction,
            reason.to_string().red().bold()
        ),
    }
}

fn print_poll(outcome: &PollOutcome) {
    if outcome.blocks_applied == 0 && outcome.resyncs.is_empty() {
        return;
    }
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    println!(
        "{} {} Head: {} | blocks: {} | logs: {}",
        "📊".cyan(),
        timestamp.to_string().dimmed(),
        outcome.head.to_string().yellow(),
        outcome.blocks_applied,
        outcome.logs_applied
    );
    for (block, cause) in &outcome.resyncs {
        println!("   {} resync at {} ({:?})", "↻".magenta(), block, cause);
    }
}

/// Render a fixed-point value with `decimals` decimals, to 6 places.
fn format_units(value: U256, decimals: u32) -> String {
    let divisor = U256::from(10u64).pow(U256::from(decimals));
    let whole = value / divisor;
    let frac = value % divisor;
    let frac = if decimals > 6 {
        frac / U256::from(10u64).pow(U256::from(decimals - 6))
    } else {
        frac * U256::from(10u64).pow(U256::from(6 - decimals))
    };
    format!("{whole}.{:0>6}", frac.to_string())
}

fn format_ray(value: U256) -> String {
    format_units(value, 27)
}
