//! Batch Sender
//!
//! Distributes pre-minted NFTs listed in a `mint,recipient` file, or sends a
//! single NFT, using the nft-transfer-runtime pipeline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::{stream, Stream, StreamExt};
use nft_transfer_runtime::{
    event_stream::next_event, read_requests, BatchOrchestrator, CommitmentTier, FailurePolicy,
    KeypairSigner, RpcConnection, TransferRequest,
};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod report;

use config::Config;
use report::{describe_event, render_dry_run, BatchReport};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log level, used when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Transfer every NFT listed in a mint,recipient file
    Run {
        /// Input file with one `mint,recipient` pair per line
        input: PathBuf,

        /// Maximum transfers per chunk; defaults to what one transaction can carry
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Commitment to wait for (processed, confirmed, finalized)
        #[arg(long)]
        commitment: Option<String>,

        /// Keep processing later chunks after a chunk fails
        #[arg(long)]
        continue_on_error: bool,

        /// Resolve accounts and build transactions without sending anything
        #[arg(long)]
        dry_run: bool,

        /// Write a JSON report to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Transfer a single NFT, creating the recipient's account if needed
    Send {
        mint: String,
        recipient: String,

        /// Commitment to wait for (processed, confirmed, finalized)
        #[arg(long)]
        commitment: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting NFT batch sender");

    let mut config = Config::load(args.config.as_deref())?;

    match args.command {
        Command::Run {
            input,
            chunk_size,
            commitment,
            continue_on_error,
            dry_run,
            report,
        } => {
            if let Some(size) = chunk_size {
                config.transfer.max_per_chunk = Some(size);
            }
            apply_commitment(&mut config, commitment.as_deref())?;
            if continue_on_error {
                config.transfer.failure_policy = FailurePolicy::ContinueOnError;
            }
            config.validate()?;
            run_batch(&config, input, dry_run, report).await
        }
        Command::Send {
            mint,
            recipient,
            commitment,
        } => {
            apply_commitment(&mut config, commitment.as_deref())?;
            let request = TransferRequest::parse(&mint, &recipient)?;
            send_one(&config, &request).await
        }
    }
}

fn apply_commitment(config: &mut Config, commitment: Option<&str>) -> Result<()> {
    if let Some(tier) = commitment {
        config.transfer.commitment = tier.parse::<CommitmentTier>()?;
    }
    Ok(())
}

fn orchestrator(config: &Config) -> Result<BatchOrchestrator<RpcConnection, KeypairSigner>> {
    let signer = Arc::new(config.load_signer()?);
    let connection = Arc::new(
        RpcConnection::new(
            config.rpc_url.clone(),
            config.transfer.commitment.as_config(),
            config.transfer.rpc_timeout(),
        )
        .with_skip_preflight(config.transfer.skip_preflight),
    );

    Ok(BatchOrchestrator::new(connection, signer, config.transfer.clone())?)
}

async fn run_batch(
    config: &Config,
    input: PathBuf,
    dry_run: bool,
    report_path: Option<PathBuf>,
) -> Result<()> {
    let parsed = read_requests(&input)
        .with_context(|| format!("Failed to read input file: {}", input.display()))?;
    if !parsed.rejected.is_empty() {
        warn!("{} input rows rejected", parsed.rejected.len());
    }

    let stop = Arc::new(AtomicBool::new(false));
    let orchestrator = orchestrator(config)?.with_stop_flag(stop.clone());
    info!("Sending from {}", orchestrator.sender());

    if dry_run {
        let plan = orchestrator.dry_run(&parsed.requests).await?;
        print!("{}", render_dry_run(&plan));
        if plan.failure.is_some() {
            anyhow::bail!("Dry run found a recipient that cannot receive");
        }
        return Ok(());
    }

    // First Ctrl-C stops between chunks, a second one exits immediately
    let interrupts = stream::unfold((), |()| async {
        signal::ctrl_c().await.ok().map(|()| ((), ()))
    });
    tokio::spawn(async move {
        if watch_interrupts(Box::pin(interrupts), stop).await {
            error!("Second shutdown signal; exiting without waiting for the current chunk");
            std::process::exit(130);
        }
    });

    let mut events = orchestrator.events().subscribe();
    let progress = tokio::spawn(async move {
        while let Some(event) = next_event(&mut events).await {
            if let Some(line) = describe_event(&event) {
                info!("{}", line);
            }
        }
    });

    let result = orchestrator.run(&parsed.requests).await?;
    drop(orchestrator);
    let _ = progress.await;

    let report = BatchReport::new(&parsed, &result);
    print!("{}", report.render());

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    if let Some(failure) = result.terminal_error() {
        error!("Batch failed: {}", failure);
        anyhow::bail!("{} chunk(s) failed", result.failures.len());
    }
    if result.cancelled {
        anyhow::bail!("Batch stopped before completion");
    }
    Ok(())
}

/// Set `stop` on the first signal. Returns `true` when a second signal arrives.
async fn watch_interrupts<S>(mut signals: S, stop: Arc<AtomicBool>) -> bool
where
    S: Stream<Item = ()> + Unpin,
{
    if signals.next().await.is_none() {
        return false;
    }
    warn!("Received shutdown signal; stopping after the current chunk (Ctrl-C again to exit)");
    stop.store(true, Ordering::SeqCst);

    signals.next().await.is_some()
}

async fn send_one(config: &Config, request: &TransferRequest) -> Result<()> {
    let orchestrator = orchestrator(config)?;
    let submission = orchestrator.send_single(request).await?;
    println!(
        "Sent {} to {}: {} ({})",
        request.mint, request.recipient, submission.signature, submission.commitment
    );
    Ok(())
}
