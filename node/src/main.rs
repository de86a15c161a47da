// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # MAPP Relay Node
//!
//! Entry point for the `mapp-node` binary. Parses CLI arguments,
//! initializes logging and metrics, wires the relay to a ledger and a
//! price feed, and serves the HTTP/WS API.
//!
//! The binary supports four subcommands:
//!
//! - `run`    : start the relay
//! - `init`   : generate a fee-payer key file
//! - `status` : query a running relay's status endpoint
//! - `version`: print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use mapp_protocol::config::{RelayConfig, PROTOCOL_VERSION};
use mapp_protocol::crypto::Keypair;
use mapp_protocol::pricing::{BluelyticsFeed, FixedRateFeed, PriceFeed};
use mapp_protocol::qr::MerchantDirectory;
use mapp_protocol::{LedgerClient, LocalLedger, RelayProtocol, RpcLedger};

use cli::{Commands, MappNodeCli};
use metrics::NodeMetrics;

/// How long to let socket writers flush their close frames on shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = MappNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the relay: API server, metrics endpoint and event consumer.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, args.log_format);

    anyhow::ensure!(
        args.session_timeout_secs > 0,
        "session timeout must be at least one second"
    );

    let fee_payer = load_fee_payer(&args)?;
    tracing::info!(
        port = args.port,
        metrics_port = args.metrics_port,
        fee_payer = %fee_payer.public_key(),
        session_timeout_secs = args.session_timeout_secs,
        "starting mapp-node"
    );

    // --- Ledger ---
    let ledger = build_ledger(&args, fee_payer);

    // --- Relay ---
    let config = RelayConfig {
        session_timeout: Duration::from_secs(args.session_timeout_secs),
        close_on_invalid_session: args.close_on_invalid_session,
        ..RelayConfig::default()
    };
    let protocol = RelayProtocol::new(config, ledger);

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    let metrics_task = tokio::spawn(metrics::record_events(
        Arc::clone(&node_metrics),
        protocol.events().subscribe(),
    ));

    // --- Price feed ---
    let price_feed: Arc<dyn PriceFeed> = match args.fixed_ars_rate {
        Some(rate) => {
            tracing::warn!(rate, "using a fixed ARS/USD rate");
            Arc::new(FixedRateFeed(rate))
        }
        None => Arc::new(BluelyticsFeed::new()),
    };

    // --- Merchants ---
    let merchants = match &args.merchants_file {
        Some(path) => load_merchants(path)?,
        None => MerchantDirectory::new(),
    };
    tracing::info!(merchants = merchants.len(), "merchant directory loaded");

    // --- API server ---
    let app_state = api::AppState::new(Arc::clone(&protocol), price_feed)
        .with_merchants(Arc::new(merchants));
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = metrics::metrics_router(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "API server error");
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "metrics server error");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    let closed = protocol.shutdown();
    tracing::info!(connections = closed, "closing relay connections");
    tokio::time::sleep(SHUTDOWN_DRAIN).await;

    metrics_task.abort();
    tracing::info!("mapp-node stopped");
    Ok(())
}

/// Fee payer from `--fee-payer-key`, `--fee-payer-key-file`, or a fresh
/// ephemeral key when neither is given.
fn load_fee_payer(args: &cli::RunArgs) -> Result<Keypair> {
    if let Some(encoded) = &args.fee_payer_key {
        return Keypair::from_base58(encoded.trim()).context("invalid fee-payer key");
    }
    if let Some(path) = &args.fee_payer_key_file {
        return read_key_file(path);
    }
    let keypair = Keypair::generate();
    tracing::warn!(
        fee_payer = %keypair.public_key(),
        "no fee-payer key configured, using an ephemeral key"
    );
    Ok(keypair)
}

fn build_ledger(args: &cli::RunArgs, fee_payer: Keypair) -> Arc<dyn LedgerClient> {
    match &args.ledger_url {
        Some(url) => {
            tracing::info!(url = %url, "using JSON-RPC ledger");
            let mut ledger = RpcLedger::new(url.clone(), fee_payer);
            if let Some(base) = &args.explorer_url {
                ledger = ledger.with_explorer_base(base.clone());
            }
            Arc::new(ledger)
        }
        None => {
            tracing::warn!("no ledger URL configured, using the in-process devnet ledger");
            let mut ledger = LocalLedger::new(fee_payer);
            if let Some(base) = &args.explorer_url {
                ledger = ledger.with_explorer_base(base.clone());
            }
            Arc::new(ledger)
        }
    }
}

fn read_key_file(path: &Path) -> Result<Keypair> {
    let encoded = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read fee-payer key from {}", path.display()))?;
    Keypair::from_base58(encoded.trim())
        .with_context(|| format!("invalid fee-payer key in {}", path.display()))
}

fn load_merchants(path: &Path) -> Result<MerchantDirectory> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read merchants from {}", path.display()))?;
    MerchantDirectory::from_json(&json)
        .with_context(|| format!("invalid merchant directory in {}", path.display()))
}

/// Writes `keypair` to `path` as base58, owner-readable only.
fn write_key_file(path: &Path, keypair: &Keypair, force: bool) -> Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .with_context(|| format!("failed to create key file {}", path.display()))?;
    file.write_all(keypair.to_base58().as_bytes())
        .with_context(|| format!("failed to write key file {}", path.display()))?;

    // `mode` only applies on creation; an overwritten file keeps its old bits.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Generates a fee-payer keypair and writes it to disk.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("mapp_node=info", logging::LogFormat::Pretty);

    let keypair = Keypair::generate();
    write_key_file(&args.output, &keypair, args.force)?;

    tracing::info!(
        public_key = %keypair.public_key(),
        key_path = %args.output.display(),
        "fee-payer keypair generated"
    );

    println!("Fee payer initialized.");
    println!("  Key file   : {}", args.output.display());
    println!("  Public key : {}", keypair.public_key());
    println!("Fund this address with SOL before starting the relay.");

    Ok(())
}

/// Queries a running relay's status endpoint and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/status", args.url.trim_end_matches('/'));
    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach {}", url))?
        .error_for_status()
        .with_context(|| format!("{} returned an error", url))?;
    let body: serde_json::Value = response
        .json()
        .await
        .context("status response was not JSON")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("mapp-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol  {}", PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
