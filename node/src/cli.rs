//! # CLI Interface
//!
//! Defines the command-line argument structure for `mapp-node` using
//! `clap` derive. Supports four subcommands: `run`, `init`, `status`,
//! and `version`. Every `run` flag has a `MAPP_*` environment fallback so
//! the relay can be configured entirely from a container environment.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// MAPP gasless payment relay.
///
/// Pairs a merchant point of sale with a customer wallet over WebSocket,
/// co-signs the customer's payment as fee payer and broadcasts it.
#[derive(Parser, Debug)]
#[command(
    name = "mapp-node",
    about = "MAPP gasless payment relay",
    version,
    propagate_version = true
)]
pub struct MappNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the relay.
    Run(RunArgs),
    /// Generate a fresh fee-payer keypair and write it to a key file.
    Init(InitArgs),
    /// Query the status of a running relay.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Port for the HTTP API and the `/ws` endpoint.
    #[arg(long, env = "MAPP_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "MAPP_METRICS_PORT", default_value_t = 9742)]
    pub metrics_port: u16,

    /// Seconds a session may wait for a client to join.
    #[arg(long, env = "MAPP_SESSION_TIMEOUT_SECS", default_value_t = 60)]
    pub session_timeout_secs: u64,

    /// JSON-RPC endpoint of the ledger. When omitted the relay runs against
    /// an in-process devnet ledger.
    #[arg(long, env = "MAPP_LEDGER_URL")]
    pub ledger_url: Option<String>,

    /// Base58 fee-payer secret key.
    ///
    /// Prefer `--fee-payer-key-file` outside of development.
    #[arg(long, env = "MAPP_FEE_PAYER_KEY", conflicts_with = "fee_payer_key_file")]
    pub fee_payer_key: Option<String>,

    /// File holding the base58 fee-payer secret key, as written by `init`.
    #[arg(long, env = "MAPP_FEE_PAYER_KEY_FILE")]
    pub fee_payer_key_file: Option<PathBuf>,

    /// Explorer URL prefix used to build transaction links.
    #[arg(long, env = "MAPP_EXPLORER_URL")]
    pub explorer_url: Option<String>,

    /// Log output format.
    #[arg(long, env = "MAPP_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Close the connection (4404/4410) when a request names an unknown or
    /// expired session, instead of only replying with an error.
    #[arg(long, env = "MAPP_CLOSE_ON_INVALID_SESSION")]
    pub close_on_invalid_session: bool,

    /// Use a fixed ARS-per-USD rate instead of the live feed.
    #[arg(long, env = "MAPP_FIXED_ARS_RATE")]
    pub fixed_ars_rate: Option<f64>,

    /// JSON file mapping merchant id to name, city, image and timezone,
    /// shown in payment QR codes.
    #[arg(long, env = "MAPP_MERCHANTS_FILE")]
    pub merchants_file: Option<PathBuf>,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Where to write the fee-payer key file.
    #[arg(long, short = 'o', default_value = "fee-payer.key")]
    pub output: PathBuf,

    /// Overwrite an existing key file.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Base URL of the running relay.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub url: String,
}
