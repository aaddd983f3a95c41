//! coingod node - command-line front end for the coingod ledger core.
//!
//! Opens the chain under the configured data directory and drives it from
//! block files, printing status and exporting the canonical chain.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod config;
mod node;

use config::NodeConfig;
use node::Node;

/// coingod ledger node.
#[derive(Parser, Debug)]
#[command(name = "coingod-node")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "coingod-node.toml")]
    config: PathBuf,

    /// Data directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Network profile (mainnet, wisdom, solonet)
    #[arg(short, long)]
    network: Option<String>,

    /// Log level, overridden by RUST_LOG when set
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the data directory and commit the genesis block
    Init {
        /// Also write the effective configuration to the config path
        #[arg(long)]
        write_config: bool,
    },
    /// Print the chain tip, finality and UTXO set size
    Status,
    /// Print the effective network parameters as TOML
    Params,
    /// Import hex-encoded blocks, one per line
    Import {
        /// Block file, or `-` for stdin
        file: PathBuf,
    },
    /// Export canonical blocks as hex lines to stdout
    Export {
        #[arg(long, default_value = "1")]
        from: u64,
        #[arg(long, default_value_t = u64::MAX)]
        to: u64,
    },
    /// Validate a hex-encoded transaction against the current tip
    CheckTx {
        /// Transaction bytes in hex
        tx: String,
    },
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = NodeConfig::load(&args.config, &args)?;
    init_logging(&config.log_level)?;

    info!("Starting coingod node v{}", env!("CARGO_PKG_VERSION"));
    info!("Network: {}", config.network);
    info!("Data directory: {:?}", config.data_dir);

    match args.command {
        Command::Params => {
            let params = config.network_params()?;
            print!("{}", toml::to_string_pretty(&params)?);
        }
        Command::Init { write_config } => {
            let node = Node::open(config.clone())?;
            if write_config {
                config
                    .save(&args.config)
                    .with_context(|| format!("Failed to write {}", args.config.display()))?;
            }
            let status = node.status()?;
            println!("initialized {} at height {}", status.network, status.best_height);
            println!("genesis: {}", status.best_hash);
        }
        Command::Status => {
            let node = Node::open(config)?;
            println!("{}", node.status()?);
        }
        Command::Import { file } => {
            let node = Node::open(config)?;
            let summary = if file.as_os_str() == "-" {
                node.import_blocks(io::stdin().lock())?
            } else {
                let f = File::open(&file)
                    .with_context(|| format!("Failed to open {}", file.display()))?;
                node.import_blocks(BufReader::new(f))?
            };
            println!("{summary:?}");
            println!("{}", node.status()?);
        }
        Command::Export { from, to } => {
            let node = Node::open(config)?;
            let written = node.export_blocks(io::stdout().lock(), from, to)?;
            info!(written, "Export finished");
        }
        Command::CheckTx { tx } => {
            let node = Node::open(config)?;
            let validated = node.submit_transaction(&tx)?;
            println!("tx id:       {}", validated.tx_id);
            println!("fee:         {}", validated.fee);
            println!("size:        {}", validated.size);
            println!("vm gas:      {}", validated.vm_gas);
            println!("storage gas: {}", validated.storage_gas);
        }
    }

    Ok(())
}
