//! Meshtrust node: entry point.
//!
//! Subcommands: init, run, identity, peers.

mod api;
mod client;
mod commands;
mod config;
mod node;
mod transport;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use config::MeshtrustConfig;

/// Meshtrust: peer authentication and trust decisions for a mesh VPN.
#[derive(Parser, Debug)]
#[command(name = "meshtrust-node", version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, global = true, default_value = "meshtrust.toml")]
    config: PathBuf,

    /// Override the data directory.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file.
    Init(commands::init::InitArgs),
    /// Run the node.
    Run(commands::run::RunArgs),
    /// Show or reset the local identity.
    Identity(commands::identity::IdentityArgs),
    /// Inspect and decide on peers.
    Peers(commands::peers::PeersArgs),
}

fn init_tracing(config: &MeshtrustConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Init(args) = &cli.command {
        return commands::init::run(&cli.config, args);
    }

    let mut config = MeshtrustConfig::load(&cli.config)?;
    if let Some(ref data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_tracing(&config);

    match &cli.command {
        Commands::Init(_) => Ok(()),
        Commands::Run(args) => commands::run::run(config, args).await,
        Commands::Identity(args) => commands::identity::run(&config, args),
        Commands::Peers(args) => commands::peers::run(&config, args).await,
    }
}
