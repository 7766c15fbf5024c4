//! `meshtrust-node run`: start the node and wait for ctrl-c.

use clap::Args;

use crate::config::MeshtrustConfig;
use crate::node::MeshtrustNode;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Override the listen port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Additional peer to dial (`host:port`). May be repeated.
    #[arg(long = "peer")]
    pub peers: Vec<String>,
}

pub async fn run(mut config: MeshtrustConfig, args: &RunArgs) -> anyhow::Result<()> {
    if let Some(port) = args.port {
        config.network.port = port;
    }
    config.network.peers.extend(args.peers.iter().cloned());

    tracing::info!("meshtrust node v{}", env!("CARGO_PKG_VERSION"));

    let mut node = MeshtrustNode::new(config)?;
    node.start().await?;

    tokio::select! {
        result = node.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "node loop error");
            }
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("initiating graceful shutdown");
        }
    }

    node.shutdown().await?;
    tracing::info!("meshtrust node exited cleanly");
    Ok(())
}
