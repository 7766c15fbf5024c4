//! `meshtrust-node init`: write a default configuration.

use clap::Args;
use std::path::Path;

use crate::config::MeshtrustConfig;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing configuration file.
    #[arg(long)]
    pub force: bool,
}

pub fn run(config_path: &Path, args: &InitArgs) -> anyhow::Result<()> {
    if config_path.exists() && !args.force {
        anyhow::bail!("configuration file already exists at {}", config_path.display());
    }

    let config = MeshtrustConfig::default();
    config.save(config_path)?;
    std::fs::create_dir_all(&config.storage.data_dir)?;

    println!("Wrote default configuration to {}", config_path.display());
    println!("Run 'meshtrust-node run' to start the node.");
    Ok(())
}
