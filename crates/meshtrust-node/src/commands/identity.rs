//! `meshtrust-node identity`: show or reset the local identity.

use clap::{Args, Subcommand};

use meshtrust_crypto::Identity;

use crate::config::MeshtrustConfig;

#[derive(Args, Debug)]
pub struct IdentityArgs {
    #[command(subcommand)]
    pub action: IdentityAction,
}

#[derive(Subcommand, Debug)]
pub enum IdentityAction {
    /// Print the peer id, creating the identity on first use.
    Show,
    /// Delete the identity. A new one is generated on next start, and every
    /// peer must approve the new id again.
    Reset {
        /// Required to confirm the reset.
        #[arg(long)]
        yes: bool,
    },
}

pub fn run(config: &MeshtrustConfig, args: &IdentityArgs) -> anyhow::Result<()> {
    let path = config.keypair_path();
    match &args.action {
        IdentityAction::Show => {
            let identity = Identity::load_or_generate(&path)?;
            println!("peer id:    {}", identity.id());
            println!("public key: {}", identity.public_key().to_hex());
            println!("key file:   {}", path.display());
        }
        IdentityAction::Reset { yes } => {
            if !yes {
                anyhow::bail!("identity reset is irreversible; pass --yes to confirm");
            }
            if Identity::reset(&path)? {
                tracing::warn!(path = %path.display(), "identity reset");
                println!("Identity at {} removed.", path.display());
            } else {
                println!("No identity at {}.", path.display());
            }
        }
    }
    Ok(())
}
