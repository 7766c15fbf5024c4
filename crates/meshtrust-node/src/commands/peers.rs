//! `meshtrust-node peers`: operator trust decisions.
//!
//! Talks to the running node's admin API so decisions apply immediately.
//! With `--offline` it opens the trust database directly instead, which only
//! works while no node holds it open.

use clap::{Args, Subcommand};
use std::net::IpAddr;

use meshtrust_core::{PeerId, TrustRecord};
use meshtrust_store::TrustStore;

use crate::client::AdminClient;
use crate::config::MeshtrustConfig;

#[derive(Args, Debug)]
pub struct PeersArgs {
    /// Admin API endpoint of the running node. Defaults to the configured one.
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Edit the trust database directly. The node must be stopped.
    #[arg(long)]
    pub offline: bool,

    #[command(subcommand)]
    pub action: PeersAction,
}

#[derive(Subcommand, Debug)]
pub enum PeersAction {
    /// List every known peer.
    List {
        /// Only peers waiting for a decision.
        #[arg(long)]
        pending: bool,
    },
    /// Trust a peer ahead of its approval of us.
    Add {
        peer_id: PeerId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        address: Option<IpAddr>,
    },
    /// Approve a peer waiting in `PendingInbound`.
    Approve { peer_id: PeerId },
    /// Refuse a pending peer.
    Reject { peer_id: PeerId },
    /// Block a peer. Takes effect on the next packet.
    Block { peer_id: PeerId },
    /// Unblock a peer. It returns to `PendingInbound`.
    Unblock { peer_id: PeerId },
    /// Forget a peer entirely.
    Remove { peer_id: PeerId },
    /// Set a peer's display name.
    Rename { peer_id: PeerId, name: String },
    /// Assign the virtual address routed to a peer.
    Assign {
        peer_id: PeerId,
        /// Omit to clear the assignment.
        address: Option<IpAddr>,
    },
}

pub async fn run(config: &MeshtrustConfig, args: &PeersArgs) -> anyhow::Result<()> {
    if args.offline {
        let store = TrustStore::open_rocksdb(&config.trust_db_path())?;
        return execute(&store, &args.action);
    }
    let endpoint = args.endpoint.clone().unwrap_or_else(|| config.api_endpoint());
    execute_remote(&AdminClient::new(endpoint)?, &args.action).await
}

async fn execute_remote(client: &AdminClient, action: &PeersAction) -> anyhow::Result<()> {
    match action {
        PeersAction::List { pending } => {
            let status = client.status().await?;
            println!("node {} ({} peers, {} pending)", status.peer_id, status.peer_count, status.pending_count);
            print_records(&client.list(*pending).await?);
        }
        PeersAction::Add {
            peer_id,
            name,
            address,
        } => {
            let record = client.add(peer_id, name.clone(), *address).await?;
            println!("{} {}", record.peer_id, record.status);
        }
        PeersAction::Approve { peer_id } => print_decision(client.decide(peer_id, "approve").await?),
        PeersAction::Reject { peer_id } => print_decision(client.decide(peer_id, "reject").await?),
        PeersAction::Block { peer_id } => print_decision(client.decide(peer_id, "block").await?),
        PeersAction::Unblock { peer_id } => print_decision(client.decide(peer_id, "unblock").await?),
        PeersAction::Remove { peer_id } => {
            client.remove(peer_id).await?;
            println!("{} removed", peer_id);
        }
        PeersAction::Rename { peer_id, name } => {
            client.rename(peer_id, name).await?;
        }
        PeersAction::Assign { peer_id, address } => {
            client.assign(peer_id, *address).await?;
        }
    }
    Ok(())
}

fn print_decision(decision: crate::api::DecisionResponse) {
    println!("{} {}", decision.peer_id, decision.status);
}

fn execute(store: &TrustStore, action: &PeersAction) -> anyhow::Result<()> {
    match action {
        PeersAction::List { pending } => {
            let records = if *pending {
                store.pending_inbound()
            } else {
                store.list_peers()
            };
            print_records(&records);
        }
        PeersAction::Add {
            peer_id,
            name,
            address,
        } => {
            let public_key = peer_id.public_key_bytes()?;
            let record = store.add_pending_outbound(peer_id, public_key, name.clone())?;
            if address.is_some() {
                store.assign_address(peer_id, *address)?;
            }
            println!("{} {}", record.peer_id, record.status);
        }
        PeersAction::Approve { peer_id } => println!("{} {}", peer_id, store.approve(peer_id)?),
        PeersAction::Reject { peer_id } => println!("{} {}", peer_id, store.reject(peer_id)?),
        PeersAction::Block { peer_id } => println!("{} {}", peer_id, store.block(peer_id)?),
        PeersAction::Unblock { peer_id } => println!("{} {}", peer_id, store.unblock(peer_id)?),
        PeersAction::Remove { peer_id } => {
            if store.remove(peer_id)? {
                println!("{} removed", peer_id);
            } else {
                anyhow::bail!("unknown peer {}", peer_id);
            }
        }
        PeersAction::Rename { peer_id, name } => store.set_display_name(peer_id, name)?,
        PeersAction::Assign { peer_id, address } => store.assign_address(peer_id, *address)?,
    }
    Ok(())
}

fn print_records(records: &[TrustRecord]) {
    if records.is_empty() {
        println!("(no peers)");
        return;
    }
    println!(
        "{:<43}  {:<16}  {:<15}  {:<16}  LAST HANDSHAKE",
        "PEER ID", "STATUS", "NAME", "ADDRESS"
    );
    for r in records {
        let address = r.assigned_address.map(|a| a.to_string()).unwrap_or_else(|| "-".into());
        let last = r
            .last_handshake_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".into());
        println!(
            "{:<43}  {:<16}  {:<15}  {:<16}  {}",
            r.peer_id.as_str(),
            r.status.to_string(),
            r.display_name,
            address,
            last
        );
    }
}
