//! Nitro node binary.

use clap::Parser;
use nitro_crypto::SecretKey;
use nitro_engine::EngineEvent;
use nitro_node::{init_logging, open_ledgers, LocalNetwork, LocalNode, NodeConfig};
use nitro_types::Address;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;

/// Nitro state-channel node.
#[derive(Parser, Debug)]
#[command(name = "nitro-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level, overriding the configuration file.
    #[arg(long)]
    log_level: Option<String>,

    /// Number of in-process peers to start.
    #[arg(long)]
    local_peers: Option<usize>,

    /// Amount each side deposits into a ledger with every peer.
    #[arg(long)]
    ledger_deposit: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = NodeConfig::load(&args.config)?;
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(peers) = args.local_peers {
        config.local_peers = peers;
    }
    if let Some(deposit) = args.ledger_deposit {
        config.ledger_deposit = deposit;
    }
    validator::Validate::validate(&config)?;

    init_logging(&config.log_level, config.format());
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting nitro node");

    let network = LocalNetwork::default();
    let mut node = network.spawn(config.signing_key()?, config.engine.clone());
    let peers: Vec<LocalNode> = (0..config.local_peers)
        .map(|_| network.spawn(SecretKey::generate(), config.engine.clone()))
        .collect();
    let addresses: Vec<Address> = peers.iter().map(LocalNode::address).collect();
    tracing::info!(address = %node.address(), peers = addresses.len(), "node ready");

    let mut events = node.handle.subscribe();
    if config.ledger_deposit > 0 {
        open_ledgers(
            &node.handle,
            &addresses,
            u128::from(config.ledger_deposit),
            config.challenge_duration,
        )
        .await?;
    }

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                node.handle.shutdown();
                break (&mut node.task).await;
            }
            finished = &mut node.task => break finished,
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "event subscriber lagged"),
                Err(RecvError::Closed) => break (&mut node.task).await,
            },
        }
    };

    for peer in peers {
        if let Err(e) = peer.stop().await {
            tracing::warn!(error = %e, "peer stopped with an error");
        }
    }

    outcome??;
    tracing::info!("node stopped");
    Ok(())
}

fn log_event(event: &EngineEvent) {
    for id in &event.completed_objectives {
        tracing::info!(objective = %id, "objective completed");
    }
    for id in &event.failed_objectives {
        tracing::warn!(objective = %id, "objective failed");
    }
    for ledger in &event.ledger_channel_updates {
        tracing::info!(
            channel = %ledger.id,
            status = ?ledger.status,
            mine = ledger.my_balance,
            theirs = ledger.their_balance,
            "ledger updated"
        );
    }
    for payment in &event.payment_channel_updates {
        tracing::info!(channel = %payment.id, paid = payment.paid_so_far, "payment channel updated");
    }
    for voucher in &event.received_vouchers {
        tracing::info!(channel = %voucher.channel_id, amount = voucher.amount, "voucher received");
    }
}
