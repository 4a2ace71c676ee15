//! In-process nodes sharing one mock chain and message broker.

use crate::error::Result;
use nitro_channel::{Allocation, Exit, SingleAssetExit};
use nitro_crypto::SecretKey;
use nitro_engine::{
    Engine, EngineConfig, EngineError, EngineHandle, EngineServices, MessageBroker, MockChain,
    PermissivePolicy, VoucherManager,
};
use nitro_protocols::{DirectFundRequest, ObjectiveId, ObjectiveRequest};
use nitro_store::MemStore;
use nitro_types::{Address, Amount, Destination, NATIVE_ASSET};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Messages buffered per node before senders wait.
const BROKER_CAPACITY: usize = 256;

/// A chain and broker that every local node shares.
pub struct LocalNetwork {
    /// The shared adjudicator.
    pub chain: Arc<MockChain>,
    broker: Arc<MessageBroker>,
}

impl Default for LocalNetwork {
    fn default() -> Self {
        Self {
            chain: Arc::new(MockChain::default()),
            broker: MessageBroker::new(BROKER_CAPACITY),
        }
    }
}

impl LocalNetwork {
    /// Starts an engine signing with `key` that approves every objective.
    pub fn spawn(&self, key: SecretKey, config: EngineConfig) -> LocalNode {
        let address = key.address();
        let (client, inbound) = self.broker.connect(address);
        let (engine, handle) = Engine::new(
            config,
            EngineServices {
                store: Arc::new(MemStore::new(key)),
                chain: self.chain.clone(),
                messages: Arc::new(client),
                inbound,
                policy: Arc::new(PermissivePolicy),
                payments: Arc::new(VoucherManager::new()),
            },
        );
        tracing::info!(%address, "spawned local node");
        LocalNode {
            handle,
            task: tokio::spawn(engine.run()),
        }
    }
}

/// A running engine and its task.
pub struct LocalNode {
    /// API access.
    pub handle: EngineHandle,
    /// The engine loop.
    pub task: JoinHandle<std::result::Result<(), EngineError>>,
}

impl LocalNode {
    /// The node's address.
    pub fn address(&self) -> Address {
        self.handle.address()
    }

    /// Stops the engine and waits for it to finish.
    pub async fn stop(self) -> Result<()> {
        self.handle.shutdown();
        self.task.await??;
        Ok(())
    }
}

/// A request for a ledger in which both sides deposit `deposit`.
pub fn ledger_request(
    me: Address,
    them: Address,
    deposit: Amount,
    challenge_duration: u32,
) -> ObjectiveRequest {
    ObjectiveRequest::DirectFund(DirectFundRequest {
        counterparty: them,
        challenge_duration,
        outcome: Exit::new(vec![SingleAssetExit {
            asset: NATIVE_ASSET,
            allocations: vec![
                Allocation::simple(Destination::from_address(me), deposit),
                Allocation::simple(Destination::from_address(them), deposit),
            ],
        }]),
        nonce: 0,
        app_definition: Address::ZERO,
    })
}

/// Starts funding a ledger with each of `peers`.
pub async fn open_ledgers(
    node: &EngineHandle,
    peers: &[Address],
    deposit: Amount,
    challenge_duration: u32,
) -> Result<Vec<ObjectiveId>> {
    let mut ids = Vec::with_capacity(peers.len());
    for peer in peers {
        let request = ledger_request(node.address(), *peer, deposit, challenge_duration);
        let id = node.create_objective(request).await?;
        tracing::info!(objective = %id, %peer, deposit, "opening ledger");
        ids.push(id);
    }
    Ok(ids)
}
