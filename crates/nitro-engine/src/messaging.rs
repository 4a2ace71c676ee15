//! Peer-to-peer message delivery.

use crate::error::MessagingError;
use async_trait::async_trait;
use nitro_protocols::Message;
use nitro_types::Address;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Delivers messages to peers.
#[async_trait]
pub trait MessageService: Send + Sync {
    /// Sends `message` to `message.to`.
    async fn send(&self, message: Message) -> Result<(), MessagingError>;
}

/// An in-memory switchboard connecting the nodes of a local network.
///
/// Messages cross the broker as JSON, so every delivered message has been
/// through the same encoding a network transport would apply.
pub struct MessageBroker {
    capacity: usize,
    peers: RwLock<HashMap<Address, mpsc::Sender<Vec<u8>>>>,
}

impl MessageBroker {
    /// Creates a broker whose per-peer inboxes hold up to `capacity` messages.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            peers: RwLock::new(HashMap::new()),
        })
    }

    /// Connects `address`, returning its client and the receiver of its inbound messages.
    pub fn connect(self: &Arc<Self>, address: Address) -> (BrokerClient, mpsc::Receiver<Message>) {
        let (wire_tx, mut wire_rx) = mpsc::channel::<Vec<u8>>(self.capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(self.capacity);
        self.peers.write().insert(address, wire_tx);

        tokio::spawn(async move {
            while let Some(bytes) = wire_rx.recv().await {
                match serde_json::from_slice::<Message>(&bytes) {
                    Ok(message) => {
                        if inbound_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(peer = %address, error = %e, "dropping undecodable message");
                    }
                }
            }
        });

        tracing::debug!(peer = %address, "connected to broker");
        let client = BrokerClient {
            address,
            broker: Arc::clone(self),
        };
        (client, inbound_rx)
    }

    /// Disconnects `address`; later sends to it fail.
    pub fn disconnect(&self, address: &Address) {
        self.peers.write().remove(address);
    }

    fn route(&self, to: &Address) -> Result<mpsc::Sender<Vec<u8>>, MessagingError> {
        self.peers
            .read()
            .get(to)
            .cloned()
            .ok_or(MessagingError::UnknownRecipient(*to))
    }
}

impl std::fmt::Debug for MessageBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBroker")
            .field("peers", &self.peers.read().len())
            .finish()
    }
}

/// One node's connection to a [`MessageBroker`].
#[derive(Debug, Clone)]
pub struct BrokerClient {
    address: Address,
    broker: Arc<MessageBroker>,
}

impl BrokerClient {
    /// The address this client sends from.
    pub fn address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl MessageService for BrokerClient {
    async fn send(&self, message: Message) -> Result<(), MessagingError> {
        let to = message.to;
        let route = self.broker.route(&to)?;
        let bytes =
            serde_json::to_vec(&message).map_err(|e| MessagingError::Codec(e.to_string()))?;
        tracing::trace!(from = %self.address, %to, bytes = bytes.len(), "sending message");
        route
            .send(bytes)
            .await
            .map_err(|_| MessagingError::Disconnected(to))
    }
}
