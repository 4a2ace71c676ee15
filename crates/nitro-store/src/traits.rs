//! The store interface the engine persists through.

use crate::Result;
use nitro_channel::{Channel, ConsensusChannel};
use nitro_crypto::SecretKey;
use nitro_protocols::{Objective, ObjectiveId};
use nitro_types::{Address, ChannelId};

/// Durable state of one node.
///
/// Every running objective owns exactly one channel. Ledger channels are shared
/// between objectives, so the store keeps the authoritative copy and refreshes
/// each objective's copies when it is read back.
pub trait Store: Send + Sync {
    /// The node's address.
    fn address(&self) -> Address;

    /// The key the node signs channel states with.
    fn channel_secret_key(&self) -> SecretKey;

    /// Retrieves an objective, with its ledgers refreshed.
    fn get_objective_by_id(&self, id: &ObjectiveId) -> Result<Option<Objective>>;

    /// Persists an objective together with its owned channel and ledgers.
    ///
    /// A non-terminal objective claims ownership of its channel; claiming a channel
    /// owned by a different objective fails.
    fn set_objective(&self, objective: &Objective) -> Result<()>;

    /// Retrieves the objective that owns `channel_id`.
    fn get_objective_by_channel_id(&self, channel_id: &ChannelId) -> Result<Option<Objective>>;

    /// Frees a channel so another objective can claim it.
    fn release_channel_from_ownership(&self, channel_id: &ChannelId) -> Result<()>;

    /// Retrieves a channel.
    fn get_channel_by_id(&self, id: &ChannelId) -> Result<Option<Channel>>;

    /// Persists a channel.
    fn set_channel(&self, channel: &Channel) -> Result<()>;

    /// Removes a channel.
    fn destroy_channel(&self, id: &ChannelId) -> Result<()>;

    /// Retrieves a ledger by id.
    fn get_consensus_channel_by_id(&self, id: &ChannelId) -> Result<Option<ConsensusChannel>>;

    /// Retrieves my ledger with `counterparty`.
    fn get_consensus_channel(&self, counterparty: &Address) -> Result<Option<ConsensusChannel>>;

    /// Persists a ledger.
    fn set_consensus_channel(&self, ledger: &ConsensusChannel) -> Result<()>;

    /// Removes a ledger.
    fn destroy_consensus_channel(&self, id: &ChannelId) -> Result<()>;
}
