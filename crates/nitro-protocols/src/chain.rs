//! Transactions objectives ask the engine to submit, and the adjudicator events
//! they react to.

use nitro_channel::SignedState;
use nitro_types::{Address, Amount, ChannelId, Funds};
use serde::{Deserialize, Serialize};

/// A transaction for the adjudicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainTransaction {
    /// Deposit funds into a channel.
    Deposit {
        /// Channel being funded.
        channel_id: ChannelId,
        /// Amount per asset.
        deposit: Funds,
    },
    /// Conclude a channel with a final state and pay out every allocation.
    WithdrawAll {
        /// Channel being closed.
        channel_id: ChannelId,
        /// Fully signed final state.
        signed_state: SignedState,
    },
    /// Register a challenge with the latest supported state.
    Challenge {
        /// Channel being challenged.
        channel_id: ChannelId,
        /// The state the challenger wants to finalize.
        candidate: SignedState,
    },
}

impl ChainTransaction {
    /// The channel the transaction acts on.
    pub fn channel_id(&self) -> ChannelId {
        match self {
            Self::Deposit { channel_id, .. }
            | Self::WithdrawAll { channel_id, .. }
            | Self::Challenge { channel_id, .. } => *channel_id,
        }
    }
}

/// An event the adjudicator emitted about a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainEvent {
    /// A deposit landed; `now_held` is the channel's new holding of `asset`.
    Deposited {
        /// Channel credited.
        channel_id: ChannelId,
        /// Block the deposit was included in.
        block_num: u64,
        /// Asset deposited.
        asset: Address,
        /// Total now held for the asset.
        now_held: Amount,
    },
    /// Holdings changed after a payout; `amount` is what remains.
    AllocationUpdated {
        /// Channel paid out.
        channel_id: ChannelId,
        /// Block of the payout.
        block_num: u64,
        /// Asset paid out.
        asset: Address,
        /// Remaining holding of the asset.
        amount: Amount,
    },
    /// The channel was finalized on chain.
    Concluded {
        /// Channel concluded.
        channel_id: ChannelId,
        /// Block of conclusion.
        block_num: u64,
    },
    /// A challenge was registered.
    ChallengeRegistered {
        /// Channel challenged.
        channel_id: ChannelId,
        /// Block of registration.
        block_num: u64,
        /// The state the challenge will finalize.
        candidate: SignedState,
    },
}

impl ChainEvent {
    /// The channel the event concerns.
    pub fn channel_id(&self) -> ChannelId {
        match self {
            Self::Deposited { channel_id, .. }
            | Self::AllocationUpdated { channel_id, .. }
            | Self::Concluded { channel_id, .. }
            | Self::ChallengeRegistered { channel_id, .. } => *channel_id,
        }
    }

    /// The block the event was emitted in.
    pub fn block_num(&self) -> u64 {
        match self {
            Self::Deposited { block_num, .. }
            | Self::AllocationUpdated { block_num, .. }
            | Self::Concluded { block_num, .. }
            | Self::ChallengeRegistered { block_num, .. } => *block_num,
        }
    }
}
