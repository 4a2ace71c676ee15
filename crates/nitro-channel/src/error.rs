//! Channel and ledger error types.

use nitro_crypto::CryptoError;
use nitro_types::{Address, ChannelId, Destination};
use thiserror::Error;

/// Errors raised while building or updating a [`Channel`](crate::Channel).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Signing or recovery failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A signature recovered to an address outside the participant list.
    #[error("signer {0} is not a participant of the channel")]
    NonParticipantSigner(Address),

    /// Two signed states for the same turn disagree.
    #[error("cannot merge signatures of differing states")]
    StateMismatch,

    /// A channel needs at least two participants.
    #[error("a channel needs at least two participants, got {0}")]
    TooFewParticipants(usize),

    /// The participant index is outside the participant list.
    #[error("participant index {index} out of range for {participants} participants")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of participants.
        participants: usize,
    },

    /// A state carried an unexpected turn number.
    #[error("unexpected turn number: expected {expected}, got {got}")]
    UnexpectedTurnNum {
        /// Expected turn number.
        expected: u64,
        /// Turn number found.
        got: u64,
    },

    /// No state has been signed by every participant yet.
    #[error("channel {0} has no supported state")]
    NoSupportedState(ChannelId),

    /// A freshly signed state was not accepted by the channel.
    #[error("could not add signed state at turn {0}")]
    StateNotAdded(u64),

    /// The ledger could not be expressed as a channel.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
}

/// Errors raised by the leader/follower ledger protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// Signing or recovery failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Only the leader may propose or receive countersignatures.
    #[error("method may only be called by the channel leader")]
    NotLeader,

    /// Only the follower may receive or countersign proposals.
    #[error("method may only be called by the channel follower")]
    NotFollower,

    /// A proposal targeted a different ledger channel.
    #[error("proposal is for ledger {got}, not {expected}")]
    IncorrectChannelId {
        /// This ledger's id.
        expected: ChannelId,
        /// The proposal's ledger id.
        got: ChannelId,
    },

    /// A signature recovered to the wrong participant.
    #[error("proposal signed by {got}, expected {expected}")]
    WrongSigner {
        /// Required signer.
        expected: Address,
        /// Recovered signer.
        got: Address,
    },

    /// A countersignature referred to a turn the queue never reaches.
    #[error("proposal queue exhausted before reaching turn {0}")]
    ProposalQueueExhausted(u64),

    /// There is no queued proposal to act on.
    #[error("proposal queue is empty")]
    EmptyProposalQueue,

    /// A proposal's claimed turn disagrees with the replayed ledger.
    #[error("invalid turn number: expected {expected}, got {got}")]
    InvalidTurnNum {
        /// Turn implied by replaying the queue.
        expected: u64,
        /// Turn claimed by the proposal.
        got: u64,
    },

    /// A proposal skipped too far ahead of the queue to be held.
    #[error("proposal for turn {turn_num} is too far ahead of turn {latest}")]
    ProposalTooFarAhead {
        /// Turn claimed by the proposal.
        turn_num: u64,
        /// Latest queued or committed turn.
        latest: u64,
    },

    /// The queued proposal is not the one the caller expected to sign.
    #[error("next proposal in the queue does not match the expected proposal")]
    NonMatchingProposal,

    /// A guarantee for the target already exists.
    #[error("duplicate guarantee for target {0}")]
    DuplicateGuarantee(ChannelId),

    /// No guarantee exists for the target.
    #[error("no guarantee found for target {0}")]
    GuaranteeNotFound(ChannelId),

    /// A balance cannot cover the requested deposit.
    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds {
        /// Current balance.
        balance: nitro_types::Amount,
        /// Amount requested.
        required: nitro_types::Amount,
    },

    /// Deposit or payout amounts don't sum to the guarantee amount.
    #[error("amounts do not sum to the guarantee amount {0}")]
    InvalidAmount(nitro_types::Amount),

    /// A guarantee names a destination that is not one of the ledger's balances.
    #[error("destination {0} is not a ledger participant")]
    InvalidDestination(Destination),

    /// A ledger channel has exactly two participants.
    #[error("a ledger channel has exactly two participants, got {0}")]
    InvalidParticipants(usize),

    /// The outcome cannot be represented as a ledger outcome.
    #[error("invalid ledger outcome: {0}")]
    InvalidOutcome(String),
}

/// A specialized Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
