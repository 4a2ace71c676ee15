//! Protocol error types.

use crate::ObjectiveId;
use nitro_channel::{ChannelError, ConsensusError};
use nitro_types::{Address, Amount, ChannelId};
use thiserror::Error;

/// Errors raised while constructing or driving an objective.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A channel-level invariant was violated.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// A ledger-consensus invariant was violated.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    /// Crank was called before the objective was approved.
    #[error("objective {0} is not approved")]
    NotApproved(ObjectiveId),

    /// Objectives cannot start from a final state.
    #[error("cannot start an objective from a final state")]
    FinalInitialState,

    /// My address is not among the channel participants.
    #[error("{0} is not a participant of the channel")]
    NotParticipant(Address),

    /// A ledger channel with the counterparty already exists.
    #[error("a ledger channel with {0} already exists")]
    LedgerChannelExists(Address),

    /// A required ledger channel with a neighbour is missing.
    #[error("no ledger channel with {0}")]
    MissingLedger(Address),

    /// An event or payload referred to a channel the objective does not manage.
    #[error("event channelId out of scope of objective")]
    EventOutOfScope,

    /// A payload was delivered to the wrong objective.
    #[error("payload for objective {got} delivered to objective {expected}")]
    ObjectiveIdMismatch {
        /// The objective handling the payload.
        expected: ObjectiveId,
        /// The objective named by the payload.
        got: ObjectiveId,
    },

    /// A proposal named a ledger the objective is not connected to.
    #[error("ledger {0} is not connected to this objective")]
    LedgerOutOfScope(ChannelId),

    /// A defunding payload did not carry the expected final state.
    #[error("expected a final state at turn {expected}, got turn {got} (final: {is_final})")]
    UnexpectedFinalState {
        /// Expected turn number.
        expected: u64,
        /// Turn number received.
        got: u64,
        /// Whether the received state was final.
        is_final: bool,
    },

    /// The final outcome pays less than the payee already holds vouchers for.
    #[error("payment of {paid} is less than the {minimum} already received")]
    InsufficientPayment {
        /// Amount the final state pays.
        paid: Amount,
        /// Amount the payee has vouchers for.
        minimum: Amount,
    },

    /// The payment exceeds what the payer deposited.
    #[error("payment of {paid} exceeds the payer's deposit of {available}")]
    PaymentExceedsDeposit {
        /// Amount paid.
        paid: Amount,
        /// Payer's deposit.
        available: Amount,
    },

    /// A ledger does not hold a guarantee for the channel being defunded.
    #[error("ledger {ledger} does not fund channel {target}")]
    GuaranteeMissing {
        /// The ledger.
        ledger: ChannelId,
        /// The channel that should be funded.
        target: ChannelId,
    },

    /// A ledger still funds other channels and cannot be closed.
    #[error("ledger {0} still funds other channels")]
    LedgerHasGuarantees(ChannelId),

    /// A ledger cannot afford the guarantee a virtual channel needs.
    #[error("ledger {ledger} cannot afford the guarantee for {target}")]
    InsufficientLedgerFunds {
        /// The ledger.
        ledger: ChannelId,
        /// The channel to be funded.
        target: ChannelId,
    },

    /// The outcome has a shape the protocol does not support.
    #[error("unsupported outcome: {0}")]
    UnsupportedOutcome(String),

    /// An objective id without a known protocol prefix.
    #[error("unknown objective id: {0}")]
    UnknownObjectiveId(String),
}

/// A specialized Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
