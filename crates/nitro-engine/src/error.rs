//! Error types for the engine and its collaborators.

use nitro_protocols::{ObjectiveId, ProtocolError};
use nitro_store::StoreError;
use nitro_types::{Address, Amount, ChannelId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a [`ChainService`](crate::ChainService).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The adjudicator refused the transaction.
    #[error("invalid transaction for {channel}: {reason}")]
    InvalidTransaction {
        /// Channel the transaction targeted.
        channel: ChannelId,
        /// Why it was refused.
        reason: String,
    },

    /// No challenge is registered for the channel.
    #[error("no challenge registered for {0}")]
    NoChallenge(ChannelId),
}

/// Errors raised by a [`MessageService`](crate::MessageService).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessagingError {
    /// Nobody with this address is connected.
    #[error("unknown recipient {0}")]
    UnknownRecipient(Address),

    /// The recipient stopped reading.
    #[error("recipient {0} disconnected")]
    Disconnected(Address),

    /// The message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

/// Errors raised by a [`PaymentManager`](crate::PaymentManager).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// The channel was never registered.
    #[error("payment channel {0} not registered")]
    UnknownChannel(ChannelId),

    /// Only the payer can issue vouchers.
    #[error("{0} is not the payer of this channel")]
    NotPayer(Address),

    /// The voucher was not signed by the payer.
    #[error("voucher for {channel} signed by {signer}, expected {payer}")]
    InvalidSigner {
        /// Channel the voucher pays through.
        channel: ChannelId,
        /// Recovered signer.
        signer: Address,
        /// Registered payer.
        payer: Address,
    },

    /// The cumulative amount exceeds the payer's deposit.
    #[error("voucher for {requested} exceeds the {available} available")]
    InsufficientBalance {
        /// Cumulative amount requested.
        requested: Amount,
        /// Payer's starting balance.
        available: Amount,
    },

    /// The voucher signature is malformed.
    #[error("invalid voucher signature: {0}")]
    Signature(String),
}

/// Errors that can occur while running the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An objective rejected its input.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The chain refused a transaction.
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    /// A message could not be delivered.
    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),

    /// A voucher was refused.
    #[error("payment error: {0}")]
    Payment(#[from] PaymentError),

    /// An objective with this id is already running.
    #[error("objective {0} already exists")]
    ObjectiveExists(ObjectiveId),

    /// No objective with this id is stored.
    #[error("objective {0} not found")]
    ObjectiveNotFound(ObjectiveId),

    /// No channel with this id is stored.
    #[error("channel {0} not found")]
    ChannelNotFound(ChannelId),

    /// No ledger channel with this id is stored.
    #[error("ledger channel {0} not found")]
    LedgerNotFound(ChannelId),

    /// The engine is no longer running.
    #[error("engine stopped")]
    Stopped,
}

/// Coarse error classes the [`ErrorPolicy`](crate::ErrorPolicy) decides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Input for an objective the node does not know.
    ObjectiveNotFound,
    /// Duplicate objective request.
    ObjectiveExists,
    /// Direct funding with a counterparty that already shares a ledger.
    LedgerChannelExists,
    /// Voucher creation or verification failed.
    Voucher,
    /// Any other protocol violation.
    Protocol,
    /// Persistence failure.
    Store,
    /// Chain submission failure.
    Chain,
    /// Message delivery failure.
    Messaging,
    /// The engine itself stopped.
    Internal,
}

impl EngineError {
    /// The category the error policy decides on.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Protocol(ProtocolError::LedgerChannelExists(_)) => {
                ErrorCategory::LedgerChannelExists
            }
            Self::Protocol(_) => ErrorCategory::Protocol,
            Self::Store(_) => ErrorCategory::Store,
            Self::Chain(_) => ErrorCategory::Chain,
            Self::Messaging(_) => ErrorCategory::Messaging,
            Self::Payment(_) => ErrorCategory::Voucher,
            Self::ObjectiveExists(_) => ErrorCategory::ObjectiveExists,
            Self::ObjectiveNotFound(_) => ErrorCategory::ObjectiveNotFound,
            Self::ChannelNotFound(_) | Self::LedgerNotFound(_) => ErrorCategory::Store,
            Self::Stopped => ErrorCategory::Internal,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
