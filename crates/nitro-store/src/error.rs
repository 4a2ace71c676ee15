//! Store error types.

use nitro_protocols::ObjectiveId;
use nitro_types::ChannelId;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Another running objective already owns the channel.
    #[error("channel {channel} is owned by objective {owner}")]
    ChannelOwnedByOther {
        /// The contested channel.
        channel: ChannelId,
        /// Its current owner.
        owner: ObjectiveId,
    },
}

/// A specialized Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
