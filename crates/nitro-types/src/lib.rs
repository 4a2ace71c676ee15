//! Common types used throughout `nitro`.
//!
//! Addresses, destinations and asset holdings shared by the channel,
//! protocol and engine crates.

mod address;
mod error;
mod funds;

pub use address::{Address, ChannelId, Destination};
pub use error::{Result, TypesError};
pub use funds::Funds;

use sha2::{Digest, Sha256};

/// Token amounts. Every balance, deposit and guarantee is denominated in this type.
pub type Amount = u128;

/// A 32-byte digest.
pub type Bytes32 = [u8; 32];

/// The asset address of the chain's native token.
pub const NATIVE_ASSET: Address = Address::ZERO;

/// SHA-256 digest of `data`.
pub fn hash(data: &[u8]) -> Bytes32 {
    Sha256::digest(data).into()
}
