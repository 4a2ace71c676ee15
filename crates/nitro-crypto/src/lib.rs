//! # Nitro Crypto
//!
//! secp256k1 keys and recoverable signatures. Every channel state, ledger
//! proposal and voucher is signed with a [`SecretKey`] and attributed to a
//! participant by recovering the signer's [`Address`](nitro_types::Address).
//!
//! ```rust
//! use nitro_crypto::SecretKey;
//!
//! let key = SecretKey::generate();
//! let digest = [7u8; 32];
//! let signature = key.sign_hash(&digest);
//! assert_eq!(signature.recover_signer(&digest).unwrap(), key.address());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod secret_key;
mod signature;

pub use error::{CryptoError, Result};
pub use secret_key::SecretKey;
pub use signature::Signature;

use nitro_types::Address;
use once_cell::sync::Lazy;
use secp256k1::{All, PublicKey, Secp256k1};
use sha3::{Digest, Keccak256};

pub(crate) static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Derives the account address of a public key: the last 20 bytes of the
/// Keccak-256 digest of the uncompressed key without its prefix byte.
pub fn address_of(public_key: &PublicKey) -> Address {
    let uncompressed = public_key.serialize_uncompressed();
    let digest = Keccak256::digest(&uncompressed[1..]);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest[12..]);
    Address::from_bytes(bytes)
}
