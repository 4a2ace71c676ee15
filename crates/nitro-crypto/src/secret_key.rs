//! Participant signing keys.

use crate::{address_of, CryptoError, Result, Signature, SECP};
use nitro_types::{Address, Bytes32};
use secp256k1::{Message, PublicKey};

/// A secp256k1 secret key used to sign channel states, proposals and vouchers.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey {
    inner: secp256k1::SecretKey,
}

impl SecretKey {
    /// Generates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        let inner = secp256k1::SecretKey::new(&mut secp256k1::rand::thread_rng());
        Self { inner }
    }

    /// Creates a key from 32 secret bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid secp256k1 scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let inner =
            secp256k1::SecretKey::from_slice(bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self { inner })
    }

    /// Creates a key from hex, with or without a `0x` prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not 32 bytes of valid hex.
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidSecretKey)?;
        Self::from_bytes(&bytes)
    }

    /// Returns the secret bytes.
    #[must_use]
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.inner.secret_bytes()
    }

    /// The address controlled by this key.
    #[must_use]
    pub fn address(&self) -> Address {
        address_of(&PublicKey::from_secret_key(&SECP, &self.inner))
    }

    /// Signs a 32-byte digest.
    #[must_use]
    pub fn sign_hash(&self, digest: &Bytes32) -> Signature {
        let message = Message::from_digest(*digest);
        let recoverable = SECP.sign_ecdsa_recoverable(&message, &self.inner);
        Signature::from_recoverable(&recoverable)
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
