//! Recoverable ECDSA signatures.

use crate::{address_of, CryptoError, Result, SECP};
use nitro_types::{Address, Bytes32};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::Message;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 65-byte recoverable signature laid out as `r || s || v`, with `v = recovery id + 27`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; 65]);

impl Signature {
    /// The length of a signature in bytes.
    pub const LEN: usize = 65;

    /// Creates a signature from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 65]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }

    /// Creates a signature from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 65 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 65] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidSignature(format!("expected 65 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub(crate) fn from_recoverable(signature: &RecoverableSignature) -> Self {
        let (recovery_id, compact) = signature.serialize_compact();
        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(&compact);
        bytes[64] = recovery_id.to_i32() as u8 + 27;
        Self(bytes)
    }

    /// Recovers the address that signed `digest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature is malformed or no key can be recovered.
    pub fn recover_signer(&self, digest: &Bytes32) -> Result<Address> {
        let v = i32::from(self.0[64]);
        let v = if v >= 27 { v - 27 } else { v };
        let recovery_id =
            RecoveryId::from_i32(v).map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        let recoverable = RecoverableSignature::from_compact(&self.0[..64], recovery_id)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        let public_key = SECP
            .recover_ecdsa(&Message::from_digest(*digest), &recoverable)
            .map_err(|e| CryptoError::Recovery(e.to_string()))?;
        Ok(address_of(&public_key))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)?
        } else {
            Vec::<u8>::deserialize(deserializer)?
        };
        Self::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SecretKey;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn recovers_the_signing_address() {
        let key = SecretKey::generate();
        let digest = nitro_types::hash(b"state");
        let signature = key.sign_hash(&digest);
        assert_eq!(signature.recover_signer(&digest).unwrap(), key.address());
    }

    #[test]
    fn different_digest_recovers_someone_else() {
        let key = SecretKey::generate();
        let signature = key.sign_hash(&nitro_types::hash(b"one"));
        let recovered = signature.recover_signer(&nitro_types::hash(b"two"));
        assert_ne!(recovered.ok(), Some(key.address()));
    }

    #[test]
    fn rejects_bad_recovery_byte() {
        let key = SecretKey::generate();
        let digest = nitro_types::hash(b"state");
        let mut bytes = *key.sign_hash(&digest).as_bytes();
        bytes[64] = 99;
        assert!(Signature::from_bytes(bytes).recover_signer(&digest).is_err());
    }

    #[test]
    fn serde_json_uses_prefixed_hex() {
        let key = SecretKey::generate();
        let signature = key.sign_hash(&[1u8; 32]);
        let json = serde_json::to_string(&signature).unwrap();
        assert!(json.starts_with("\"0x"));
        let back: Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, signature);
    }

    proptest! {
        #[test]
        fn any_digest_recovers_signer(digest in prop::array::uniform32(any::<u8>())) {
            let key = SecretKey::from_bytes(&[0x42; 32]).unwrap();
            let signature = key.sign_hash(&digest);
            prop_assert_eq!(signature.recover_signer(&digest).unwrap(), key.address());
        }
    }
}
