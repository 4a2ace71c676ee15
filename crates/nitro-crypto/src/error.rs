//! Error types for signing and recovery.

use thiserror::Error;

/// Errors that can occur during signing or signer recovery.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The secret key is malformed.
    #[error("invalid secret key")]
    InvalidSecretKey,

    /// The signature bytes are malformed.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// No public key could be recovered from the signature.
    #[error("signer recovery failed: {0}")]
    Recovery(String),
}

/// A specialized Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
