//! Error types for primitive parsing.

use thiserror::Error;

/// Errors raised when decoding primitive types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    /// The input was not valid hex.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// The decoded value had the wrong length.
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        got: usize,
    },
}

/// A specialized Result type for primitive decoding.
pub type Result<T> = std::result::Result<T, TypesError>;
