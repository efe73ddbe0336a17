//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("Invalid G1 point encoding")]
    InvalidG1Point,

    #[error("Invalid scalar encoding")]
    InvalidScalar,

    #[error("Key derivation failed")]
    KeyDerivationFailed,

    #[error("Bid payload too short: {len} bytes")]
    PayloadTooShort { len: usize },

    #[error("Bid payload seed tag mismatch")]
    SeedTagMismatch,

    #[error("Bid amount does not fit in 128 bits")]
    AmountOverflow,
}
