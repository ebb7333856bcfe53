//! Crypto error types.

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Seal failed: {0}")]
    SealFailed(String),

    #[error("Open failed: ciphertext or tag rejected")]
    OpenFailed,

    #[error("Invalid peer key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}
