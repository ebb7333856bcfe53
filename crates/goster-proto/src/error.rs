//! Protocol error types.

/// Errors from frame and payload handling.
///
/// Framing and integrity variants are fatal for the connection that
/// produced them; payload variants concern a single business frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("Invalid magic: 0x{0:04X}")]
    InvalidMagic(u16),

    #[error("Header CRC mismatch: expected 0x{expected:04X}, computed 0x{actual:04X}")]
    HeaderCrc { expected: u16, actual: u16 },

    #[error("Payload CRC mismatch: expected 0x{expected:08X}, computed 0x{actual:08X}")]
    PayloadCrc { expected: u32, actual: u32 },

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Frame body length mismatch: expected {expected} bytes, got {actual}")]
    BodyLength { expected: usize, actual: usize },

    #[error("Encrypted frame received without a session key")]
    MissingKey,

    #[error(transparent)]
    Crypto(#[from] goster_crypto::CryptoError),

    #[error("Malformed {what} payload: {reason}")]
    MalformedPayload {
        what: &'static str,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtoError {
    pub(crate) fn malformed(what: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            what,
            reason: reason.into(),
        }
    }
}
