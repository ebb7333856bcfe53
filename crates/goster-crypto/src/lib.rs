//! Goster channel cryptography.
//!
//! Provides the primitives the Goster-WY protocol builds its encrypted
//! channel from, with no TLS involved:
//!
//! - **Exchange**: X25519 ephemeral ECDH per session; public keys travel in
//!   the clear inside handshake frames.
//! - **Session key**: AES-128-GCM keyed with the leading 16 bytes of the
//!   shared secret. Nonce and AAD come from the frame header, so the key
//!   itself is stateless and both endpoints stay in lockstep by construction.

pub mod error;
pub mod exchange;
pub mod session;

pub use error::CryptoError;
pub use exchange::KeyExchangeState;
pub use session::{SessionKey, NONCE_SIZE, SESSION_KEY_SIZE, TAG_SIZE};
