//! X25519 key exchange.
//!
//! Each endpoint generates an ephemeral keypair per session, swaps 32-byte
//! public keys inside plaintext handshake frames, and derives the symmetric
//! session key from the ECDH shared secret. A fresh keypair per session is
//! what makes keys differ across sessions, so nonce reuse across
//! connections is never a concern.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::CryptoError;
use crate::session::SessionKey;

/// State of a key exchange in progress.
pub struct KeyExchangeState {
    /// Our ephemeral secret for this session.
    ephemeral_secret: StaticSecret,
    /// Our ephemeral public key to send to the peer.
    ephemeral_public: PublicKey,
}

impl Default for KeyExchangeState {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyExchangeState {
    /// Start a new key exchange by generating an ephemeral keypair.
    pub fn new() -> Self {
        let ephemeral_secret = StaticSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral_secret);
        Self {
            ephemeral_secret,
            ephemeral_public,
        }
    }

    /// Our ephemeral public key bytes to send to the peer.
    pub fn public_bytes(&self) -> [u8; 32] {
        *self.ephemeral_public.as_bytes()
    }

    /// Derive a [`SessionKey`] from the peer's public key bytes without
    /// consuming the exchange state.
    ///
    /// Rekeying reuses the same local keypair: the peer already knows our
    /// public key, so it can install the rotated key before our reply
    /// arrives.
    pub fn session_key(&self, peer_public_bytes: &[u8]) -> Result<SessionKey, CryptoError> {
        let arr: [u8; 32] =
            peer_public_bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: 32,
                    actual: peer_public_bytes.len(),
                })?;
        let peer_public = PublicKey::from(arr);

        Ok(SessionKey::from_keypairs(
            &self.ephemeral_secret,
            &peer_public,
        ))
    }

    /// Complete the exchange with the peer's public key bytes, consuming
    /// the local keypair.
    pub fn complete(self, peer_public_bytes: &[u8]) -> Result<SessionKey, CryptoError> {
        self.session_key(peer_public_bytes)
    }
}
