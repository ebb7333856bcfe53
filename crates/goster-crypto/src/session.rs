//! Per-session AEAD key.
//!
//! Wraps AES-128-GCM keyed from an X25519 shared secret. The wire codec
//! supplies the nonce (frame salt + sequence counter) and the AAD (the
//! frame header), so the key holds no counter state of its own; nonce
//! uniqueness is the session loop's responsibility via its write sequence.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Key, Nonce};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::error::CryptoError;

/// AES key width; only the leading bytes of the 32-byte ECDH secret are used.
pub const SESSION_KEY_SIZE: usize = 16;

/// GCM nonce width (4-byte frame salt + 8-byte sequence counter).
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag width.
pub const TAG_SIZE: usize = 16;

/// A symmetric session key negotiated over X25519.
pub struct SessionKey {
    cipher: Aes128Gcm,
}

impl SessionKey {
    /// Key a session from a raw 32-byte ECDH shared secret.
    ///
    /// Only the first [`SESSION_KEY_SIZE`] bytes enter the cipher.
    pub fn from_shared_secret(shared_secret: &[u8; 32]) -> Self {
        let mut key_bytes = [0u8; SESSION_KEY_SIZE];
        key_bytes.copy_from_slice(&shared_secret[..SESSION_KEY_SIZE]);

        let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(&key_bytes));
        key_bytes.zeroize();

        Self { cipher }
    }

    /// Key a session from two X25519 keypair halves (performs ECDH).
    ///
    /// `local_secret` is our ephemeral secret, `remote_public` is theirs.
    pub fn from_keypairs(local_secret: &StaticSecret, remote_public: &PublicKey) -> Self {
        let shared = local_secret.diffie_hellman(remote_public);
        Self::from_shared_secret(shared.as_bytes())
    }

    /// Seal `plaintext` under `nonce` with `aad`, returning `ciphertext || tag`.
    pub fn seal(
        &self,
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| CryptoError::SealFailed(e.to_string()))
    }

    /// Open `ciphertext || tag` produced by [`seal`](Self::seal).
    ///
    /// A failure here means tampering, a key mismatch, or a replayed nonce;
    /// callers must treat it as fatal for the session.
    pub fn open(
        &self,
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        body: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: body, aad })
            .map_err(|_| CryptoError::OpenFailed)
    }
}
