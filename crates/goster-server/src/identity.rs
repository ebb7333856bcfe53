//! Device identity, token, and approval lifecycle.
//!
//! Devices are identified by a deterministic UUID derived from their serial
//! number and MAC address, and authenticate with an opaque bearer token
//! issued on operator approval. A token exists iff the device is
//! `Authenticated`; every transition out of that state clears it, and every
//! transition into it mints a fresh one.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::storage::{AuthStatus, DataStore, DatabaseError, DeviceMetadata, DeviceRecord};

/// Authentication failures surfaced to the session loop. The wire response
/// collapses all of them into the generic failure byte; the distinction is
/// for logs and operators only.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token does not resolve to any device")]
    InvalidToken,

    #[error("device is awaiting operator approval")]
    DevicePending,

    #[error("device was refused access")]
    DeviceRefused,

    #[error("device state is unknown")]
    DeviceUnknown,

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

/// Derive the stable device UUID: `SHA-256(SHA-256(serial) || SHA-256(mac))`,
/// rendered as 64 hex characters. Pure function of its inputs.
pub fn generate_uuid(serial: &str, mac: &str) -> String {
    let serial_sum = Sha256::digest(serial.as_bytes());
    let mac_sum = Sha256::digest(mac.as_bytes());

    let mut combined = [0u8; 64];
    combined[..32].copy_from_slice(&serial_sum);
    combined[32..].copy_from_slice(&mac_sum);

    hex::encode(Sha256::digest(combined))
}

/// Mint a bearer token: `"gt_"` plus 32 CSPRNG bytes in hex.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    format!("gt_{}", hex::encode(bytes))
}

pub struct IdentityManager {
    store: Arc<dyn DataStore>,
    /// Token → UUID fast path, holding Authenticated tokens only.
    token_cache: RwLock<HashMap<String, String>>,
    /// Per-device guards serializing status transitions.
    transition_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IdentityManager {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self {
            store,
            token_cache: RwLock::new(HashMap::new()),
            transition_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a bearer token to a device UUID.
    ///
    /// Cache hit is the fast path; on a miss the store is consulted and
    /// only an Authenticated result populates the cache.
    pub async fn authenticate(&self, token: &str) -> Result<String, AuthError> {
        if let Some(uuid) = self.token_cache.read().await.get(token) {
            return Ok(uuid.clone());
        }

        let (uuid, status) = match self.store.get_device_by_token(token).await {
            Ok(found) => found,
            Err(DatabaseError::NotFound(_)) => return Err(AuthError::InvalidToken),
            Err(e) => return Err(e.into()),
        };

        match status {
            AuthStatus::Authenticated => {
                self.token_cache
                    .write()
                    .await
                    .insert(token.to_owned(), uuid.clone());
                Ok(uuid)
            }
            AuthStatus::Pending => Err(AuthError::DevicePending),
            AuthStatus::Refused => Err(AuthError::DeviceRefused),
            _ => Err(AuthError::DeviceUnknown),
        }
    }

    /// Create a device in Pending state with no token. Fails if the derived
    /// UUID already exists; an operator has to resolve that.
    pub async fn register_device(&self, mut meta: DeviceMetadata) -> Result<String, DatabaseError> {
        let uuid = generate_uuid(&meta.serial_number, &meta.mac_address);
        meta.auth_status = AuthStatus::Pending;
        meta.token = None;

        self.store.init_device(&uuid, &meta).await?;
        info!(uuid = %uuid, name = %meta.name, "Device registered, awaiting approval");
        Ok(uuid)
    }

    /// Apply a status transition, handling the token consequences:
    /// a fresh token on → Authenticated, a cleared token on → Pending,
    /// Refused or Revoked, and no token change otherwise. Returns the token
    /// now in effect. Serialized per UUID so racing operator actions cannot
    /// tear a transition.
    pub async fn update_auth_status(
        &self,
        uuid: &str,
        status: AuthStatus,
    ) -> Result<Option<String>, AuthError> {
        let guard = self.transition_lock(uuid).await;
        let _held = guard.lock().await;

        let mut meta = self.store.load_config(uuid).await?;

        if let Some(old_token) = &meta.token {
            self.token_cache.write().await.remove(old_token);
        }

        meta.auth_status = status;
        match status {
            AuthStatus::Authenticated => meta.token = Some(generate_token()),
            AuthStatus::Pending | AuthStatus::Refused | AuthStatus::Revoked => meta.token = None,
            AuthStatus::Unknown => {}
        }

        self.store.save_metadata(uuid, &meta).await?;
        debug!(uuid = %uuid, status = status.as_str(), "Device status updated");
        Ok(meta.token)
    }

    /// Replace the device's token without touching its status.
    pub async fn refresh_token(&self, uuid: &str) -> Result<String, AuthError> {
        let guard = self.transition_lock(uuid).await;
        let _held = guard.lock().await;

        let meta = self.store.load_config(uuid).await?;
        if let Some(old_token) = &meta.token {
            self.token_cache.write().await.remove(old_token);
        }

        let token = generate_token();
        self.store.update_token(uuid, Some(&token)).await?;
        info!(uuid = %uuid, "Device token refreshed");
        Ok(token)
    }

    /// Revoke the device's credential entirely.
    pub async fn revoke_token(&self, uuid: &str) -> Result<(), AuthError> {
        self.update_auth_status(uuid, AuthStatus::Revoked)
            .await
            .map(|_| ())
    }

    // Operator surface; thin wrappers the admin side calls.

    pub async fn approve_device(&self, uuid: &str) -> Result<Option<String>, AuthError> {
        self.update_auth_status(uuid, AuthStatus::Authenticated)
            .await
    }

    pub async fn reject_device(&self, uuid: &str) -> Result<(), AuthError> {
        self.update_auth_status(uuid, AuthStatus::Refused)
            .await
            .map(|_| ())
    }

    pub async fn unblock_device(&self, uuid: &str) -> Result<(), AuthError> {
        self.update_auth_status(uuid, AuthStatus::Pending)
            .await
            .map(|_| ())
    }

    pub async fn delete_device(&self, uuid: &str) -> Result<(), AuthError> {
        let guard = self.transition_lock(uuid).await;
        let _held = guard.lock().await;

        // Evict the token before the row disappears.
        if let Ok(meta) = self.store.load_config(uuid).await {
            if let Some(token) = &meta.token {
                self.token_cache.write().await.remove(token);
            }
        }

        self.store.destroy_device(uuid).await?;
        info!(uuid = %uuid, "Device deleted");
        Ok(())
    }

    pub async fn device_metadata(&self, uuid: &str) -> Result<DeviceMetadata, AuthError> {
        Ok(self.store.load_config(uuid).await?)
    }

    pub async fn list_devices(&self, page: u32, size: u32) -> Result<Vec<DeviceRecord>, AuthError> {
        Ok(self.store.list_devices(page, size).await?)
    }

    async fn transition_lock(&self, uuid: &str) -> Arc<Mutex<()>> {
        let mut locks = self.transition_locks.lock().await;
        locks
            .entry(uuid.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
