//! Data models for the device store.

use serde::{Deserialize, Serialize};

/// Administrative authentication state of a device.
///
/// A non-empty token exists iff the status is `Authenticated`; the
/// identity manager maintains that invariant on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    Pending,
    Authenticated,
    Refused,
    Revoked,
    Unknown,
}

impl AuthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Authenticated => "authenticated",
            Self::Refused => "refused",
            Self::Revoked => "revoked",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a stored status column; anything unrecognized maps to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "authenticated" => Self::Authenticated,
            "refused" => Self::Refused,
            "revoked" => Self::Revoked,
            _ => Self::Unknown,
        }
    }
}

/// Row shape of the `devices` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct DeviceRow {
    pub uuid: String,
    pub name: String,
    pub serial_number: String,
    pub mac_address: String,
    pub hw_version: String,
    pub sw_version: String,
    pub config_version: String,
    pub token: Option<String>,
    pub auth_status: String,
    pub created_at: i64,
}

/// Device static metadata plus credential state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceMetadata {
    pub name: String,
    pub serial_number: String,
    pub mac_address: String,
    pub hw_version: String,
    pub sw_version: String,
    pub config_version: String,
    pub token: Option<String>,
    pub auth_status: AuthStatus,
    /// Stamped by the store on insert; zero until then.
    pub created_at: i64,
}

impl From<DeviceRow> for DeviceMetadata {
    fn from(row: DeviceRow) -> Self {
        Self {
            name: row.name,
            serial_number: row.serial_number,
            mac_address: row.mac_address,
            hw_version: row.hw_version,
            sw_version: row.sw_version,
            config_version: row.config_version,
            token: row.token,
            auth_status: AuthStatus::parse(&row.auth_status),
            created_at: row.created_at,
        }
    }
}

/// One sensor sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MetricPoint {
    pub timestamp_ms: i64,
    pub value: f32,
    pub kind: u8,
}

/// Listing entry for the operator surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub uuid: String,
    pub meta: DeviceMetadata,
}

impl From<DeviceRow> for DeviceRecord {
    fn from(row: DeviceRow) -> Self {
        Self {
            uuid: row.uuid.clone(),
            meta: row.into(),
        }
    }
}
