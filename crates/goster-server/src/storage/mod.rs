//! Device persistence: the `DataStore` seam and its SQLite implementation.
//!
//! The rest of the core only sees the [`DataStore`] trait; the SQLite
//! implementation behind it is one transactional statement (or explicit
//! transaction) per call, so no database state is ever held across a
//! session's suspension points.

mod db;
mod models;
mod queries;

#[cfg(test)]
mod tests;

pub use db::{Database, DatabaseError};
pub use models::{AuthStatus, DeviceMetadata, DeviceRecord, MetricPoint};

use async_trait::async_trait;

/// Storage operations the core depends on.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Create a device row. Fails if the UUID already exists.
    async fn init_device(&self, uuid: &str, meta: &DeviceMetadata) -> Result<(), DatabaseError>;

    /// Remove a device and its telemetry.
    async fn destroy_device(&self, uuid: &str) -> Result<(), DatabaseError>;

    /// Load a device's metadata and credential state.
    async fn load_config(&self, uuid: &str) -> Result<DeviceMetadata, DatabaseError>;

    /// Persist the full metadata row, token and status included.
    async fn save_metadata(&self, uuid: &str, meta: &DeviceMetadata) -> Result<(), DatabaseError>;

    /// Resolve a token to `(uuid, status)` via the unique token index.
    async fn get_device_by_token(&self, token: &str)
        -> Result<(String, AuthStatus), DatabaseError>;

    /// Replace a device's token; `None` clears it.
    async fn update_token(&self, uuid: &str, token: Option<&str>) -> Result<(), DatabaseError>;

    /// Append one sample.
    async fn append_metric(&self, uuid: &str, point: &MetricPoint) -> Result<(), DatabaseError>;

    /// Append a batch of samples atomically.
    async fn batch_append_metrics(
        &self,
        uuid: &str,
        points: &[MetricPoint],
    ) -> Result<(), DatabaseError>;

    /// Samples for a device in `[start_ms, end_ms]`, ordered by timestamp.
    async fn query_metrics(
        &self,
        uuid: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<MetricPoint>, DatabaseError>;

    /// Record a device-originated log line.
    async fn write_log(&self, uuid: &str, level: &str, message: &str)
        -> Result<(), DatabaseError>;

    /// Page through registered devices for the operator surface.
    async fn list_devices(&self, page: u32, size: u32) -> Result<Vec<DeviceRecord>, DatabaseError>;
}
