//! Ingestion handlers: validated device uplinks flowing into the store.
//!
//! All handlers assume the session gate has already established the device
//! UUID. Validation failures are reported back to the session loop, which
//! drops the offending frame but keeps the connection; the device may
//! recover on its next batch.

use std::sync::Arc;

use tracing::debug;

use goster_proto::payload::{LogRecord, MetricsBatch};
use goster_proto::ProtoError;

use crate::runtime::DeviceRuntime;
use crate::storage::{DataStore, DatabaseError, MetricPoint};

/// Ingestion failures, split so the session loop can keep validation
/// problems non-fatal while surfacing storage trouble loudly.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Malformed(#[from] ProtoError),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

/// Parse and persist one metrics batch. Returns the number of points
/// written. Point `i` is stamped `start_ts + i * interval_ms`.
pub async fn handle_metrics(
    store: &Arc<dyn DataStore>,
    uuid: &str,
    payload: &[u8],
) -> Result<usize, IngestError> {
    let batch = MetricsBatch::from_bytes(payload)?;
    debug!(
        uuid = %uuid,
        count = batch.values.len(),
        kind = batch.kind.code(),
        "Metrics batch received"
    );

    let points: Vec<MetricPoint> = batch
        .values
        .iter()
        .enumerate()
        .map(|(i, &value)| MetricPoint {
            timestamp_ms: batch.timestamp_of(i),
            value,
            kind: batch.kind.code(),
        })
        .collect();

    store.batch_append_metrics(uuid, &points).await?;
    Ok(points.len())
}

/// Parse and persist one device log line.
pub async fn handle_log(
    store: &Arc<dyn DataStore>,
    uuid: &str,
    payload: &[u8],
) -> Result<(), IngestError> {
    let record = LogRecord::from_bytes(payload)?;
    let line = format!("[{}] {}", record.ts, record.message);
    store.write_log(uuid, record.level.as_str(), &line).await?;
    Ok(())
}

/// Persist an opaque event report as-is.
pub async fn handle_event(
    store: &Arc<dyn DataStore>,
    uuid: &str,
    payload: &[u8],
) -> Result<(), IngestError> {
    let message = String::from_utf8_lossy(payload);
    store.write_log(uuid, "EVENT", &message).await?;
    Ok(())
}

/// Persist a device's last-gasp error report. The session closes after this.
pub async fn handle_error_report(
    store: &Arc<dyn DataStore>,
    uuid: &str,
    payload: &[u8],
) -> Result<(), IngestError> {
    let message = String::from_utf8_lossy(payload);
    store.write_log(uuid, "ERROR", &message).await?;
    Ok(())
}

/// Record a heartbeat and report whether the downlink queue is empty.
pub async fn handle_heartbeat(runtime: &Arc<DeviceRuntime>, uuid: &str) -> bool {
    runtime.handle_heartbeat(uuid).await;
    runtime.queue_is_empty(uuid).await
}
