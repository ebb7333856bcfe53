//! Per-device runtime state: liveness tracking and downlink queues.
//!
//! Both maps are keyed by device UUID and shared across session tasks.
//! Heartbeats are last-write-wins; each downlink queue has its own lock so
//! pushes and pops for different devices never contend.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Heartbeat age beyond which a device counts as offline.
pub const DEFAULT_DEATH_LINE: Duration = Duration::from_secs(60);

/// Default downlink queue depth per device.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Online/offline classification derived from heartbeat age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Online,
    Offline,
}

/// A queued server→device command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownlinkMessage {
    pub cmd_id: u16,
    pub payload: Vec<u8>,
}

/// Errors from runtime lookups.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("device has never been seen online")]
    NeverSeen,
}

pub struct DeviceRuntime {
    last_heartbeat: RwLock<HashMap<String, Instant>>,
    queues: MessageQueue,
    death_line: Duration,
}

impl Default for DeviceRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRuntime {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_DEATH_LINE, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_settings(death_line: Duration, queue_capacity: usize) -> Self {
        Self {
            last_heartbeat: RwLock::new(HashMap::new()),
            queues: MessageQueue::new(queue_capacity),
            death_line,
        }
    }

    /// Record a heartbeat for the device right now.
    pub async fn handle_heartbeat(&self, uuid: &str) {
        self.last_heartbeat
            .write()
            .await
            .insert(uuid.to_owned(), Instant::now());
    }

    /// Classify the device by heartbeat age. A device never seen since
    /// startup is an error so callers can distinguish it from a silent one.
    pub async fn query_device_status(&self, uuid: &str) -> Result<DeviceStatus, RuntimeError> {
        let last = self
            .last_heartbeat
            .read()
            .await
            .get(uuid)
            .copied()
            .ok_or(RuntimeError::NeverSeen)?;

        if last.elapsed() < self.death_line {
            Ok(DeviceStatus::Online)
        } else {
            Ok(DeviceStatus::Offline)
        }
    }

    /// Queue a downlink command for delivery on the device's next frame.
    pub async fn queue_push(&self, uuid: &str, message: DownlinkMessage) {
        self.queues.push(uuid, message).await;
    }

    /// Take the oldest pending downlink command, if any.
    pub async fn queue_pop(&self, uuid: &str) -> Option<DownlinkMessage> {
        self.queues.pop(uuid).await
    }

    /// Non-blocking probe used by the heartbeat ACK.
    pub async fn queue_is_empty(&self, uuid: &str) -> bool {
        self.queues.is_empty(uuid).await
    }
}

/// Bounded per-device FIFO with drop-oldest overflow: operators prefer
/// fresh commands over stale ones.
struct MessageQueue {
    queues: RwLock<HashMap<String, Arc<Mutex<VecDeque<DownlinkMessage>>>>>,
    capacity: usize,
}

impl MessageQueue {
    fn new(capacity: usize) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    async fn queue_for(&self, uuid: &str) -> Arc<Mutex<VecDeque<DownlinkMessage>>> {
        if let Some(queue) = self.queues.read().await.get(uuid) {
            return Arc::clone(queue);
        }
        Arc::clone(
            self.queues
                .write()
                .await
                .entry(uuid.to_owned())
                .or_default(),
        )
    }

    async fn push(&self, uuid: &str, message: DownlinkMessage) {
        let queue = self.queue_for(uuid).await;
        let mut queue = queue.lock().await;

        if queue.len() == self.capacity {
            if let Some(dropped) = queue.pop_front() {
                debug!(
                    uuid = %uuid,
                    cmd = format_args!("0x{:04X}", dropped.cmd_id),
                    "Downlink queue full, dropping oldest command"
                );
            }
        }
        queue.push_back(message);
    }

    async fn pop(&self, uuid: &str) -> Option<DownlinkMessage> {
        let queue = self.queues.read().await.get(uuid).cloned()?;
        let mut queue = queue.lock().await;
        queue.pop_front()
    }

    async fn is_empty(&self, uuid: &str) -> bool {
        match self.queues.read().await.get(uuid) {
            Some(queue) => queue.lock().await.is_empty(),
            None => true,
        }
    }
}
