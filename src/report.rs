use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::warn;

use crate::status::HealthStatus;
use crate::telemetry;

/// Framing tag identifying a healthcheck status update on the sync channel.
pub const STATUS_UPDATE_TAG: u8 = 2;

/// Wire value of the `type` field of every status update.
pub const STATUS_UPDATE_TYPE: &str = "healthcheck_status";

/// One healthcheck status message for the parent engine.
///
/// Field order is part of the wire contract; serde serializes struct fields
/// in declaration order, so the declaration below is the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(rename = "type")]
    pub message_type: String,
    pub container_id: String,
    pub status: HealthStatus,
    pub exit_code: i32,
    pub timestamp: i64,
}

impl StatusUpdate {
    pub fn new(container_id: &str, status: HealthStatus, exit_code: i32) -> Self {
        Self {
            message_type: STATUS_UPDATE_TYPE.to_string(),
            container_id: container_id.to_string(),
            status,
            exit_code,
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// The monitor's framed byte stream back to the parent engine.
///
/// Implementations own the single-writer discipline: `write_framed` calls
/// from concurrent timers must not interleave.
#[async_trait]
pub trait SyncChannel: Send + Sync {
    async fn write_framed(&self, tag: u8, payload: &[u8]) -> io::Result<()>;
}

pub type DynSyncChannel = Arc<dyn SyncChannel>;

/// Reference framing over any async writer: tag byte, big-endian u32 payload
/// length, payload. The monitor wraps the pre-opened sync pipe in this.
pub struct FramedChannel<W> {
    writer: Mutex<W>,
}

impl<W> FramedChannel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<W> SyncChannel for FramedChannel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_framed(&self, tag: u8, payload: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(&[tag]).await?;
        writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
        writer.write_all(payload).await?;
        writer.flush().await
    }
}

/// Serializes status updates and pushes them onto the sync channel.
#[derive(Clone)]
pub struct StatusReporter {
    channel: DynSyncChannel,
}

impl StatusReporter {
    pub fn new(channel: DynSyncChannel) -> Self {
        Self { channel }
    }

    /// Sends one status update. Delivery failures are logged and swallowed;
    /// the probe loop must survive a parent that momentarily cannot read.
    pub async fn send(&self, container_id: &str, status: HealthStatus, exit_code: i32) {
        let update = StatusUpdate::new(container_id, status, exit_code);
        let payload = match serde_json::to_vec(&update) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(
                    container_id = %container_id,
                    error = %err,
                    "failed to encode healthcheck status update"
                );
                return;
            }
        };

        telemetry::record_status_update(status.as_str());

        if let Err(err) = self.channel.write_framed(STATUS_UPDATE_TAG, &payload).await {
            warn!(
                container_id = %container_id,
                status = %status,
                error = %err,
                "failed to deliver healthcheck status update"
            );
        }
    }
}
