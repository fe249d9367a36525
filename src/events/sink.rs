//! Destinations for normalized events
//!
//! The listener hands every event to a sink and moves on; sinks swallow their
//! own failures after logging them.

use super::types::NormalizedEvent;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};

/// Receiver of normalized events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Record one event (best effort)
    async fn record(&self, event: NormalizedEvent);
}

/// Appends events as JSON lines to `<base_dir>/events.jsonl`
pub struct JsonlEventSink {
    path: PathBuf,
    /// Serializes appends so lines never interleave
    write_lock: Mutex<()>,
}

impl JsonlEventSink {
    /// Create a sink under the given base directory
    pub async fn new(base_dir: &Path) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(base_dir).await?;
        Ok(Self {
            path: base_dir.join("events.jsonl"),
            write_lock: Mutex::new(()),
        })
    }

    /// File the events are appended to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every recorded event, skipping corrupt lines
    pub async fn load(&self) -> Vec<NormalizedEvent> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to read {}: {}", self.path.display(), e);
                }
                return Vec::new();
            }
        };

        data.lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!("Skipping corrupt event line: {}", e);
                    None
                }
            })
            .collect()
    }

    async fn append(&self, event: &NormalizedEvent) -> std::io::Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

#[async_trait]
impl EventSink for JsonlEventSink {
    async fn record(&self, event: NormalizedEvent) {
        if let Err(e) = self.append(&event).await {
            tracing::warn!(entity_id = %event.entity_id, "Failed to persist event: {}", e);
        }
    }
}

/// Forwards events into an mpsc channel
pub struct ChannelSink {
    tx: mpsc::Sender<NormalizedEvent>,
}

impl ChannelSink {
    /// Create a sink feeding `tx`
    pub fn new(tx: mpsc::Sender<NormalizedEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn record(&self, event: NormalizedEvent) {
        if self.tx.send(event).await.is_err() {
            tracing::debug!("Event channel closed, dropping event");
        }
    }
}
