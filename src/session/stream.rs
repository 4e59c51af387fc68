use std::time::Instant;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::KansasError;

use super::wire::OutboundFrame;

/// One connected client's outbound channel. Owned by exactly one Game at
/// a time (§3 "Stream (connection)").
#[derive(Clone)]
pub struct StreamHandle {
    pub id: Uuid,
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl StreamHandle {
    pub fn new(id: Uuid, tx: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        Self { id, tx }
    }

    /// Sends a frame to this stream. A send failure means the peer's
    /// writer task is gone; callers treat this as `BrokenStream` and drop
    /// the stream from presence.
    pub fn send(&self, frame: OutboundFrame) -> Result<(), KansasError> {
        self.tx.send(frame).map_err(|_| KansasError::BrokenStream)
    }
}

/// Presence record: `{uuid, name, last_keepalive}` per §3/§4.8.
#[derive(Clone, Debug, serde::Serialize)]
pub struct Presence {
    pub uuid: String,
    pub name: String,
    #[serde(skip)]
    pub last_keepalive: Instant,
}

impl Presence {
    pub fn new(uuid: String, name: String) -> Self {
        Self {
            uuid,
            name,
            last_keepalive: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_keepalive = Instant::now();
    }

    pub fn is_stale(&self, timeout_secs: u64) -> bool {
        self.last_keepalive.elapsed().as_secs() >= timeout_secs
    }
}
