//! Subscriber streams
//!
//! Each subscriber gets an independent cursor into one camera's capture
//! via a bounded broadcast channel. A consumer that falls behind skips
//! ahead to the oldest retained frame instead of blocking the producer:
//! freshness over completeness.

use crate::arbiter::state::CameraId;
use crate::error::StreamError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// One encoded frame. Clones share the payload.
#[derive(Debug, Clone)]
pub struct Frame {
    pub camera_id: CameraId,
    /// Capture-order sequence number, per camera generation.
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    data: Arc<Vec<u8>>,
}

impl Frame {
    pub fn new(camera_id: CameraId, sequence: u64, data: Vec<u8>) -> Self {
        Self {
            camera_id,
            sequence,
            captured_at: Utc::now(),
            data: Arc::new(data),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A lazy, non-restartable sequence of frames for one camera.
///
/// Terminates with [`StreamError::SourceClosed`] once the underlying
/// capture handle closes (a mode switch elsewhere); the transport layer
/// ends its response on that signal.
pub struct FrameStream {
    camera_id: CameraId,
    rx: broadcast::Receiver<Frame>,
}

impl FrameStream {
    pub(crate) fn new(camera_id: CameraId, rx: broadcast::Receiver<Frame>) -> Self {
        Self { camera_id, rx }
    }

    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    /// Wait for the next frame. Frames missed while this subscriber
    /// lagged are skipped silently.
    pub async fn next(&mut self) -> Result<Frame, StreamError> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => return Ok(frame),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(
                        "stream subscriber for {} lagged, skipped {} frames",
                        self.camera_id,
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(StreamError::SourceClosed);
                }
            }
        }
    }

    /// Like [`next`](Self::next) but bounded: `Ok(None)` when no frame
    /// arrived within `timeout`. Suspends rather than busy-polling.
    pub async fn next_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Frame>, StreamError> {
        match tokio::time::timeout(timeout, self.next()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }
}
