//! Mock camera backend
//!
//! Deterministic in-memory backend for tests and bring-up. Fabricates
//! JPEG-shaped frames and keeps per-camera open/close/reconfigure
//! telemetry so tests can check the one-handle-per-camera invariant.

use super::{CameraBackend, CaptureHandle};
use crate::arbiter::state::{CameraId, CaptureConfig};
use crate::error::DeviceError;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Per-camera counters, shared with the backend's creator.
#[derive(Debug, Default)]
pub struct CameraTelemetry {
    opens: AtomicUsize,
    closes: AtomicUsize,
    reconfigures: AtomicUsize,
    open_now: AtomicUsize,
    max_open: AtomicUsize,
}

impl CameraTelemetry {
    fn on_open(&self) {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let now = self.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now, Ordering::SeqCst);
    }

    fn on_close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.open_now.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn reconfigures(&self) -> usize {
        self.reconfigures.load(Ordering::SeqCst)
    }

    /// Handles open at this instant: 0 or 1 when the arbiter is honest.
    pub fn open_now(&self) -> usize {
        self.open_now.load(Ordering::SeqCst)
    }

    /// High-water mark of concurrently open handles.
    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }
}

/// Mock backend. Clone-cheap via `Arc` internals.
#[derive(Clone, Default)]
pub struct MockBackend {
    telemetry: Arc<[CameraTelemetry; 2]>,
    failing: Arc<Mutex<HashSet<CameraId>>>,
    /// When set, open handles fail every `read_frame`.
    read_failing: Arc<Mutex<HashSet<CameraId>>>,
    /// When set, handles refuse in-place reconfiguration.
    reject_reconfigure: Arc<Mutex<HashSet<CameraId>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn telemetry(&self, id: CameraId) -> &CameraTelemetry {
        &self.telemetry[id.index() as usize]
    }

    /// Make `open` fail for this camera, simulating a disconnected sensor.
    pub fn set_failing(&self, id: CameraId, failing: bool) {
        let mut set = self.failing.lock();
        if failing {
            set.insert(id);
        } else {
            set.remove(&id);
        }
    }

    /// Make an already-open handle fail its reads, simulating a sensor
    /// that disconnects mid-stream.
    pub fn set_read_failing(&self, id: CameraId, failing: bool) {
        let mut set = self.read_failing.lock();
        if failing {
            set.insert(id);
        } else {
            set.remove(&id);
        }
    }

    /// Make handles for this camera report reconfiguration as unsupported,
    /// forcing the arbiter down the close-and-reopen path.
    pub fn set_reject_reconfigure(&self, id: CameraId, reject: bool) {
        let mut set = self.reject_reconfigure.lock();
        if reject {
            set.insert(id);
        } else {
            set.remove(&id);
        }
    }
}

impl CameraBackend for MockBackend {
    fn open(
        &self,
        id: CameraId,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureHandle>, DeviceError> {
        if self.failing.lock().contains(&id) {
            return Err(DeviceError::OpenFailed(id, "sensor disconnected".into()));
        }
        self.telemetry(id).on_open();
        Ok(Box::new(MockHandle {
            id,
            config: *config,
            backend: self.clone(),
            sequence: AtomicU64::new(0),
        }))
    }
}

struct MockHandle {
    id: CameraId,
    config: CaptureConfig,
    backend: MockBackend,
    sequence: AtomicU64,
}

impl CaptureHandle for MockHandle {
    fn camera_id(&self) -> CameraId {
        self.id
    }

    fn config(&self) -> &CaptureConfig {
        &self.config
    }

    fn read_frame(&mut self) -> Result<Vec<u8>, DeviceError> {
        if self.backend.read_failing.lock().contains(&self.id) {
            return Err(DeviceError::Disconnected(self.id));
        }
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        Ok(fabricate_jpeg(self.id, &self.config, seq))
    }

    fn reconfigure(&mut self, config: &CaptureConfig) -> Result<(), DeviceError> {
        if self.backend.reject_reconfigure.lock().contains(&self.id) {
            return Err(DeviceError::ReconfigureUnsupported(self.id));
        }
        self.backend.telemetry(self.id).reconfigures.fetch_add(1, Ordering::SeqCst);
        self.config = *config;
        Ok(())
    }

    fn close(self: Box<Self>) {
        self.backend.telemetry(self.id).on_close();
    }
}

/// Build a frame that passes the resolution class's size sanity bounds
/// and carries SOI/EOI markers plus the camera id and sequence number.
fn fabricate_jpeg(id: CameraId, config: &CaptureConfig, sequence: u64) -> Vec<u8> {
    let (min, _) = config.resolution.class().frame_size_bounds();
    let len = min + 2_048;
    let mut frame = vec![0u8; len];
    frame[0] = 0xFF;
    frame[1] = 0xD8;
    frame[2] = id.index() as u8;
    frame[3..11].copy_from_slice(&sequence.to_be_bytes());
    frame[len - 2] = 0xFF;
    frame[len - 1] = 0xD9;
    frame
}
