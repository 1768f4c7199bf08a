//! Device driver layer
//!
//! The opaque capability the core depends on: open a camera with a
//! configuration, pull encoded frames, close. Any platform providing this
//! can back the arbiter: a real camera API, a video file, or the mock.

pub mod mock;

#[cfg(feature = "nokhwa-backend")]
pub mod nokhwa;

use crate::arbiter::state::{CameraId, CaptureConfig};
use crate::error::DeviceError;

/// Factory for capture handles. The arbiter is the only caller.
pub trait CameraBackend: Send + Sync {
    /// Open the physical device. Fails if the sensor is disconnected or
    /// already held elsewhere at the driver level.
    fn open(
        &self,
        id: CameraId,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureHandle>, DeviceError>;
}

/// Live connection to one physical camera, owning its current
/// configuration. Exactly one handle per camera exists at a time; the
/// arbiter enforces this.
pub trait CaptureHandle: Send {
    fn camera_id(&self) -> CameraId;

    fn config(&self) -> &CaptureConfig;

    /// Pull the next encoded frame. Blocks for at most roughly one frame
    /// interval; pacing beyond that is the capture loop's job.
    fn read_frame(&mut self) -> Result<Vec<u8>, DeviceError>;

    /// Apply a new configuration without releasing the device. Backends
    /// that cannot do this return [`DeviceError::ReconfigureUnsupported`]
    /// and the arbiter falls back to close-and-reopen.
    fn reconfigure(&mut self, config: &CaptureConfig) -> Result<(), DeviceError> {
        let _ = config;
        Err(DeviceError::ReconfigureUnsupported(self.camera_id()))
    }

    /// Release the device. Consumes the handle; the arbiter calls this
    /// synchronously inside its critical section.
    fn close(self: Box<Self>);
}
