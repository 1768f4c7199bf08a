//! nokhwa camera backend
//!
//! Real webcam backend for platforms nokhwa supports (V4L2 on Linux).
//! Cameras are asked for MJPEG so the stream path gets encoded frames
//! without a CPU transcode step.

use super::{CameraBackend, CaptureHandle};
use crate::arbiter::state::{CameraId, CaptureConfig, PixelFormat};
use crate::error::DeviceError;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution as NokhwaResolution,
};
use nokhwa::Camera;

/// Backend mapping [`CameraId`] to nokhwa device indices 0 and 1.
#[derive(Debug, Default, Clone, Copy)]
pub struct NokhwaBackend;

impl NokhwaBackend {
    pub fn new() -> Self {
        Self
    }
}

fn frame_format(pixel_format: PixelFormat) -> FrameFormat {
    match pixel_format {
        PixelFormat::Mjpeg => FrameFormat::MJPEG,
        PixelFormat::Yuv420 => FrameFormat::YUYV,
        PixelFormat::Rgb888 => FrameFormat::RAWRGB,
    }
}

impl CameraBackend for NokhwaBackend {
    fn open(
        &self,
        id: CameraId,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureHandle>, DeviceError> {
        let index = CameraIndex::Index(id.index());
        let resolution = NokhwaResolution::new(config.resolution.width, config.resolution.height);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            CameraFormat::new(resolution, frame_format(config.pixel_format), config.framerate),
        ));

        let mut camera = Camera::new(index, requested)
            .map_err(|e| DeviceError::OpenFailed(id, e.to_string()))?;
        camera
            .open_stream()
            .map_err(|e| DeviceError::OpenFailed(id, e.to_string()))?;

        let actual = camera.camera_format();
        tracing::info!(
            "camera {} opened: {}x{} @ {}fps ({:?})",
            id,
            actual.resolution().width(),
            actual.resolution().height(),
            actual.frame_rate(),
            actual.format(),
        );

        Ok(Box::new(NokhwaHandle {
            id,
            config: *config,
            camera,
        }))
    }
}

struct NokhwaHandle {
    id: CameraId,
    config: CaptureConfig,
    camera: Camera,
}

impl CaptureHandle for NokhwaHandle {
    fn camera_id(&self) -> CameraId {
        self.id
    }

    fn config(&self) -> &CaptureConfig {
        &self.config
    }

    fn read_frame(&mut self) -> Result<Vec<u8>, DeviceError> {
        // The camera controls timing; this blocks until the next frame.
        let frame = self
            .camera
            .frame()
            .map_err(|e| DeviceError::ReadFailed(self.id, e.to_string()))?;
        Ok(frame.buffer().to_vec())
    }

    // In-place reconfiguration is left to the default (unsupported):
    // nokhwa requires reopening the stream to change formats, which is
    // exactly the arbiter's fallback path.

    fn close(self: Box<Self>) {
        let mut camera = self.camera;
        if let Err(e) = camera.stop_stream() {
            tracing::warn!("camera {} stop_stream failed: {}", self.id, e);
        }
    }
}
