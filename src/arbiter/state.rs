//! Arbitration state types
//!
//! Identifiers, capture configuration, and the system-wide view mode.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one of the two physical camera sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraId {
    Cam0,
    Cam1,
}

impl CameraId {
    /// Both sensors, in index order.
    pub const ALL: [CameraId; 2] = [CameraId::Cam0, CameraId::Cam1];

    /// Numeric index used in file names and device selection.
    pub fn index(self) -> u32 {
        match self {
            CameraId::Cam0 => 0,
            CameraId::Cam1 => 1,
        }
    }

    /// The other sensor.
    pub fn other(self) -> CameraId {
        match self {
            CameraId::Cam0 => CameraId::Cam1,
            CameraId::Cam1 => CameraId::Cam0,
        }
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cam{}", self.index())
    }
}

/// Video resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const SD_480: Resolution = Resolution { width: 640, height: 480 };
    pub const HD_720: Resolution = Resolution { width: 1280, height: 720 };
    pub const FHD_1080: Resolution = Resolution { width: 1920, height: 1080 };

    /// The resolution class used for client-slot accounting.
    pub fn class(self) -> ResolutionClass {
        if self.width > 640 {
            ResolutionClass::Hd720
        } else {
            ResolutionClass::Sd480
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Resolution class for streaming client caps and frame sanity bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionClass {
    /// 640x480 previews.
    Sd480,
    /// 1280x720 previews.
    Hd720,
}

impl ResolutionClass {
    /// Plausible encoded-frame size range for this class, in bytes.
    /// Frames outside the range are treated as corrupt and dropped.
    pub fn frame_size_bounds(self) -> (usize, usize) {
        match self {
            ResolutionClass::Sd480 => (2_000, 200_000),
            ResolutionClass::Hd720 => (5_000, 500_000),
        }
    }
}

impl fmt::Display for ResolutionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionClass::Sd480 => write!(f, "480p"),
            ResolutionClass::Hd720 => write!(f, "720p"),
        }
    }
}

/// Pixel format requested from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Camera-side JPEG compression; what the stream path wants.
    Mjpeg,
    /// Planar YUV; what the H.264 encode path wants.
    Yuv420,
    /// Packed RGB.
    Rgb888,
}

/// One camera's active configuration. Changing it requires either an
/// in-place reconfigure or a close-and-reopen of the underlying handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    pub resolution: Resolution,
    pub pixel_format: PixelFormat,
    /// Horizontal flip (mirror mode).
    pub mirrored: bool,
    /// Target capture rate in frames per second.
    pub framerate: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::SD_480,
            pixel_format: PixelFormat::Mjpeg,
            mirrored: true,
            framerate: 30,
        }
    }
}

/// System-wide selection of which camera(s) are actively streamed.
/// Exactly one mode is active at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode", content = "camera")]
pub enum ViewMode {
    /// Both cameras active at a shared lower resolution.
    Dual,
    /// One camera active with exclusive use of the resize/encode path.
    Single(CameraId),
}

impl ViewMode {
    /// Cameras this mode requires open.
    pub fn cameras(self) -> Vec<CameraId> {
        match self {
            ViewMode::Dual => CameraId::ALL.to_vec(),
            ViewMode::Single(id) => vec![id],
        }
    }

    pub fn requires(self, id: CameraId) -> bool {
        match self {
            ViewMode::Dual => true,
            ViewMode::Single(active) => active == id,
        }
    }
}

/// How recording and streaming share a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharingPolicy {
    /// Recording subscribes to the same capture fan-out the streamers
    /// use. Mode changes never touch a recording camera's handle and
    /// recording never evicts a client.
    SharedHandle,
    /// A recording camera is dedicated to the encoder path; requesting a
    /// mode that needs it fails with `HardwareBusy`.
    Exclusive,
}

impl Default for SharingPolicy {
    fn default() -> Self {
        Self::SharedHandle
    }
}
