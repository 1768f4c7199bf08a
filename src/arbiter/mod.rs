//! Camera arbitration
//!
//! The single point of truth for camera hardware access:
//! - [`state`]: identifiers, capture configuration, view modes
//! - [`clients`]: bounded streaming-client admission
//! - [`core`]: the arbiter itself

pub mod clients;
pub mod core;
pub mod state;

pub use clients::{ClientSlot, ClientSlots};
pub use core::CameraArbiter;
pub use state::{CameraId, CaptureConfig, PixelFormat, Resolution, ResolutionClass, SharingPolicy, ViewMode};
