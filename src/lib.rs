//! dualcam: dual-camera streaming and recording core.
//!
//! Serializes access to two camera peripherals across live streaming,
//! view switching, and continuous segment recording. The crate is the
//! core of a CCTV node: a transport layer (HTTP or otherwise) calls into
//! [`arbiter::CameraArbiter`] and maps its typed errors to its own
//! status codes.

pub mod arbiter;
pub mod config;
pub mod device;
pub mod error;
pub mod recorder;
pub mod stream;

pub use arbiter::{CameraArbiter, CameraId, SharingPolicy, ViewMode};
pub use config::Config;
pub use error::{ArbiterError, DeviceError, RecorderError, StreamError};
