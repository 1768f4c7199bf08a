//! Error types and handling
//!
//! Typed errors surfaced by the arbiter, frame source, and recorder.
//! The control surface is responsible for mapping these to status codes;
//! nothing in the core swallows a device-level failure silently.

use crate::arbiter::state::{CameraId, ResolutionClass};
use thiserror::Error;

/// Failure at the device driver layer.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("camera {0} failed to open: {1}")]
    OpenFailed(CameraId, String),

    #[error("camera {0} disconnected")]
    Disconnected(CameraId),

    #[error("camera {0} read failed: {1}")]
    ReadFailed(CameraId, String),

    /// The backend cannot apply a new configuration in place;
    /// the arbiter falls back to close-and-reopen.
    #[error("camera {0} does not support in-place reconfiguration")]
    ReconfigureUnsupported(CameraId),
}

/// Errors returned by [`crate::arbiter::CameraArbiter`] operations.
#[derive(Error, Debug)]
pub enum ArbiterError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// The requested camera is exclusively held by an active recording
    /// session that policy forbids interrupting. Recoverable: retry after
    /// the recording ends.
    #[error("camera {0} is busy recording")]
    HardwareBusy(CameraId),

    /// Idempotency signal, not a failure: a session already exists.
    #[error("camera {0} is already recording")]
    AlreadyRecording(CameraId),

    /// Idempotency signal, not a failure: nothing was active.
    #[error("camera {0} is not recording")]
    NotRecording(CameraId),

    /// Per-resolution client cap reached. Recoverable by backing off.
    #[error("too many clients for {class} (max {max})")]
    TooManyClients { class: ResolutionClass, max: usize },

    /// A camera required by the requested mode is not available.
    #[error("camera {0} is not open")]
    CameraNotOpen(CameraId),
}

/// Errors surfaced by a recording session.
#[derive(Error, Debug)]
pub enum RecorderError {
    /// Disk write failed (no space, permissions). The session transitions
    /// to Idle; recoverable once space is freed.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Segment finalization exceeded its timeout. Degraded but non-fatal:
    /// the session opens the next segment anyway.
    #[error("segment finalization timed out after {0:?}")]
    FinalizeTimeout(std::time::Duration),

    #[error("encoder error: {0}")]
    Encoder(String),

    /// The camera feeding this session closed underneath it.
    #[error("frame source closed")]
    SourceClosed,
}

/// Errors observed by a stream subscriber.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The underlying capture handle closed (mode switch elsewhere);
    /// the subscriber stream is finished.
    #[error("frame source closed")]
    SourceClosed,
}

/// Result alias for arbiter operations.
pub type ArbiterResult<T> = Result<T, ArbiterError>;

/// Result alias for recorder operations.
pub type RecorderResult<T> = Result<T, RecorderError>;
