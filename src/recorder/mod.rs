//! Continuous recording
//!
//! Per-camera rotation loop writing fixed-duration segments:
//! - [`state`]: recorder state machine and session descriptor
//! - [`segment`]: segment metadata and the date-partitioned layout
//! - [`encoder`]: pluggable segment encoders (ffmpeg child process, raw)
//! - [`session`]: the rotation loop itself
//! - [`cleanup`]: age-based retention sweep

pub mod cleanup;
pub mod encoder;
pub mod segment;
pub mod session;
pub mod state;

pub use encoder::{EncoderFactory, FfmpegEncoderFactory, RawEncoderFactory, SegmentEncoder};
pub use segment::Segment;
pub use session::{spawn_session, RecordingOptions, SessionHandle};
pub use state::{RecorderState, RecordingSession};
