//! Frame fan-out
//!
//! Per-camera distribution of encoded frames to any number of stream
//! subscribers without duplicating the underlying capture:
//! - [`Frame`]: one encoded frame, cheap to clone
//! - [`FrameStream`]: a subscriber's cursor into the fan-out
//! - [`StreamStats`]: per-camera throughput accounting

pub mod source;
pub mod stats;

pub use source::{Frame, FrameStream};
pub use stats::{StatsSnapshot, StreamStats};
