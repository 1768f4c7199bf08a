//! Recorder state machine and session tracking

use crate::arbiter::state::CameraId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Current state of one camera's recording session.
///
/// Transitions: `Idle -> Recording -> (Finalizing -> Recording)* -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    /// No recording in progress.
    Idle,
    /// Frames are being written to the current segment.
    Recording,
    /// The current segment is being closed while the next one opens.
    Finalizing,
}

impl Default for RecorderState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Descriptor of an active recording session, for the status surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub camera_id: CameraId,
    pub started_at: DateTime<Utc>,
    /// Length of each segment file, in seconds.
    pub segment_duration_secs: u64,
    /// Root directory segments are written under.
    pub output_dir: PathBuf,
}

impl RecordingSession {
    pub fn new(camera_id: CameraId, segment_duration_secs: u64, output_dir: PathBuf) -> Self {
        Self {
            camera_id,
            started_at: Utc::now(),
            segment_duration_secs,
            output_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_defaults_to_idle() {
        assert_eq!(RecorderState::default(), RecorderState::Idle);
    }

    #[test]
    fn session_serializes_camera_id() {
        let session = RecordingSession::new(CameraId::Cam1, 31, PathBuf::from("videos"));
        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains("\"cameraId\":\"cam1\""));
    }
}
