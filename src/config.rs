//! Configuration loading
//!
//! A single strongly-typed configuration struct populated once at startup
//! and passed by reference to components. Absent keys fall back to the
//! documented defaults; there is no runtime key-path lookup.

use crate::arbiter::state::{CameraId, Resolution};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub recording: RecordingSettings,
    pub streaming: StreamingSettings,
    pub storage: StorageSettings,
    pub cleanup: CleanupSettings,
}

/// Continuous-recording settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingSettings {
    pub enabled: bool,
    /// Length of each segment file, in seconds.
    pub segment_duration_secs: u64,
    /// Dual-write window between consecutive segments, in seconds.
    /// Zero selects a hard cut.
    pub overlap_secs: u64,
    /// Target encoder bitrate in bits per second.
    pub bitrate: u32,
    pub framerate: u32,
    pub resolution: Resolution,
    /// Verify each finalized segment's duration with ffprobe.
    pub verify_segments: bool,
    /// Budget for finalizing a segment before the session gives up on it
    /// and opens the next one.
    pub finalize_timeout_secs: u64,
    /// Cameras eligible for recording.
    pub cameras: Vec<CameraId>,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            segment_duration_secs: 31,
            overlap_secs: 1,
            bitrate: 5_000_000,
            framerate: 30,
            resolution: Resolution::SD_480,
            verify_segments: false,
            finalize_timeout_secs: 5,
            cameras: CameraId::ALL.to_vec(),
        }
    }
}

impl RecordingSettings {
    pub fn segment_duration(&self) -> Duration {
        Duration::from_secs(self.segment_duration_secs)
    }

    pub fn overlap(&self) -> Duration {
        Duration::from_secs(self.overlap_secs)
    }

    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_secs(self.finalize_timeout_secs)
    }
}

/// Live-preview streaming settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamingSettings {
    /// Concurrent client cap per resolution class.
    pub max_clients: usize,
    pub default_resolution: Resolution,
    /// Capture rate for preview streams, independent of the recording
    /// framerate.
    pub framerate: u32,
    /// Horizontal flip applied at the sensor.
    pub mirror_mode: bool,
    /// Per-camera fan-out queue depth; lagging subscribers skip ahead.
    pub buffer_size: usize,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            max_clients: 2,
            default_resolution: Resolution::SD_480,
            framerate: 30,
            mirror_mode: true,
            buffer_size: 10,
        }
    }
}

/// Where segments land on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Root of the per-camera, date-partitioned output tree.
    pub root: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("videos"),
        }
    }
}

/// Retention sweep settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CleanupSettings {
    pub enabled: bool,
    /// Segments older than this are deleted by the sweep.
    pub max_age_days: u32,
    /// When the volume holding the storage root has less free space than
    /// this, the sweep deletes oldest segments first until the floor is
    /// met again. Zero disables the space trigger.
    pub min_free_space_gb: u64,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_age_days: 30,
            min_free_space_gb: 10,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file. A missing file yields the
    /// defaults; a present file only needs the keys it wants to override.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        if !path.exists() {
            tracing::warn!("config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tracing::info!("loaded config from {:?}", path);
        Ok(config)
    }
}
