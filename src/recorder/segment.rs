//! Segment metadata and output layout
//!
//! Segments land under `{root}/{camN}/{YYMMDD}/{camN}_{timestamp}.{ext}`.
//! Timestamps carry millisecond precision so sub-second strides cannot
//! collide. Date directories are created on demand.

use crate::arbiter::state::CameraId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One fixed-duration output file produced by continuous recording.
/// Immutable once finalized; ownership transfers to the filesystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub camera_id: CameraId,
    /// Strictly increasing within one session; no gaps, no duplicates.
    pub sequence_index: u64,
    pub started_at: DateTime<Utc>,
    pub file_path: PathBuf,
}

impl Segment {
    /// Allocate the next segment's metadata and create its date directory.
    pub fn create(
        root: &Path,
        camera_id: CameraId,
        sequence_index: u64,
        extension: &str,
    ) -> std::io::Result<Segment> {
        let started_at = Utc::now();
        let dir = root
            .join(camera_id.to_string())
            .join(started_at.format("%y%m%d").to_string());
        std::fs::create_dir_all(&dir)?;

        let file_name = format!(
            "{}_{}.{}",
            camera_id,
            started_at.format("%Y%m%d_%H%M%S_%3f"),
            extension
        );
        Ok(Segment {
            camera_id,
            sequence_index,
            started_at,
            file_path: dir.join(file_name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_builds_date_partitioned_path() {
        let dir = tempfile::tempdir().unwrap();
        let segment = Segment::create(dir.path(), CameraId::Cam0, 0, "mp4").unwrap();

        let relative = segment.file_path.strip_prefix(dir.path()).unwrap();
        let parts: Vec<_> = relative.components().collect();
        assert_eq!(parts.len(), 3, "cam dir / date dir / file");
        assert_eq!(parts[0].as_os_str(), "cam0");
        assert_eq!(parts[1].as_os_str().len(), 6, "YYMMDD");
        let name = segment.file_path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("cam0_"));
        assert!(name.ends_with(".mp4"));
        assert!(segment.file_path.parent().unwrap().is_dir());
    }

    #[test]
    fn sub_second_segments_get_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let a = Segment::create(dir.path(), CameraId::Cam1, 0, "mjpeg").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = Segment::create(dir.path(), CameraId::Cam1, 1, "mjpeg").unwrap();
        assert_ne!(a.file_path, b.file_path);
    }
}
