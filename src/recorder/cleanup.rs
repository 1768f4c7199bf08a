//! Retention sweep
//!
//! Two deletion triggers over the storage tree: segments older than the
//! configured age, and a free-space floor for the volume holding the
//! root (oldest segments go first until the floor is met). Empty date
//! directories are pruned afterwards. Runs on demand; scheduling is the
//! caller's concern.

use crate::config::CleanupSettings;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const GIB: u64 = 1024 * 1024 * 1024;

struct StoredSegment {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

/// Sweep the storage tree. Returns the number of files deleted.
pub fn sweep(root: &Path, settings: &CleanupSettings) -> std::io::Result<usize> {
    if !settings.enabled || !root.exists() {
        return Ok(0);
    }

    let segments = stored_segments(root)?;
    let cutoff = SystemTime::now() - Duration::from_secs(u64::from(settings.max_age_days) * 86_400);

    let mut deleted = 0;
    let mut kept = Vec::new();
    for segment in segments {
        if segment.modified < cutoff {
            match std::fs::remove_file(&segment.path) {
                Ok(()) => {
                    tracing::debug!("retention sweep removed aged {:?}", segment.path);
                    deleted += 1;
                    continue;
                }
                Err(e) => tracing::warn!("retention sweep failed for {:?}: {}", segment.path, e),
            }
        }
        kept.push(segment);
    }

    if settings.min_free_space_gb > 0 {
        if let Some(available) = available_space(root) {
            deleted += enforce_free_space(kept, available, settings.min_free_space_gb * GIB);
        }
    }

    prune_empty_date_dirs(root)?;
    if deleted > 0 {
        tracing::info!("retention sweep deleted {} segments under {:?}", deleted, root);
    }
    Ok(deleted)
}

/// Every segment file under the `{camN}/{YYMMDD}` tree, oldest first.
fn stored_segments(root: &Path) -> std::io::Result<Vec<StoredSegment>> {
    let mut segments = Vec::new();
    for camera_dir in std::fs::read_dir(root)? {
        let camera_dir = camera_dir?.path();
        if !camera_dir.is_dir() {
            continue;
        }
        for date_dir in std::fs::read_dir(&camera_dir)? {
            let date_dir = date_dir?.path();
            if !date_dir.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(&date_dir)? {
                let path = entry?.path();
                let Ok(metadata) = path.metadata() else { continue };
                let Ok(modified) = metadata.modified() else { continue };
                segments.push(StoredSegment {
                    path,
                    modified,
                    size: metadata.len(),
                });
            }
        }
    }
    segments.sort_by_key(|s| s.modified);
    Ok(segments)
}

/// Delete oldest-first until the projected free space reaches `floor`.
/// Returns the number of files deleted.
fn enforce_free_space(segments: Vec<StoredSegment>, mut available: u64, floor: u64) -> usize {
    if available >= floor {
        return 0;
    }
    tracing::warn!(
        "free space {} B below floor {} B, deleting oldest segments",
        available,
        floor
    );
    let mut deleted = 0;
    for segment in segments {
        if available >= floor {
            break;
        }
        match std::fs::remove_file(&segment.path) {
            Ok(()) => {
                tracing::debug!("retention sweep removed {:?} for space", segment.path);
                available += segment.size;
                deleted += 1;
            }
            Err(e) => tracing::warn!("retention sweep failed for {:?}: {}", segment.path, e),
        }
    }
    deleted
}

/// Free bytes on the volume holding `root`: the mounted disk with the
/// longest mount point that is a prefix of the root's canonical path.
fn available_space(root: &Path) -> Option<u64> {
    let target = root.canonicalize().ok()?;
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| target.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

fn prune_empty_date_dirs(root: &Path) -> std::io::Result<()> {
    for camera_dir in std::fs::read_dir(root)? {
        let camera_dir = camera_dir?.path();
        if !camera_dir.is_dir() {
            continue;
        }
        for date_dir in std::fs::read_dir(&camera_dir)? {
            let date_dir = date_dir?.path();
            if date_dir.is_dir() && std::fs::read_dir(&date_dir)?.next().is_none() {
                let _ = std::fs::remove_dir(&date_dir);
            }
        }
    }
    Ok(())
}
