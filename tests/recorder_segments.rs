//! Recorder integration tests
//!
//! Drives real recording sessions against the mock backend with short
//! strides and checks the properties that matter for CCTV footage:
//! segment count and coverage across rotations, overlap duplication,
//! partial-segment retention on stop, and error surfacing.

use dualcam::arbiter::state::{CameraId, ResolutionClass, SharingPolicy, ViewMode};
use dualcam::arbiter::CameraArbiter;
use dualcam::config::Config;
use dualcam::device::mock::MockBackend;
use dualcam::error::RecorderError;
use dualcam::recorder::{spawn_session, RawEncoderFactory, RecorderState, RecordingOptions, Segment};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn streaming_arbiter() -> (MockBackend, Arc<CameraArbiter>) {
    let backend = MockBackend::new();
    let mut config = Config::default();
    config.recording.framerate = 100;
    config.streaming.framerate = 100;
    let arbiter = Arc::new(CameraArbiter::new(
        Arc::new(backend.clone()),
        Arc::new(RawEncoderFactory),
        config,
        SharingPolicy::SharedHandle,
    ));
    arbiter.request_mode(ViewMode::Single(CameraId::Cam0)).unwrap();
    (backend, arbiter)
}

fn options(root: &Path, segment: Duration, overlap: Duration) -> RecordingOptions {
    RecordingOptions {
        segment_duration: segment,
        overlap,
        storage_root: root.to_path_buf(),
        verify_segments: false,
        finalize_timeout: Duration::from_secs(2),
    }
}

/// The mock fabricates fixed-size frames with the capture sequence at a
/// known offset, so a raw segment file decodes back into the sequence
/// numbers it covered.
fn frame_sequences(path: &Path) -> Vec<u64> {
    let frame_len = ResolutionClass::Sd480.frame_size_bounds().0 + 2_048;
    let bytes = std::fs::read(path).unwrap();
    assert_eq!(bytes.len() % frame_len, 0, "truncated frame in {path:?}");
    bytes
        .chunks(frame_len)
        .map(|frame| u64::from_be_bytes(frame[3..11].try_into().unwrap()))
        .collect()
}

fn sorted_by_index(mut segments: Vec<Segment>) -> Vec<Segment> {
    segments.sort_by_key(|s| s.sequence_index);
    segments
}

/// Running for a bit over two strides yields three segments: two full,
/// one partial, with no coverage gap at either boundary.
#[tokio::test]
async fn rotation_covers_the_session_without_gaps() {
    let dir = tempfile::tempdir().unwrap();
    let (_backend, arbiter) = streaming_arbiter();
    let stream = arbiter.subscribe(CameraId::Cam0).unwrap();

    let handle = spawn_session(
        CameraId::Cam0,
        options(dir.path(), Duration::from_millis(300), Duration::ZERO),
        Arc::new(RawEncoderFactory),
        stream,
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.state(), RecorderState::Recording);

    tokio::time::sleep(Duration::from_millis(700)).await;
    let segments = sorted_by_index(handle.stop().await.unwrap());
    arbiter.shutdown().await;

    assert_eq!(segments.len(), 3, "expected two rotations plus the partial tail");
    for (i, segment) in segments.iter().enumerate() {
        assert_eq!(segment.sequence_index, i as u64);
        assert!(segment.file_path.exists());
    }

    for pair in segments.windows(2) {
        let previous = frame_sequences(&pair[0].file_path);
        let next = frame_sequences(&pair[1].file_path);
        assert!(!previous.is_empty() && !next.is_empty());
        assert!(
            next[0] <= previous[previous.len() - 1] + 1,
            "coverage gap between segments {} and {}",
            pair[0].sequence_index,
            pair[1].sequence_index
        );
    }
}

/// With a nonzero overlap the boundary frames land in both files.
#[tokio::test]
async fn overlap_duplicates_frames_across_the_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let (_backend, arbiter) = streaming_arbiter();
    let stream = arbiter.subscribe(CameraId::Cam0).unwrap();

    let handle = spawn_session(
        CameraId::Cam0,
        options(
            dir.path(),
            Duration::from_millis(300),
            Duration::from_millis(100),
        ),
        Arc::new(RawEncoderFactory),
        stream,
    );
    // Stride is 200ms; run past two rotations.
    tokio::time::sleep(Duration::from_millis(530)).await;
    let segments = sorted_by_index(handle.stop().await.unwrap());
    arbiter.shutdown().await;

    assert!(segments.len() >= 3, "got {} segments", segments.len());
    for pair in segments.windows(2) {
        let previous = frame_sequences(&pair[0].file_path);
        let next = frame_sequences(&pair[1].file_path);
        assert!(
            next[0] <= previous[previous.len() - 1],
            "segments {} and {} share no frames",
            pair[0].sequence_index,
            pair[1].sequence_index
        );
    }
}

/// Stopping mid-segment keeps the partial file and lists it.
#[tokio::test]
async fn stop_keeps_the_partial_segment() {
    let dir = tempfile::tempdir().unwrap();
    let (_backend, arbiter) = streaming_arbiter();
    let stream = arbiter.subscribe(CameraId::Cam0).unwrap();

    let handle = spawn_session(
        CameraId::Cam0,
        options(dir.path(), Duration::from_secs(30), Duration::ZERO),
        Arc::new(RawEncoderFactory),
        stream,
    );
    tokio::time::sleep(Duration::from_millis(150)).await;
    let segments = handle.stop().await.unwrap();
    arbiter.shutdown().await;

    assert_eq!(segments.len(), 1);
    let frames = frame_sequences(&segments[0].file_path);
    assert!(!frames.is_empty(), "partial segment lost its frames");
}

/// A rotation that outpaces the camera produces empty files; those are
/// removed instead of being listed as footage.
#[tokio::test]
async fn frameless_segments_are_removed() {
    let dir = tempfile::tempdir().unwrap();
    let backend = MockBackend::new();
    let mut config = Config::default();
    // One frame per second against a 50ms stride: most segments see none.
    config.recording.framerate = 1;
    config.streaming.framerate = 1;
    let arbiter = Arc::new(CameraArbiter::new(
        Arc::new(backend.clone()),
        Arc::new(RawEncoderFactory),
        config,
        SharingPolicy::SharedHandle,
    ));
    arbiter.request_mode(ViewMode::Single(CameraId::Cam0)).unwrap();
    let stream = arbiter.subscribe(CameraId::Cam0).unwrap();

    let handle = spawn_session(
        CameraId::Cam0,
        options(dir.path(), Duration::from_millis(50), Duration::ZERO),
        Arc::new(RawEncoderFactory),
        stream,
    );
    tokio::time::sleep(Duration::from_millis(300)).await;
    let segments = handle.stop().await.unwrap();
    arbiter.shutdown().await;

    for segment in &segments {
        assert!(!frame_sequences(&segment.file_path).is_empty());
    }
    // Nothing on disk beyond what was listed.
    let mut on_disk = 0;
    for camera_dir in std::fs::read_dir(dir.path()).unwrap() {
        for date_dir in std::fs::read_dir(camera_dir.unwrap().path()).unwrap() {
            on_disk += std::fs::read_dir(date_dir.unwrap().path()).unwrap().count();
        }
    }
    assert_eq!(on_disk, segments.len());
}

/// An unusable storage root fails the session with a storage error.
#[tokio::test]
async fn unwritable_storage_root_surfaces_as_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let (_backend, arbiter) = streaming_arbiter();
    let stream = arbiter.subscribe(CameraId::Cam0).unwrap();

    let handle = spawn_session(
        CameraId::Cam0,
        options(&blocker.join("footage"), Duration::from_millis(200), Duration::ZERO),
        Arc::new(RawEncoderFactory),
        stream,
    );
    let result = handle.stop().await;
    arbiter.shutdown().await;
    assert!(matches!(result, Err(RecorderError::Storage(_))));
}

/// Losing the frame source mid-recording ends the session with
/// SourceClosed after flushing what was already written.
#[tokio::test]
async fn closed_frame_source_ends_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let (backend, arbiter) = streaming_arbiter();
    let stream = arbiter.subscribe(CameraId::Cam0).unwrap();

    let handle = spawn_session(
        CameraId::Cam0,
        options(dir.path(), Duration::from_secs(30), Duration::ZERO),
        Arc::new(RawEncoderFactory),
        stream,
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The session here is not registered with the arbiter, so moving the
    // view away tears down camera 0 and closes the fan-out under it.
    arbiter.request_mode(ViewMode::Single(CameraId::Cam1)).unwrap();
    assert_eq!(backend.telemetry(CameraId::Cam0).open_now(), 0);

    let result = handle.stop().await;
    arbiter.shutdown().await;
    assert!(matches!(result, Err(RecorderError::SourceClosed)));
}

/// End-to-end through the arbiter: start_recording writes footage under
/// the configured root and stop_recording returns cleanly.
#[tokio::test]
async fn arbiter_recording_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (_backend, arbiter) = streaming_arbiter();

    arbiter
        .start_recording(
            CameraId::Cam0,
            options(dir.path(), Duration::from_millis(200), Duration::ZERO),
        )
        .unwrap();
    assert!(arbiter.is_recording(CameraId::Cam0));
    tokio::time::sleep(Duration::from_millis(500)).await;
    arbiter.stop_recording(CameraId::Cam0).await.unwrap();
    arbiter.shutdown().await;

    let camera_dir = dir.path().join("cam0");
    assert!(camera_dir.is_dir(), "no footage written under {camera_dir:?}");
    let mut files = 0;
    for date_dir in std::fs::read_dir(&camera_dir).unwrap() {
        files += std::fs::read_dir(date_dir.unwrap().path()).unwrap().count();
    }
    assert!(files >= 2, "expected at least two segments, found {files}");
}
