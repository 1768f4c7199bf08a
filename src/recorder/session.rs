//! Recording session loop
//!
//! One tokio task per recording camera. The task subscribes to the
//! camera's frame fan-out and rotates output files on a wall-clock
//! stride, with an optional dual-write overlap window between
//! consecutive segments so coverage has no gap.

use crate::arbiter::state::CameraId;
use crate::config::Config;
use crate::error::{RecorderError, RecorderResult, StreamError};
use crate::recorder::encoder::{probe_duration, EncoderFactory, SegmentEncoder};
use crate::recorder::segment::Segment;
use crate::recorder::state::{RecorderState, RecordingSession};
use crate::stream::FrameStream;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Everything a session needs to run, independent of global config.
#[derive(Debug, Clone)]
pub struct RecordingOptions {
    pub segment_duration: Duration,
    /// Dual-write window between consecutive segments. Zero is a hard cut.
    pub overlap: Duration,
    pub storage_root: PathBuf,
    /// Verify each finalized segment's duration with ffprobe.
    pub verify_segments: bool,
    /// Budget for finalizing before the session moves on regardless.
    pub finalize_timeout: Duration,
}

impl RecordingOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            segment_duration: config.recording.segment_duration(),
            overlap: config.recording.overlap(),
            storage_root: config.storage.root.clone(),
            verify_segments: config.recording.verify_segments,
            finalize_timeout: config.recording.finalize_timeout(),
        }
    }

    /// Interval between consecutive segment starts. An overlap at least
    /// as long as the segment itself degrades to a hard cut.
    pub fn stride(&self) -> Duration {
        if self.overlap < self.segment_duration {
            self.segment_duration - self.overlap
        } else {
            self.segment_duration
        }
    }
}

/// Handle to a running session, owned by the arbiter.
pub struct SessionHandle {
    descriptor: RecordingSession,
    state: Arc<RwLock<RecorderState>>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<RecorderResult<Vec<Segment>>>,
}

impl SessionHandle {
    pub fn descriptor(&self) -> &RecordingSession {
        &self.descriptor
    }

    pub fn state(&self) -> RecorderState {
        *self.state.read()
    }

    /// Signal stop and wait for the final (possibly partial) segment to
    /// be flushed. Returns every segment the session finalized.
    pub async fn stop(self) -> RecorderResult<Vec<Segment>> {
        let _ = self.stop_tx.send(true);
        match self.task.await {
            Ok(result) => result,
            Err(join) => Err(RecorderError::Encoder(format!("session task failed: {join}"))),
        }
    }
}

/// Start a recording session feeding from `stream`.
pub fn spawn_session(
    camera_id: CameraId,
    options: RecordingOptions,
    factory: Arc<dyn EncoderFactory>,
    stream: FrameStream,
) -> SessionHandle {
    let descriptor = RecordingSession::new(
        camera_id,
        options.segment_duration.as_secs(),
        options.storage_root.clone(),
    );
    let state = Arc::new(RwLock::new(RecorderState::Idle));
    let (stop_tx, stop_rx) = watch::channel(false);

    tracing::info!(
        "recording started for {}: {:?} segments, {:?} overlap, root {:?}",
        camera_id,
        options.segment_duration,
        options.overlap,
        options.storage_root
    );

    let task_state = Arc::clone(&state);
    let task = tokio::spawn(async move {
        *task_state.write() = RecorderState::Recording;
        let result = run_session(camera_id, &options, factory, stream, stop_rx, &task_state).await;
        *task_state.write() = RecorderState::Idle;
        match &result {
            Ok(segments) => {
                tracing::info!("recording session for {} ended: {} segments", camera_id, segments.len());
            }
            Err(e) => {
                tracing::error!("recording session for {} ended with error: {}", camera_id, e);
            }
        }
        result
    });

    SessionHandle {
        descriptor,
        state,
        stop_tx,
        task,
    }
}

struct OpenSegment {
    segment: Segment,
    encoder: Box<dyn SegmentEncoder>,
    frames_written: u64,
}

struct RetiringSegment {
    open: OpenSegment,
    close_at: Instant,
}

async fn run_session(
    camera_id: CameraId,
    options: &RecordingOptions,
    factory: Arc<dyn EncoderFactory>,
    mut stream: FrameStream,
    mut stop_rx: watch::Receiver<bool>,
    state: &RwLock<RecorderState>,
) -> RecorderResult<Vec<Segment>> {
    let stride = options.stride();
    let mut finalized: Vec<Segment> = Vec::new();
    let mut sequence: u64 = 0;

    let mut current = open_segment(camera_id, options, &*factory, sequence)?;
    let mut rotate_at = Instant::now() + stride;
    let mut retiring: Option<RetiringSegment> = None;

    let result = loop {
        let retire_at = retiring.as_ref().map(|r| r.close_at);

        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break Ok(());
                }
            }

            _ = tokio::time::sleep_until(rotate_at) => {
                // Open the successor first so the coverage gap stays
                // under one frame interval.
                sequence += 1;
                let next = match open_segment(camera_id, options, &*factory, sequence) {
                    Ok(next) => next,
                    Err(e) => break Err(e),
                };
                rotate_at += stride;

                let outgoing = std::mem::replace(&mut current, next);
                if options.overlap.is_zero() {
                    *state.write() = RecorderState::Finalizing;
                    finalize_segment(outgoing, options, &mut finalized).await;
                    *state.write() = RecorderState::Recording;
                } else {
                    // Hold the outgoing encoder open for the overlap
                    // window; both files receive the frames in between.
                    if let Some(previous) = retiring.take() {
                        finalize_segment(previous.open, options, &mut finalized).await;
                    }
                    retiring = Some(RetiringSegment {
                        open: outgoing,
                        close_at: Instant::now() + options.overlap,
                    });
                }
            }

            _ = async { tokio::time::sleep_until(retire_at.unwrap()).await }, if retire_at.is_some() => {
                let previous = retiring.take().expect("guarded by retire_at");
                *state.write() = RecorderState::Finalizing;
                finalize_segment(previous.open, options, &mut finalized).await;
                *state.write() = RecorderState::Recording;
            }

            frame = stream.next() => {
                match frame {
                    Ok(frame) => {
                        if let Err(e) = current.write(frame.data()) {
                            tracing::error!("disk write failed for {}: {}", camera_id, e);
                            break Err(RecorderError::Storage(e));
                        }
                        if let Some(r) = retiring.as_mut() {
                            // Best effort: a failed overlap write only
                            // costs duplicate coverage, not the session.
                            let _ = r.open.write(frame.data());
                        }
                    }
                    Err(StreamError::SourceClosed) => {
                        tracing::warn!("frame source for {} closed under recording session", camera_id);
                        break Err(RecorderError::SourceClosed);
                    }
                }
            }
        }
    };

    // Teardown: flush whatever is open, keeping partial segments.
    if let Some(previous) = retiring.take() {
        finalize_segment(previous.open, options, &mut finalized).await;
    }
    finalize_segment(current, options, &mut finalized).await;

    result.map(|_| finalized)
}

impl OpenSegment {
    fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.encoder.write_frame(data)?;
        self.frames_written += 1;
        Ok(())
    }
}

fn open_segment(
    camera_id: CameraId,
    options: &RecordingOptions,
    factory: &dyn EncoderFactory,
    sequence: u64,
) -> RecorderResult<OpenSegment> {
    let segment = Segment::create(
        &options.storage_root,
        camera_id,
        sequence,
        factory.extension(),
    )?;
    let encoder = factory.create(&segment.file_path)?;
    tracing::debug!("opened segment {} for {}: {:?}", sequence, camera_id, segment.file_path);
    Ok(OpenSegment {
        segment,
        encoder,
        frames_written: 0,
    })
}

/// Finalize one segment within the configured budget. A slow finalize is
/// logged and abandoned so the next segment is never held up; a segment
/// that received no frames is removed as corrupt.
async fn finalize_segment(
    open: OpenSegment,
    options: &RecordingOptions,
    finalized: &mut Vec<Segment>,
) {
    let OpenSegment {
        segment,
        encoder,
        frames_written,
    } = open;

    if frames_written == 0 {
        tracing::warn!("segment {:?} received no frames, removing", segment.file_path);
        let _ = std::fs::remove_file(&segment.file_path);
        return;
    }

    let path = segment.file_path.clone();
    let finish = tokio::task::spawn_blocking(move || encoder.finish());
    match tokio::time::timeout(options.finalize_timeout, finish).await {
        Ok(Ok(Ok(()))) => {
            if options.verify_segments {
                verify_segment(&segment, options);
            }
            tracing::info!(
                "finalized segment {} ({} frames): {:?}",
                segment.sequence_index,
                frames_written,
                path
            );
            finalized.push(segment);
        }
        Ok(Ok(Err(e))) => {
            tracing::error!("finalize failed for {:?}: {}", path, e);
            // The file may still hold usable frames; keep it listed.
            finalized.push(segment);
        }
        Ok(Err(join)) => {
            tracing::error!("finalize task panicked for {:?}: {}", path, join);
        }
        Err(_) => {
            // Availability over this segment's integrity: move on.
            tracing::warn!(
                "finalize timed out after {:?} for {:?}, continuing",
                options.finalize_timeout,
                path
            );
            finalized.push(segment);
        }
    }
}

fn verify_segment(segment: &Segment, options: &RecordingOptions) {
    match probe_duration(&segment.file_path) {
        Ok(duration) => {
            let expected = options.segment_duration.as_secs_f64();
            if duration > expected + 2.0 {
                tracing::warn!(
                    "segment {:?} duration {:.1}s exceeds expected {:.1}s",
                    segment.file_path,
                    duration,
                    expected
                );
            } else {
                tracing::debug!("segment {:?} verified: {:.1}s", segment.file_path, duration);
            }
        }
        Err(e) => {
            tracing::warn!("duration verification failed for {:?}: {}", segment.file_path, e);
        }
    }
}
