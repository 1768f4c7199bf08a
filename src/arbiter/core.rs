//! Camera arbiter
//!
//! Single point of truth for which physical cameras are open, in what
//! configuration, and for what purpose. All handle opens and closes go
//! through here; everything else is in-memory bookkeeping. The lock is
//! held for bookkeeping and synchronous device open/close only, never
//! for frame delivery.

use crate::arbiter::clients::{ClientSlot, ClientSlots};
use crate::arbiter::state::{
    CameraId, CaptureConfig, PixelFormat, ResolutionClass, SharingPolicy, ViewMode,
};
use crate::config::Config;
use crate::device::{CameraBackend, CaptureHandle};
use crate::error::{ArbiterError, ArbiterResult, DeviceError};
use crate::recorder::encoder::EncoderFactory;
use crate::recorder::session::{spawn_session, RecordingOptions, SessionHandle};
use crate::recorder::state::RecorderState;
use crate::stream::{Frame, FrameStream, StatsSnapshot, StreamStats};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Consecutive read failures after which a camera is treated as
/// disconnected and torn down.
const MAX_READ_FAILURES: u32 = 10;

/// One open camera: its capture thread, fan-out channel, and stats.
struct ActiveCamera {
    config: CaptureConfig,
    sender: broadcast::Sender<Frame>,
    stats: Arc<StreamStats>,
    running: Arc<AtomicBool>,
    /// The capture thread returns the handle (still open) on stop so the
    /// arbiter can reconfigure without a reopen. `None` from the join
    /// means the thread closed the handle itself after the device died.
    thread: Option<JoinHandle<Option<Box<dyn CaptureHandle>>>>,
}

struct Inner {
    /// `None` until the first `request_mode`.
    mode: Option<ViewMode>,
    cameras: HashMap<CameraId, ActiveCamera>,
    recordings: HashMap<CameraId, SessionHandle>,
}

/// Arbitrates exclusive camera access across streaming and recording.
///
/// An explicit instance passed by reference to its collaborators; its
/// lifecycle is tied to the process.
pub struct CameraArbiter {
    backend: Arc<dyn CameraBackend>,
    encoder_factory: Arc<dyn EncoderFactory>,
    config: Config,
    policy: SharingPolicy,
    slots: ClientSlots,
    inner: Arc<Mutex<Inner>>,
}

impl CameraArbiter {
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        encoder_factory: Arc<dyn EncoderFactory>,
        config: Config,
        policy: SharingPolicy,
    ) -> Self {
        let slots = ClientSlots::new(config.streaming.max_clients);
        Self {
            backend,
            encoder_factory,
            config,
            policy,
            slots,
            inner: Arc::new(Mutex::new(Inner {
                mode: None,
                cameras: HashMap::new(),
                recordings: HashMap::new(),
            })),
        }
    }

    /// The active view mode, once one has been requested.
    pub fn mode(&self) -> Option<ViewMode> {
        self.inner.lock().mode
    }

    pub fn is_recording(&self, id: CameraId) -> bool {
        self.inner
            .lock()
            .recordings
            .get(&id)
            .map(|s| s.state() != RecorderState::Idle)
            .unwrap_or(false)
    }

    /// Throughput stats for an open camera.
    pub fn stats(&self, id: CameraId) -> Option<StatsSnapshot> {
        self.inner
            .lock()
            .cameras
            .get(&id)
            .map(|c| c.stats.snapshot())
    }

    /// Switch the system-wide view mode: closes handles no longer
    /// needed, opens or reconfigures handles now needed. Cameras held by
    /// a recording session are never touched under the shared-handle
    /// policy; under the exclusive policy requesting one fails with
    /// `HardwareBusy`.
    pub fn request_mode(&self, mode: ViewMode) -> ArbiterResult<()> {
        let mut inner = self.inner.lock();
        tracing::info!("view mode change: {:?} -> {:?}", inner.mode, mode);

        let stream_config = self.stream_config();
        let mut required: HashMap<CameraId, CaptureConfig> = HashMap::new();
        for id in mode.cameras() {
            if inner.recordings.contains_key(&id) {
                if self.policy == SharingPolicy::Exclusive {
                    return Err(ArbiterError::HardwareBusy(id));
                }
                // Shared handle: the recording configuration wins.
                let current = inner.cameras.get(&id).map(|c| c.config);
                required.insert(id, current.unwrap_or_else(|| self.recording_config()));
            } else {
                required.insert(id, stream_config);
            }
        }
        // Recording cameras stay open whatever the mode says.
        for id in inner.recordings.keys().copied().collect::<Vec<_>>() {
            let current = inner.cameras.get(&id).map(|c| c.config);
            required
                .entry(id)
                .or_insert_with(|| current.unwrap_or_else(|| self.recording_config()));
        }

        // Close first so a reopen never races a handle being torn down.
        let open_now: Vec<CameraId> = inner.cameras.keys().copied().collect();
        for id in open_now {
            if !required.contains_key(&id) {
                Self::close_camera(&mut inner, id);
            }
        }

        for (id, wanted) in required {
            let applied = match inner.cameras.get(&id) {
                None => self.open_camera(&mut inner, id, wanted),
                Some(active) if active.config == wanted => Ok(()),
                Some(_) if inner.recordings.contains_key(&id) => {
                    // Never reconfigure under a live encoder.
                    Ok(())
                }
                Some(_) => self.reconfigure_camera(&mut inner, id, wanted),
            };
            if let Err(e) = applied {
                // A half-applied transition must not report the old mode
                // as live. Close everything a recording does not hold and
                // clear the mode; the caller retries with a fresh request.
                let open_now: Vec<CameraId> = inner.cameras.keys().copied().collect();
                for open in open_now {
                    if !inner.recordings.contains_key(&open) {
                        Self::close_camera(&mut inner, open);
                    }
                }
                inner.mode = None;
                tracing::warn!("mode change to {:?} failed, view mode cleared: {}", mode, e);
                return Err(e);
            }
        }

        inner.mode = Some(mode);
        Ok(())
    }

    /// Start continuous recording for one camera. Fails with
    /// `AlreadyRecording` while a session is live; a session that died on
    /// its own (storage error) is reaped and replaced.
    pub fn start_recording(&self, id: CameraId, options: RecordingOptions) -> ArbiterResult<()> {
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.recordings.get(&id) {
            if existing.state() != RecorderState::Idle {
                return Err(ArbiterError::AlreadyRecording(id));
            }
            tracing::warn!("reaping dead recording session for {}", id);
            inner.recordings.remove(&id);
        }

        if self.policy == SharingPolicy::Exclusive
            && inner.mode.map_or(false, |m| m.requires(id))
        {
            return Err(ArbiterError::HardwareBusy(id));
        }

        let recording_config = self.recording_config();
        match inner.cameras.get(&id) {
            None => {
                self.open_camera(&mut inner, id, recording_config)?;
            }
            Some(active) if active.config == recording_config => {}
            Some(_) => {
                // Recording resolution wins; streams follow along.
                self.reconfigure_camera(&mut inner, id, recording_config)?;
            }
        }

        let stream = Self::subscribe_locked(&inner, id)?;
        let session = spawn_session(id, options, Arc::clone(&self.encoder_factory), stream);
        inner.recordings.insert(id, session);
        Ok(())
    }

    /// Stop recording for one camera and wait for the final segment to
    /// flush. Idempotent: a second call reports `NotRecording`.
    pub async fn stop_recording(&self, id: CameraId) -> ArbiterResult<()> {
        let session = self
            .inner
            .lock()
            .recordings
            .remove(&id)
            .ok_or(ArbiterError::NotRecording(id))?;

        // Teardown happens outside the lock; the session only holds a
        // subscriber cursor, not the device handle.
        match session.stop().await {
            Ok(segments) => {
                tracing::info!("recording stopped for {}: {} segments", id, segments.len());
            }
            Err(e) => {
                tracing::warn!("recording for {} ended with error: {}", id, e);
            }
        }

        // Release the handle if streaming no longer needs it either.
        let mut inner = self.inner.lock();
        let needed_by_mode = inner.mode.map_or(false, |m| m.requires(id));
        if !needed_by_mode && !inner.recordings.contains_key(&id) {
            Self::close_camera(&mut inner, id);
        }
        Ok(())
    }

    /// Claim a streaming client slot; atomic check-and-increment.
    pub fn acquire_client_slot(&self, class: ResolutionClass) -> ArbiterResult<ClientSlot> {
        self.slots.acquire(class)
    }

    /// Subscribe to one camera's frame fan-out. Each call yields an
    /// independent cursor; slow consumers never block fast ones.
    pub fn subscribe(&self, id: CameraId) -> ArbiterResult<FrameStream> {
        Self::subscribe_locked(&self.inner.lock(), id)
    }

    /// Stop all recordings and close every handle.
    pub async fn shutdown(&self) {
        let recording: Vec<CameraId> = self.inner.lock().recordings.keys().copied().collect();
        for id in recording {
            if let Err(e) = self.stop_recording(id).await {
                tracing::warn!("shutdown: stop_recording({}) failed: {}", id, e);
            }
        }
        let mut inner = self.inner.lock();
        let open: Vec<CameraId> = inner.cameras.keys().copied().collect();
        for id in open {
            Self::close_camera(&mut inner, id);
        }
        inner.mode = None;
        tracing::info!("arbiter shut down, all cameras closed");
    }

    fn subscribe_locked(inner: &Inner, id: CameraId) -> ArbiterResult<FrameStream> {
        inner
            .cameras
            .get(&id)
            .map(|c| FrameStream::new(id, c.sender.subscribe()))
            .ok_or(ArbiterError::CameraNotOpen(id))
    }

    /// Configuration streams want: the shared preview resolution.
    fn stream_config(&self) -> CaptureConfig {
        CaptureConfig {
            resolution: self.config.streaming.default_resolution,
            pixel_format: PixelFormat::Mjpeg,
            mirrored: self.config.streaming.mirror_mode,
            framerate: self.config.streaming.framerate,
        }
    }

    /// Configuration the encoder path wants.
    fn recording_config(&self) -> CaptureConfig {
        CaptureConfig {
            resolution: self.config.recording.resolution,
            pixel_format: PixelFormat::Mjpeg,
            mirrored: self.config.streaming.mirror_mode,
            framerate: self.config.recording.framerate,
        }
    }

    fn open_camera(
        &self,
        inner: &mut Inner,
        id: CameraId,
        config: CaptureConfig,
    ) -> ArbiterResult<()> {
        let handle = self.backend.open(id, &config).map_err(|e| {
            // No auto-retry: the camera stays closed and the error is
            // surfaced again on each mode request that needs it.
            tracing::error!("open failed for {}: {}", id, e);
            e
        })?;
        let (sender, _) = broadcast::channel(self.config.streaming.buffer_size.max(1));
        let stats = Arc::new(StreamStats::new());
        let running = Arc::new(AtomicBool::new(true));
        let thread = spawn_capture_thread(
            id,
            handle,
            sender.clone(),
            Arc::clone(&stats),
            Arc::clone(&running),
            Arc::clone(&self.inner),
        );
        inner.cameras.insert(
            id,
            ActiveCamera {
                config,
                sender,
                stats,
                running,
                thread: Some(thread),
            },
        );
        tracing::info!("camera {} opened ({})", id, config.resolution);
        Ok(())
    }

    /// Stop the capture thread and get the still-open handle back.
    /// `None` when the thread already closed the handle (device death).
    fn stop_capture(active: &mut ActiveCamera) -> Option<Box<dyn CaptureHandle>> {
        active.running.store(false, Ordering::SeqCst);
        active.thread.take().and_then(|t| t.join().ok()).flatten()
    }

    /// Synchronous close: completes before the lock is released, so a
    /// subsequent open on the same camera cannot race the teardown.
    fn close_camera(inner: &mut Inner, id: CameraId) {
        if let Some(mut active) = inner.cameras.remove(&id) {
            if let Some(handle) = Self::stop_capture(&mut active) {
                handle.close();
            }
            // Dropping `active` drops the last sender; subscribers see
            // the stream end with SourceClosed.
            tracing::info!("camera {} closed", id);
        }
    }

    /// Apply a new configuration, in place when the handle supports it,
    /// otherwise by reopen. Subscribers keep their streams either way.
    fn reconfigure_camera(
        &self,
        inner: &mut Inner,
        id: CameraId,
        config: CaptureConfig,
    ) -> ArbiterResult<()> {
        let mut active = inner
            .cameras
            .remove(&id)
            .ok_or(ArbiterError::CameraNotOpen(id))?;
        let Some(mut handle) = Self::stop_capture(&mut active) else {
            return Err(ArbiterError::CameraNotOpen(id));
        };

        let handle = match handle.reconfigure(&config) {
            Ok(()) => {
                tracing::info!("camera {} reconfigured in place ({})", id, config.resolution);
                handle
            }
            Err(DeviceError::ReconfigureUnsupported(_)) => {
                handle.close();
                match self.backend.open(id, &config) {
                    Ok(handle) => {
                        tracing::info!("camera {} reopened ({})", id, config.resolution);
                        handle
                    }
                    Err(e) => {
                        // Reopen failed: the camera is now closed and
                        // dropping `active` ends its subscriber streams.
                        tracing::error!("reopen failed for {}: {}", id, e);
                        return Err(e.into());
                    }
                }
            }
            Err(e) => {
                handle.close();
                return Err(e.into());
            }
        };

        active.config = config;
        active.stats.reset();
        active.running = Arc::new(AtomicBool::new(true));
        active.thread = Some(spawn_capture_thread(
            id,
            handle,
            active.sender.clone(),
            Arc::clone(&active.stats),
            Arc::clone(&active.running),
            Arc::clone(&self.inner),
        ));
        // The sender survives in `active`, so existing subscribers keep
        // their streams across the configuration change.
        inner.cameras.insert(id, active);
        Ok(())
    }
}

/// The capture loop: sole reader of one device handle. Publishes frames
/// into the fan-out at the configured cadence and returns the handle,
/// still open, when asked to stop. A run of `MAX_READ_FAILURES`
/// consecutive read failures is treated as the sensor disconnecting: the
/// thread tears the camera down itself and returns `None`.
fn spawn_capture_thread(
    id: CameraId,
    mut handle: Box<dyn CaptureHandle>,
    sender: broadcast::Sender<Frame>,
    stats: Arc<StreamStats>,
    running: Arc<AtomicBool>,
    inner: Arc<Mutex<Inner>>,
) -> JoinHandle<Option<Box<dyn CaptureHandle>>> {
    std::thread::spawn(move || {
        let framerate = handle.config().framerate.max(1);
        let interval = Duration::from_secs_f64(1.0 / f64::from(framerate));
        let (min_size, max_size) = handle.config().resolution.class().frame_size_bounds();
        let mut sequence: u64 = 0;
        let mut consecutive_failures: u32 = 0;

        while running.load(Ordering::SeqCst) {
            let started = Instant::now();
            match handle.read_frame() {
                Ok(data) => {
                    consecutive_failures = 0;
                    if data.len() < min_size || data.len() > max_size {
                        tracing::debug!("camera {} dropped {}-byte frame outside sanity bounds", id, data.len());
                    } else {
                        stats.record_frame(data.len());
                        // No receivers is fine; frames are simply dropped.
                        let _ = sender.send(Frame::new(id, sequence, data));
                        sequence += 1;
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        "camera {} read failed ({}/{}): {}",
                        id,
                        consecutive_failures,
                        MAX_READ_FAILURES,
                        e
                    );
                    if consecutive_failures >= MAX_READ_FAILURES {
                        tracing::error!(
                            "camera {} lost after {} consecutive read failures, closing",
                            id,
                            consecutive_failures
                        );
                        drop(sender);
                        return reap_dead_camera(id, handle, &running, &inner);
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
            if let Some(rest) = interval.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
        Some(handle)
    })
}

/// Teardown for a camera whose device died mid-stream. Removes the
/// arbiter's entry so the last sender drops and subscribers observe
/// `SourceClosed`, degrades the view mode to what is actually open, then
/// closes the handle. Hands the handle back instead when a regular stop
/// raced the teardown, leaving cleanup to the arbiter.
fn reap_dead_camera(
    id: CameraId,
    handle: Box<dyn CaptureHandle>,
    running: &AtomicBool,
    inner: &Mutex<Inner>,
) -> Option<Box<dyn CaptureHandle>> {
    loop {
        if !running.load(Ordering::SeqCst) {
            // The arbiter is stopping this thread and may hold the lock
            // while joining us; it owns the handle's cleanup.
            return Some(handle);
        }
        let Some(mut guard) = inner.try_lock_for(Duration::from_millis(10)) else {
            continue;
        };
        let ours = guard
            .cameras
            .get(&id)
            .map_or(false, |active| std::ptr::eq(active.running.as_ref(), running));
        if ours {
            guard.cameras.remove(&id);
            if let Some(mode) = guard.mode {
                if mode.requires(id) {
                    // Keep the status surface honest about what is open.
                    guard.mode = match mode {
                        ViewMode::Dual if guard.cameras.contains_key(&id.other()) => {
                            Some(ViewMode::Single(id.other()))
                        }
                        _ => None,
                    };
                    tracing::warn!("camera {} lost, view mode degraded to {:?}", id, guard.mode);
                }
            }
        }
        break;
    }
    handle.close();
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockBackend;
    use crate::recorder::encoder::RawEncoderFactory;

    fn arbiter_with(backend: &MockBackend, policy: SharingPolicy) -> CameraArbiter {
        let mut config = Config::default();
        config.recording.framerate = 100; // keep tests fast
        config.streaming.framerate = 100;
        CameraArbiter::new(
            Arc::new(backend.clone()),
            Arc::new(RawEncoderFactory),
            config,
            policy,
        )
    }

    #[tokio::test]
    async fn dual_mode_opens_both_cameras() {
        let backend = MockBackend::new();
        let arbiter = arbiter_with(&backend, SharingPolicy::SharedHandle);

        arbiter.request_mode(ViewMode::Dual).unwrap();
        assert_eq!(backend.telemetry(CameraId::Cam0).open_now(), 1);
        assert_eq!(backend.telemetry(CameraId::Cam1).open_now(), 1);
        assert_eq!(arbiter.mode(), Some(ViewMode::Dual));

        arbiter.shutdown().await;
        assert_eq!(backend.telemetry(CameraId::Cam0).open_now(), 0);
        assert_eq!(backend.telemetry(CameraId::Cam1).open_now(), 0);
    }

    #[tokio::test]
    async fn single_mode_closes_the_other_camera() {
        let backend = MockBackend::new();
        let arbiter = arbiter_with(&backend, SharingPolicy::SharedHandle);

        arbiter.request_mode(ViewMode::Dual).unwrap();
        arbiter.request_mode(ViewMode::Single(CameraId::Cam0)).unwrap();

        assert_eq!(backend.telemetry(CameraId::Cam0).open_now(), 1);
        assert_eq!(backend.telemetry(CameraId::Cam1).open_now(), 0);
        // Same config both times: no reopen of camera 0.
        assert_eq!(backend.telemetry(CameraId::Cam0).opens(), 1);
        arbiter.shutdown().await;
    }

    #[tokio::test]
    async fn device_error_leaves_camera_closed() {
        let backend = MockBackend::new();
        backend.set_failing(CameraId::Cam1, true);
        let arbiter = arbiter_with(&backend, SharingPolicy::SharedHandle);

        let result = arbiter.request_mode(ViewMode::Dual);
        assert!(matches!(result, Err(ArbiterError::Device(_))));
        assert_eq!(backend.telemetry(CameraId::Cam1).open_now(), 0);

        // The error is surfaced again on each request, no retry loop.
        assert!(arbiter.request_mode(ViewMode::Dual).is_err());
        assert!(arbiter.request_mode(ViewMode::Single(CameraId::Cam0)).is_ok());
        arbiter.shutdown().await;
    }

    #[tokio::test]
    async fn failed_mode_switch_clears_the_mode() {
        let backend = MockBackend::new();
        let arbiter = arbiter_with(&backend, SharingPolicy::SharedHandle);
        arbiter.request_mode(ViewMode::Single(CameraId::Cam1)).unwrap();

        backend.set_failing(CameraId::Cam0, true);
        assert!(arbiter.request_mode(ViewMode::Single(CameraId::Cam0)).is_err());

        // The old mode must not be reported while its camera is closed.
        assert_eq!(arbiter.mode(), None);
        assert_eq!(backend.telemetry(CameraId::Cam0).open_now(), 0);
        assert_eq!(backend.telemetry(CameraId::Cam1).open_now(), 0);

        // Recovery is a fresh request once the sensor is back.
        backend.set_failing(CameraId::Cam0, false);
        arbiter.request_mode(ViewMode::Single(CameraId::Cam0)).unwrap();
        assert_eq!(arbiter.mode(), Some(ViewMode::Single(CameraId::Cam0)));
        arbiter.shutdown().await;
    }

    #[tokio::test]
    async fn subscribe_requires_an_open_camera() {
        let backend = MockBackend::new();
        let arbiter = arbiter_with(&backend, SharingPolicy::SharedHandle);
        assert!(matches!(
            arbiter.subscribe(CameraId::Cam0),
            Err(ArbiterError::CameraNotOpen(CameraId::Cam0))
        ));
        arbiter.request_mode(ViewMode::Single(CameraId::Cam0)).unwrap();
        let mut stream = arbiter.subscribe(CameraId::Cam0).unwrap();
        let frame = stream.next().await.unwrap();
        assert_eq!(frame.camera_id, CameraId::Cam0);
        arbiter.shutdown().await;
    }

    #[tokio::test]
    async fn exclusive_policy_reports_hardware_busy() {
        let backend = MockBackend::new();
        let arbiter = arbiter_with(&backend, SharingPolicy::Exclusive);
        let dir = tempfile::tempdir().unwrap();
        let options = RecordingOptions {
            segment_duration: Duration::from_secs(1),
            overlap: Duration::ZERO,
            storage_root: dir.path().to_path_buf(),
            verify_segments: false,
            finalize_timeout: Duration::from_secs(1),
        };

        arbiter.start_recording(CameraId::Cam0, options).unwrap();
        assert!(matches!(
            arbiter.request_mode(ViewMode::Dual),
            Err(ArbiterError::HardwareBusy(CameraId::Cam0))
        ));
        assert!(arbiter.request_mode(ViewMode::Single(CameraId::Cam1)).is_ok());
        arbiter.shutdown().await;
    }
}
