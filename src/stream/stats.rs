//! Per-camera stream statistics
//!
//! Throughput accounting for the status surface: frames delivered,
//! measured fps, and average encoded frame size. Updated by the capture
//! loop, sampled once per second.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::Instant;

/// Point-in-time view of one camera's stream throughput.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub frame_count: u64,
    pub fps: f64,
    pub avg_frame_size: f64,
}

#[derive(Debug)]
struct StatsInner {
    frame_count: u64,
    total_bytes: u64,
    window_start: Instant,
    window_frames: u64,
    fps: f64,
}

/// Shared stats cell for one camera.
#[derive(Debug)]
pub struct StreamStats {
    inner: Mutex<StatsInner>,
}

impl Default for StreamStats {
    fn default() -> Self {
        Self {
            inner: Mutex::new(StatsInner {
                frame_count: 0,
                total_bytes: 0,
                window_start: Instant::now(),
                window_frames: 0,
                fps: 0.0,
            }),
        }
    }
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one published frame. Recomputes fps once per second.
    pub fn record_frame(&self, size: usize) {
        let mut inner = self.inner.lock();
        inner.frame_count += 1;
        inner.total_bytes += size as u64;
        inner.window_frames += 1;

        let elapsed = inner.window_start.elapsed();
        if elapsed.as_secs_f64() >= 1.0 {
            inner.fps = inner.window_frames as f64 / elapsed.as_secs_f64();
            inner.window_frames = 0;
            inner.window_start = Instant::now();
        }
    }

    /// Reset counters, e.g. when the camera is reopened.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.frame_count = 0;
        inner.total_bytes = 0;
        inner.window_frames = 0;
        inner.fps = 0.0;
        inner.window_start = Instant::now();
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.inner.lock();
        let avg = if inner.frame_count > 0 {
            inner.total_bytes as f64 / inner.frame_count as f64
        } else {
            0.0
        };
        StatsSnapshot {
            frame_count: inner.frame_count,
            fps: inner.fps,
            avg_frame_size: avg,
        }
    }
}
