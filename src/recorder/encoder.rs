//! Segment encoders
//!
//! The session loop writes frames through the [`SegmentEncoder`] seam so
//! the container/codec step stays pluggable. Production uses an ffmpeg
//! child process wrapping the stream into H.264 MP4; tests and
//! passthrough deployments use the raw sink.

use crate::error::{RecorderError, RecorderResult};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::{Child, Command, Stdio};

/// Sink for one segment's frames. Finalizing consumes the encoder:
/// after `finish` returns the file is closed, flushed, and immutable.
pub trait SegmentEncoder: Send {
    fn write_frame(&mut self, data: &[u8]) -> std::io::Result<()>;

    fn finish(self: Box<Self>) -> RecorderResult<()>;
}

/// Creates one encoder per segment file.
pub trait EncoderFactory: Send + Sync {
    /// File extension for segments produced by this factory.
    fn extension(&self) -> &'static str;

    fn create(&self, path: &Path) -> RecorderResult<Box<dyn SegmentEncoder>>;
}

/// ffmpeg-backed factory: MJPEG frames in on stdin, H.264 MP4 out.
pub struct FfmpegEncoderFactory {
    framerate: u32,
    bitrate: u32,
}

impl FfmpegEncoderFactory {
    pub fn new(framerate: u32, bitrate: u32) -> Self {
        Self { framerate, bitrate }
    }

    /// Whether an ffmpeg binary is reachable on this host.
    pub fn is_available() -> bool {
        Command::new("ffmpeg").arg("-version").output().is_ok()
    }
}

impl EncoderFactory for FfmpegEncoderFactory {
    fn extension(&self) -> &'static str {
        "mp4"
    }

    fn create(&self, path: &Path) -> RecorderResult<Box<dyn SegmentEncoder>> {
        let output = path.to_string_lossy().to_string();
        let process = Command::new("ffmpeg")
            .args([
                "-y",
                "-f",
                "mjpeg",
                "-framerate",
                &self.framerate.to_string(),
                "-i",
                "-",
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-b:v",
                &self.bitrate.to_string(),
                "-pix_fmt",
                "yuv420p",
                "-g",
                &(self.framerate * 2).to_string(),
                "-movflags",
                "+faststart",
                &output,
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        tracing::debug!(
            "started ffmpeg segment encoder @ {}fps, {}bps -> {}",
            self.framerate,
            self.bitrate,
            output
        );

        Ok(Box::new(FfmpegEncoder { process, output }))
    }
}

struct FfmpegEncoder {
    process: Child,
    output: String,
}

impl SegmentEncoder for FfmpegEncoder {
    fn write_frame(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self.process.stdin.as_mut() {
            Some(stdin) => stdin.write_all(data),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "encoder stdin already closed",
            )),
        }
    }

    fn finish(self: Box<Self>) -> RecorderResult<()> {
        let mut process = self.process;
        // Closing stdin signals EOF; ffmpeg then writes the moov atom.
        drop(process.stdin.take());
        let output = process.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecorderError::Encoder(format!(
                "ffmpeg exited with {} for {}: {}",
                output.status,
                self.output,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Raw passthrough factory: frames are concatenated into the file as-is.
/// The capture format already being MJPEG makes this a valid stream dump.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawEncoderFactory;

impl EncoderFactory for RawEncoderFactory {
    fn extension(&self) -> &'static str {
        "mjpeg"
    }

    fn create(&self, path: &Path) -> RecorderResult<Box<dyn SegmentEncoder>> {
        let file = File::create(path)?;
        Ok(Box::new(RawEncoder { file }))
    }
}

struct RawEncoder {
    file: File,
}

impl SegmentEncoder for RawEncoder {
    fn write_frame(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.file.write_all(data)
    }

    fn finish(self: Box<Self>) -> RecorderResult<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Probe a finalized segment's duration in seconds with ffprobe.
pub fn probe_duration(path: &Path) -> RecorderResult<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            &path.to_string_lossy(),
        ])
        .output()?;

    if !output.status.success() {
        return Err(RecorderError::Encoder(format!(
            "ffprobe failed for {:?}: {}",
            path,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let json: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| RecorderError::Encoder(format!("bad ffprobe output: {e}")))?;
    json.get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| RecorderError::Encoder(format!("no duration in ffprobe output for {path:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_encoder_concatenates_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.mjpeg");
        let mut encoder = RawEncoderFactory.create(&path).unwrap();
        encoder.write_frame(&[1, 2, 3]).unwrap();
        encoder.write_frame(&[4, 5]).unwrap();
        encoder.finish().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn raw_factory_surfaces_storage_errors() {
        let missing = Path::new("/nonexistent-dir/seg.mjpeg");
        let result = RawEncoderFactory.create(missing);
        assert!(matches!(result, Err(RecorderError::Storage(_))));
    }
}
