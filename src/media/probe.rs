/// External media tooling
///
/// Videos are handled by shelling out to ffprobe/ffmpeg. Everything goes
/// through the narrow [`MediaProbe`] trait so the scanner can be driven by
/// a fake in tests and never depends on the tools being installed.
use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::debug;

/// Where in the video the thumbnail frame is taken from
pub const DEFAULT_FRAME_OFFSET_SECS: f64 = 1.0;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("unreadable probe output: {0}")]
    BadOutput(String),

    #[error("no frame extracted at {offset:.1}s")]
    NoFrame { offset: f64 },
}

/// What a single probe run reports about a video
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VideoInfo {
    pub duration_secs: Option<f64>,
    /// Embedded `creation_time` tag, if the container has a plausible one
    pub created_at: Option<DateTime<FixedOffset>>,
}

/// Video inspection and frame extraction
pub trait MediaProbe: Send + Sync {
    /// Container duration in seconds
    fn probe_duration(&self, path: &Path) -> Result<f64, ProbeError>;

    /// Duration and creation time together. Probes without tag support
    /// report the duration alone.
    fn probe_video(&self, path: &Path) -> Result<VideoInfo, ProbeError> {
        Ok(VideoInfo {
            duration_secs: Some(self.probe_duration(path)?),
            created_at: None,
        })
    }

    /// Write a single JPEG frame taken `offset_secs` into the video to `dest`
    fn extract_frame_at(&self, path: &Path, offset_secs: f64, dest: &Path) -> Result<(), ProbeError>;

    fn frame_offset(&self) -> f64 {
        DEFAULT_FRAME_OFFSET_SECS
    }

    /// Extract a thumbnail frame, retrying at the very start of the video
    /// when the preferred offset fails (clips shorter than the offset).
    fn extract_frame(&self, path: &Path, dest: &Path) -> Result<(), ProbeError> {
        let offset = self.frame_offset();
        match self.extract_frame_at(path, offset, dest) {
            Ok(()) => Ok(()),
            Err(err) if offset > 0.0 => {
                debug!(path = %path.display(), error = %err, "frame extraction failed, retrying at 0s");
                self.extract_frame_at(path, 0.0, dest)
            }
            Err(err) => Err(err),
        }
    }
}

/// Floor a probed duration to whole seconds.
///
/// Positive durations are clamped to at least 1; anything else is 0,
/// meaning "unknown".
pub fn whole_seconds(duration: f64) -> u32 {
    if duration.is_finite() && duration > 0.0 {
        (duration.floor() as u32).max(1)
    } else {
        0
    }
}

/// [`MediaProbe`] backed by the ffmpeg command line tools
#[derive(Debug, Clone)]
pub struct FfmpegProbe {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    frame_offset: f64,
    frame_size: u32,
}

impl FfmpegProbe {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            frame_offset: DEFAULT_FRAME_OFFSET_SECS,
            frame_size: crate::media::thumbnail::THUMBNAIL_SIZE,
        }
    }

    pub fn with_frame_offset(mut self, secs: f64) -> Self {
        self.frame_offset = secs.max(0.0);
        self
    }

    pub fn with_frame_size(mut self, size: u32) -> Self {
        self.frame_size = size;
        self
    }

    fn ffprobe_json(&self, path: &Path) -> Result<Vec<u8>, ProbeError> {
        let mut command = Command::new(&self.ffprobe);
        command
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path);
        self.run(&self.ffprobe, command)
    }

    fn run(&self, tool: &Path, mut command: Command) -> Result<Vec<u8>, ProbeError> {
        let tool_name = tool.display().to_string();
        let output = command.output().map_err(|source| ProbeError::Spawn {
            tool: tool_name.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                tool: tool_name,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

impl Default for FfmpegProbe {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl MediaProbe for FfmpegProbe {
    fn probe_duration(&self, path: &Path) -> Result<f64, ProbeError> {
        parse_duration(&self.ffprobe_json(path)?)
    }

    fn probe_video(&self, path: &Path) -> Result<VideoInfo, ProbeError> {
        parse_video_info(&self.ffprobe_json(path)?)
    }

    fn extract_frame_at(&self, path: &Path, offset_secs: f64, dest: &Path) -> Result<(), ProbeError> {
        let scale = format!(
            "scale={size}:{size}:force_original_aspect_ratio=decrease",
            size = self.frame_size
        );
        let mut command = Command::new(&self.ffmpeg);
        command
            .args(["-y", "-v", "error", "-ss"])
            .arg(format!("{:.3}", offset_secs))
            .arg("-i")
            .arg(path)
            .args(["-frames:v", "1", "-vf"])
            .arg(scale)
            .args(["-c:v", "mjpeg", "-q:v", "3", "-f", "image2"])
            .arg(dest);

        self.run(&self.ffmpeg, command)?;

        // ffmpeg exits cleanly without writing anything when seeking past the end
        match std::fs::metadata(dest) {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(ProbeError::NoFrame { offset: offset_secs }),
        }
    }

    fn frame_offset(&self) -> f64 {
        self.frame_offset
    }
}

/// Read duration and creation time from `ffprobe -print_format json` output.
///
/// The container's values win over per-stream ones. Creation times at or
/// before the Unix epoch are treated as unset.
fn parse_video_info(stdout: &[u8]) -> Result<VideoInfo, ProbeError> {
    let json: Value = serde_json::from_slice(stdout)
        .map_err(|e| ProbeError::BadOutput(format!("invalid JSON: {}", e)))?;

    let streams = json["streams"].as_array().map(Vec::as_slice).unwrap_or_default();
    let sections = || std::iter::once(&json["format"]).chain(streams);

    let duration_secs = sections()
        .filter_map(|section| section["duration"].as_str())
        .find_map(|d| d.parse::<f64>().ok());

    let created_at = sections()
        .filter_map(|section| section["tags"]["creation_time"].as_str())
        .find_map(|t| DateTime::parse_from_rfc3339(t).ok())
        .filter(|t| t.timestamp() > 0);

    Ok(VideoInfo {
        duration_secs,
        created_at,
    })
}

fn parse_duration(stdout: &[u8]) -> Result<f64, ProbeError> {
    parse_video_info(stdout)?
        .duration_secs
        .ok_or_else(|| ProbeError::BadOutput("no duration reported".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_whole_seconds() {
        assert_eq!(whole_seconds(12.9), 12);
        assert_eq!(whole_seconds(0.4), 1);
        assert_eq!(whole_seconds(0.0), 0);
        assert_eq!(whole_seconds(-3.0), 0);
        assert_eq!(whole_seconds(f64::NAN), 0);
    }

    #[test]
    fn test_parse_duration_prefers_format() {
        let json = br#"{"format": {"duration": "42.733"}, "streams": [{"duration": "40.0"}]}"#;
        assert_eq!(parse_duration(json).unwrap(), 42.733);
    }

    #[test]
    fn test_parse_duration_falls_back_to_streams() {
        let json = br#"{"format": {}, "streams": [{"codec_type": "audio"}, {"duration": "7.5"}]}"#;
        assert_eq!(parse_duration(json).unwrap(), 7.5);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration(b"not json").is_err());
        assert!(parse_duration(br#"{"format": {"duration": "N/A"}}"#).is_err());
    }

    #[test]
    fn test_parse_creation_time() {
        let json = br#"{
            "format": {"duration": "3.0", "tags": {"creation_time": "2022-08-14T09:15:30.000000Z"}},
            "streams": [{"tags": {"creation_time": "2020-01-01T00:00:00Z"}}]
        }"#;
        let info = parse_video_info(json).unwrap();
        assert_eq!(info.duration_secs, Some(3.0));
        assert_eq!(
            info.created_at.unwrap(),
            DateTime::parse_from_rfc3339("2022-08-14T09:15:30Z").unwrap()
        );
    }

    #[test]
    fn test_creation_time_from_stream_and_epoch_ignored() {
        let json = br#"{"format": {}, "streams": [{"tags": {"creation_time": "2019-03-02T11:00:00+02:00"}}]}"#;
        let created = parse_video_info(json).unwrap().created_at.unwrap();
        assert_eq!(created.timestamp(), 1_551_517_200);

        let json = br#"{"format": {"tags": {"creation_time": "1970-01-01T00:00:00Z"}}}"#;
        let info = parse_video_info(json).unwrap();
        assert_eq!(info.created_at, None);
        assert_eq!(info.duration_secs, None);
    }

    /// Fails at any non-zero offset, records every attempt
    struct ShortClip {
        attempts: Mutex<Vec<f64>>,
    }

    impl MediaProbe for ShortClip {
        fn probe_duration(&self, _path: &Path) -> Result<f64, ProbeError> {
            Ok(0.5)
        }

        fn extract_frame_at(&self, _path: &Path, offset: f64, _dest: &Path) -> Result<(), ProbeError> {
            self.attempts.lock().unwrap().push(offset);
            if offset > 0.0 {
                Err(ProbeError::NoFrame { offset })
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_extract_frame_retries_at_zero() {
        let probe = ShortClip { attempts: Mutex::new(Vec::new()) };
        probe
            .extract_frame(Path::new("/videos/short.mp4"), Path::new("/tmp/out.jpg"))
            .unwrap();
        assert_eq!(*probe.attempts.lock().unwrap(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_missing_tool_is_spawn_error() {
        let probe = FfmpegProbe::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        let err = probe.probe_duration(Path::new("/videos/a.mp4")).unwrap_err();
        assert!(matches!(err, ProbeError::Spawn { .. }));
    }
}
