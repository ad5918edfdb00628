//! FFprobe source inspection.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// What the transcoder needs to know about a source file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceProbe {
    /// Duration in seconds
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    /// Frames per second, zero when unknown
    pub frame_rate: f64,
    /// Bitrate in bits/second
    pub bitrate: u64,
    /// File size in bytes
    pub byte_size: u64,
    /// ffprobe `format_name`, e.g. "mov,mp4,m4a,3gp,3g2,mj2"
    pub container_format: String,
    pub video_codec: String,
    pub audio_codec: Option<String>,
    /// `floor(duration * frame_rate)`
    pub total_frames: u64,
}

impl SourceProbe {
    pub fn duration_ms(&self) -> i64 {
        (self.duration * 1000.0) as i64
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

/// Runs a configurable ffprobe binary.
#[derive(Debug, Clone)]
pub struct Prober {
    binary: PathBuf,
}

impl Default for Prober {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl Prober {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Probe a video file for information.
    pub async fn probe(&self, path: impl AsRef<Path>) -> MediaResult<SourceProbe> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        let output = Command::new(&self.binary)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    MediaError::FfprobeNotFound(self.binary.display().to_string())
                }
                _ => MediaError::Io(e),
            })?;

        if !output.status.success() {
            return Err(MediaError::FfprobeFailed {
                message: format!("FFprobe exited with {}", output.status),
                stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
            });
        }

        let mut probe = parse_probe_output(&output.stdout)?;
        if probe.byte_size == 0 {
            probe.byte_size = tokio::fs::metadata(path).await?.len();
        }

        debug!(
            path = %path.display(),
            duration = probe.duration,
            width = probe.width,
            height = probe.height,
            total_frames = probe.total_frames,
            "Probed source"
        );

        Ok(probe)
    }
}

fn parse_probe_output(stdout: &[u8]) -> MediaResult<SourceProbe> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::InvalidVideo("No video stream found".to_string()))?;

    let audio_codec = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "audio")
        .and_then(|s| s.codec_name.clone());

    let duration = probe
        .format
        .duration
        .as_ref()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(0.0);

    let byte_size = probe
        .format
        .size
        .as_ref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let bitrate = probe
        .format
        .bit_rate
        .as_ref()
        .and_then(|b| b.parse::<u64>().ok())
        .unwrap_or(0);

    let frame_rate = video_stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video_stream.avg_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(0.0);

    let total_frames = if duration > 0.0 && frame_rate > 0.0 {
        (duration * frame_rate).floor() as u64
    } else {
        0
    };

    Ok(SourceProbe {
        duration,
        width: video_stream.width.unwrap_or(0),
        height: video_stream.height.unwrap_or(0),
        frame_rate,
        bitrate,
        byte_size,
        container_format: probe.format.format_name.unwrap_or_default(),
        video_codec: video_stream.codec_name.clone().unwrap_or_default(),
        audio_codec,
        total_frames,
    })
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    let rate = if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den <= 0.0 {
            return None;
        }
        num / den
    } else {
        s.parse().ok()?
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}
