//! FFmpeg progress parsing and transcode progress events.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Progress information from FFmpeg.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Output time as string (HH:MM:SS.microseconds)
    pub out_time: String,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Fraction of the pass done, in [0, 1].
    ///
    /// Uses the frame counter when the source frame count is known and falls
    /// back to output time against the source duration.
    pub fn fraction(&self, total_frames: u64, total_duration_ms: i64) -> f64 {
        if self.is_complete {
            return 1.0;
        }
        let raw = if total_frames > 0 {
            self.frame as f64 / total_frames as f64
        } else if total_duration_ms > 0 {
            self.out_time_ms as f64 / total_duration_ms as f64
        } else {
            0.0
        };
        raw.clamp(0.0, 1.0)
    }
}

/// Progress of a whole transcode, emitted once per FFmpeg progress record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeProgress {
    pub output_name: String,
    pub profile_name: String,
    /// Zero-based index of the running encoder pass
    pub pass: u32,
    pub total_passes: u32,
    pub frame: u64,
    pub total_frames: u64,
    pub speed: f64,
    /// Fraction of the current pass, in [0, 1]
    pub pass_fraction: f64,
    /// Fraction of the whole job, in [0, 1]
    pub fraction: f64,
}

impl TranscodeProgress {
    /// `(completed + pass_fraction) / total`, clamped.
    pub fn overall(completed_passes: u32, pass_fraction: f64, total_passes: u32) -> f64 {
        if total_passes == 0 {
            return 0.0;
        }
        ((completed_passes as f64 + pass_fraction.clamp(0.0, 1.0)) / total_passes as f64)
            .clamp(0.0, 1.0)
    }
}

pub type ProgressSender = mpsc::UnboundedSender<TranscodeProgress>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<TranscodeProgress>;

pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}
