//! FFmpeg CLI wrapper and transcode orchestration.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Cancellation support via a `tokio::sync::watch` signal
//! - Source probing through ffprobe
//! - The transcoder that turns a job template into encoder passes

pub mod command;
pub mod error;
pub mod probe;
pub mod progress;
pub mod transcoder;

pub use command::{check_ffmpeg, check_ffprobe, wait_cancelled, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use probe::{Prober, SourceProbe};
pub use progress::{progress_channel, FfmpegProgress, ProgressReceiver, ProgressSender, TranscodeProgress};
pub use transcoder::{
    finalize::{finalize_file, sha256_file},
    hls::master_playlist,
    TranscodeRequest, Transcoder, TranscoderConfig,
};
