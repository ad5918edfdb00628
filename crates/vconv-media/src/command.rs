//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::FfmpegProgress;

/// Number of non-progress stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Decode the input with hardware acceleration.
    pub fn hwaccel(self, method: impl Into<String>) -> Self {
        self.input_arg("-hwaccel").input_arg(method)
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Scale to an exact frame size.
    pub fn scale(self, width: u32, height: u32) -> Self {
        self.video_filter(format!("scale={}:{}", width, height))
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Constrained video bitrate: target and ceiling at `kbps`, buffer at twice that.
    pub fn video_bitrate(self, kbps: u32) -> Self {
        self.output_arg("-b:v")
            .output_arg(format!("{}k", kbps))
            .output_arg("-maxrate")
            .output_arg(format!("{}k", kbps))
            .output_arg("-bufsize")
            .output_arg(format!("{}k", u64::from(kbps) * 2))
    }

    /// Set audio bitrate.
    pub fn audio_bitrate(self, kbps: u32) -> Self {
        self.output_arg("-b:a").output_arg(format!("{}k", kbps))
    }

    /// Set H.264 profile and level.
    pub fn h264_profile(self, profile: &str, level: &str) -> Self {
        self.output_arg("-profile:v")
            .output_arg(profile)
            .output_arg("-level")
            .output_arg(level)
    }

    pub fn pix_fmt(self, fmt: impl Into<String>) -> Self {
        self.output_arg("-pix_fmt").output_arg(fmt)
    }

    /// Move the moov atom to the front for progressive playback.
    pub fn faststart(self) -> Self {
        self.output_arg("-movflags").output_arg("+faststart")
    }

    /// HLS muxer with a VOD playlist of independently decodable segments.
    pub fn hls(self, segment_seconds: u32, segment_pattern: impl AsRef<Path>) -> Self {
        self.output_arg("-f")
            .output_arg("hls")
            .output_arg("-hls_time")
            .output_arg(segment_seconds.to_string())
            .output_arg("-hls_list_size")
            .output_arg("0")
            .output_arg("-hls_segment_filename")
            .output_arg(segment_pattern.as_ref().to_string_lossy().to_string())
            .output_arg("-hls_flags")
            .output_arg("independent_segments")
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner for FFmpeg commands with progress tracking and cancellation.
pub struct FfmpegRunner {
    /// Encoder binary, resolved through PATH when relative
    binary: PathBuf,
    /// Cancellation signal receiver
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    /// Create a new runner for `ffmpeg` on PATH.
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            cancel_rx: None,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command, calling `on_progress` for every `progress=` record.
    ///
    /// The child is killed and reaped when the cancel signal fires. Dropping
    /// the returned future also kills it.
    pub async fn run_with_progress<F>(
        &self,
        cmd: &FfmpegCommand,
        mut on_progress: F,
    ) -> MediaResult<()>
    where
        F: FnMut(FfmpegProgress),
    {
        let args = cmd.build_args();
        debug!("Running FFmpeg: {} {}", self.binary.display(), args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    MediaError::FfmpegNotFound(self.binary.display().to_string())
                }
                _ => MediaError::Io(e),
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr not captured"))?;
        let mut lines = BufReader::new(stderr).lines();

        let mut current = FfmpegProgress::default();
        let mut tail = StderrTail::default();
        let mut stderr_open = true;
        let mut cancel_rx = self.cancel_rx.clone();

        let status = loop {
            tokio::select! {
                line = lines.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => handle_line(&line, &mut current, &mut tail, &mut on_progress),
                    Ok(None) | Err(_) => stderr_open = false,
                },
                status = child.wait() => break status?,
                _ = wait_cancelled(&mut cancel_rx) => {
                    info!("FFmpeg cancelled, killing process");
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill FFmpeg: {}", e);
                    }
                    return Err(MediaError::Cancelled);
                }
            }
        };

        // Whatever the child wrote right before exiting
        while stderr_open {
            match lines.next_line().await {
                Ok(Some(line)) => handle_line(&line, &mut current, &mut tail, &mut on_progress),
                _ => stderr_open = false,
            }
        }

        map_exit_status(status, tail)
    }
}

fn handle_line<F>(line: &str, current: &mut FfmpegProgress, tail: &mut StderrTail, on_progress: &mut F)
where
    F: FnMut(FfmpegProgress),
{
    if is_progress_record(line) {
        if let Some(progress) = parse_progress_line(line, current) {
            on_progress(progress);
        }
    } else {
        tail.push(line);
    }
}

#[derive(Default)]
struct StderrTail {
    lines: VecDeque<String>,
}

impl StderrTail {
    fn push(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if self.lines.len() == STDERR_TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    fn last(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }

    fn joined(&self) -> Option<String> {
        if self.lines.is_empty() {
            None
        } else {
            Some(self.lines.iter().cloned().collect::<Vec<_>>().join("\n"))
        }
    }
}

fn map_exit_status(status: ExitStatus, tail: StderrTail) -> MediaResult<()> {
    if status.success() {
        return Ok(());
    }

    match status.code() {
        Some(code) => {
            let message = match tail.last() {
                Some(last) => format!("exit status {}: {}", code, last),
                None => format!("exit status {}", code),
            };
            Err(MediaError::ffmpeg_failed(message, tail.joined(), Some(code)))
        }
        None => Err(MediaError::Terminated {
            signal: termination_signal(&status),
        }),
    }
}

#[cfg(unix)]
fn termination_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn termination_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Resolve once the cancel signal reads `true`.
///
/// Never resolves when there is no receiver or the sender is gone without
/// having signalled.
pub async fn wait_cancelled(cancel_rx: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = cancel_rx else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

/// `key=value` with a bare identifier key, as written by `-progress`.
fn is_progress_record(line: &str) -> bool {
    match line.trim().split_once('=') {
        Some((key, _)) => {
            !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

/// Parse a progress line from FFmpeg's -progress output.
fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> Option<FfmpegProgress> {
    let line = line.trim();

    if let Some((key, value)) = line.split_once('=') {
        let value = value.trim();
        match key {
            "out_time_ms" | "out_time_us" => {
                // Both keys carry microseconds
                if let Ok(us) = value.parse::<i64>() {
                    current.out_time_ms = us / 1000;
                }
            }
            "out_time" => {
                current.out_time = value.to_string();
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    current.frame = frame;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    current.fps = fps;
                }
            }
            "speed" => {
                // "1.5x" or "N/A"
                if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                    current.speed = speed;
                }
            }
            "progress" => {
                // "continue" or "end"
                if value == "end" {
                    current.is_complete = true;
                }
                return Some(current.clone());
            }
            _ => {}
        }
    }

    None
}

/// Check that an encoder binary is runnable.
pub fn check_ffmpeg(binary: impl AsRef<Path>) -> MediaResult<PathBuf> {
    let binary = binary.as_ref();
    which::which(binary).map_err(|_| MediaError::FfmpegNotFound(binary.display().to_string()))
}

/// Check that a prober binary is runnable.
pub fn check_ffprobe(binary: impl AsRef<Path>) -> MediaResult<PathBuf> {
    let binary = binary.as_ref();
    which::which(binary).map_err(|_| MediaError::FfprobeNotFound(binary.display().to_string()))
}
