//! Template-driven transcoding.
//!
//! A [`Transcoder`] probes the source, resolves every output's profile ladder
//! up front, then runs one FFmpeg pass per profile, strictly in template order.
//! Progress is reported per FFmpeg progress record as a fraction of the whole
//! job: `(completed_passes + pass_fraction) / total_passes`.

pub mod finalize;
pub mod hls;
pub mod progressive;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{info, warn};
use vconv_models::{
    ConversionOutput, EncoderSettings, JobTemplate, OutputSpec, PackageKind, ProfileSpec,
    TranscodeResult, TranscodeStatistics,
};

use crate::command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::{Prober, SourceProbe};
use crate::progress::{FfmpegProgress, ProgressSender, TranscodeProgress};

const VIDEO_CODEC: &str = "libx264";
const AUDIO_CODEC: &str = "aac";
const H264_LEVEL: &str = "4.0";
const PIXEL_FORMAT: &str = "yuv420p";

/// Binaries and service-wide encoder defaults.
#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// Used when a template sets no preset
    pub default_preset: Option<String>,
    /// Used when a template sets no hwaccel
    pub default_hwaccel: Option<String>,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            default_preset: None,
            default_hwaccel: None,
        }
    }
}

/// One transcode invocation.
pub struct TranscodeRequest<'a> {
    /// Used for log correlation only
    pub job_id: &'a str,
    pub input: &'a Path,
    /// Each output is written to `output_root/<output name>/`
    pub output_root: &'a Path,
    pub template: &'a JobTemplate,
    pub progress: Option<ProgressSender>,
    /// Kills the running encoder when it reads `true`
    pub cancel: Option<watch::Receiver<bool>>,
}

pub struct Transcoder {
    config: TranscoderConfig,
    prober: Prober,
}

impl Transcoder {
    pub fn new(config: TranscoderConfig) -> Self {
        let prober = Prober::new(config.ffprobe_path.clone());
        Self { config, prober }
    }

    pub fn config(&self) -> &TranscoderConfig {
        &self.config
    }

    pub fn prober(&self) -> &Prober {
        &self.prober
    }

    /// Verify both binaries resolve.
    pub fn check_binaries(&self) -> MediaResult<()> {
        check_ffmpeg(&self.config.ffmpeg_path)?;
        check_ffprobe(&self.config.ffprobe_path)?;
        Ok(())
    }

    pub async fn transcode(&self, request: TranscodeRequest<'_>) -> MediaResult<TranscodeResult> {
        let started = Instant::now();
        let template = request.template;

        if template.outputs.is_empty() {
            return Err(MediaError::NoOutputs);
        }

        let probe = self.prober.probe(request.input).await?;

        // Resolve everything before the first encode so a bad template fails fast
        let plans = template
            .outputs
            .iter()
            .map(|output| Ok((output, output.resolved_profiles()?)))
            .collect::<MediaResult<Vec<(&OutputSpec, Vec<ProfileSpec>)>>>()?;
        let total_passes: u32 = plans.iter().map(|(_, profiles)| profiles.len() as u32).sum();

        info!(
            job_id = %request.job_id,
            outputs = plans.len(),
            passes = total_passes,
            duration = probe.duration,
            total_frames = probe.total_frames,
            "Starting transcode"
        );

        tokio::fs::create_dir_all(request.output_root).await?;

        let encoder = self.effective_encoder(&template.encoder);
        let mut ctx = PassContext {
            ffmpeg_path: &self.config.ffmpeg_path,
            input: request.input,
            probe: &probe,
            encoder: &encoder,
            cancel: request.cancel,
            tracker: PassTracker::new(total_passes, &probe, request.progress),
        };

        let mut outputs = Vec::with_capacity(plans.len());
        for (output, profiles) in &plans {
            let output_dir = request.output_root.join(&output.name);
            tokio::fs::create_dir_all(&output_dir).await?;

            info!(
                job_id = %request.job_id,
                output = %output.name,
                package = %output.package,
                profiles = profiles.len(),
                "Processing output"
            );

            let converted = match output.package {
                PackageKind::Segmented => hls::encode(&mut ctx, output, profiles, &output_dir).await,
                PackageKind::Progressive => {
                    progressive::encode(&mut ctx, output, profiles, &output_dir).await
                }
            }?;
            outputs.push(converted);
        }

        let statistics = build_statistics(&probe, &outputs, ctx.tracker.frames_processed, total_passes);
        let result = TranscodeResult {
            outputs,
            wall_duration: started.elapsed(),
            statistics,
        };

        info!(
            job_id = %request.job_id,
            files = result.file_count(),
            bytes = result.statistics.total_output_bytes,
            elapsed_ms = result.wall_duration.as_millis() as u64,
            "Transcode completed"
        );

        Ok(result)
    }

    fn effective_encoder(&self, template: &EncoderSettings) -> EncoderSettings {
        EncoderSettings {
            preset: template
                .preset
                .clone()
                .or_else(|| self.config.default_preset.clone()),
            hwaccel: template
                .hwaccel
                .clone()
                .or_else(|| self.config.default_hwaccel.clone()),
            extra_args: template.extra_args.clone(),
        }
    }
}

/// State shared by every encoder pass of one transcode.
pub(crate) struct PassContext<'a> {
    ffmpeg_path: &'a Path,
    input: &'a Path,
    probe: &'a SourceProbe,
    encoder: &'a EncoderSettings,
    cancel: Option<watch::Receiver<bool>>,
    tracker: PassTracker,
}

impl PassContext<'_> {
    /// Codec, scaling and rate control common to every package.
    pub(crate) fn base_command(
        &self,
        output: &Path,
        profile: &ProfileSpec,
        h264_profile: &str,
    ) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::new(self.input, output);
        if let Some(hwaccel) = self.encoder.hwaccel.as_deref().filter(|h| !h.is_empty()) {
            cmd = cmd.hwaccel(hwaccel);
        }
        cmd.video_codec(VIDEO_CODEC)
            .audio_codec(AUDIO_CODEC)
            .scale(profile.width, profile.height)
            .video_bitrate(profile.video_bitrate_kbps)
            .h264_profile(h264_profile, H264_LEVEL)
            .audio_bitrate(profile.effective_audio_kbps())
            .pix_fmt(PIXEL_FORMAT)
    }

    /// Template preset and extra args go last so they can override the rest.
    pub(crate) fn finish_command(&self, mut cmd: FfmpegCommand) -> FfmpegCommand {
        if let Some(preset) = self.encoder.preset.as_deref().filter(|p| !p.is_empty()) {
            cmd = cmd.preset(preset);
        }
        cmd.output_args(self.encoder.extra_args.iter().cloned())
    }

    pub(crate) fn total_frames(&self) -> u64 {
        self.probe.total_frames
    }

    pub(crate) async fn run_pass(
        &mut self,
        output_name: &str,
        profile: &ProfileSpec,
        cmd: &FfmpegCommand,
    ) -> MediaResult<Duration> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Err(MediaError::Cancelled);
        }

        let mut runner = FfmpegRunner::new().with_binary(self.ffmpeg_path);
        if let Some(cancel) = &self.cancel {
            runner = runner.with_cancel(cancel.clone());
        }

        let started = Instant::now();
        let tracker = &self.tracker;
        let mut last_frame = 0;
        runner
            .run_with_progress(cmd, |progress| {
                last_frame = progress.frame;
                tracker.report(output_name, &profile.name, &progress);
            })
            .await
            .inspect_err(|e| {
                warn!(output = %output_name, profile = %profile.name, "Encoder pass failed: {}", e)
            })?;

        self.tracker.complete_pass(output_name, &profile.name, last_frame);
        Ok(started.elapsed())
    }
}

/// Turns per-pass FFmpeg progress into job-wide progress events.
struct PassTracker {
    sender: Option<ProgressSender>,
    completed: u32,
    total: u32,
    total_frames: u64,
    duration_ms: i64,
    frames_processed: u64,
}

impl PassTracker {
    fn new(total: u32, probe: &SourceProbe, sender: Option<ProgressSender>) -> Self {
        Self {
            sender,
            completed: 0,
            total,
            total_frames: probe.total_frames,
            duration_ms: probe.duration_ms(),
            frames_processed: 0,
        }
    }

    fn report(&self, output_name: &str, profile_name: &str, progress: &FfmpegProgress) {
        let pass_fraction = progress.fraction(self.total_frames, self.duration_ms);
        self.emit(output_name, profile_name, progress.frame, progress.speed, pass_fraction);
    }

    fn complete_pass(&mut self, output_name: &str, profile_name: &str, frames: u64) {
        self.emit(output_name, profile_name, frames, 0.0, 1.0);
        self.completed = (self.completed + 1).min(self.total);
        self.frames_processed += frames;
    }

    fn emit(&self, output_name: &str, profile_name: &str, frame: u64, speed: f64, pass_fraction: f64) {
        let Some(sender) = &self.sender else {
            return;
        };
        // A dropped receiver only means nobody is watching
        let _ = sender.send(TranscodeProgress {
            output_name: output_name.to_string(),
            profile_name: profile_name.to_string(),
            pass: self.completed,
            total_passes: self.total,
            frame,
            total_frames: self.total_frames,
            speed,
            pass_fraction,
            fraction: TranscodeProgress::overall(self.completed, pass_fraction, self.total),
        });
    }
}

fn build_statistics(
    probe: &SourceProbe,
    outputs: &[ConversionOutput],
    frames_processed: u64,
    passes: u32,
) -> TranscodeStatistics {
    let output_file_sizes: HashMap<String, u64> = outputs
        .iter()
        .map(|o| (o.name.clone(), o.total_bytes()))
        .collect();
    let total_output_bytes: u64 = output_file_sizes.values().sum();
    let processing_time = outputs
        .iter()
        .filter_map(|o| o.metadata.get("processing_time_ms").and_then(|v| v.as_u64()))
        .map(Duration::from_millis)
        .sum();

    let compression_ratio = if probe.byte_size > 0 && total_output_bytes > 0 {
        probe.byte_size as f64 / total_output_bytes as f64
    } else {
        0.0
    };

    TranscodeStatistics {
        input_duration: probe.duration,
        frames_processed,
        profiles_processed: passes,
        processing_time,
        total_output_bytes,
        compression_ratio,
        output_file_sizes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::progress_channel;

    fn probe() -> SourceProbe {
        SourceProbe {
            duration: 10.0,
            frame_rate: 30.0,
            total_frames: 300,
            ..Default::default()
        }
    }

    #[test]
    fn test_tracker_progress_is_monotone_across_passes() {
        let (tx, mut rx) = progress_channel();
        let mut tracker = PassTracker::new(2, &probe(), Some(tx));

        for frame in [0, 150, 300] {
            let p = FfmpegProgress {
                frame,
                ..Default::default()
            };
            tracker.report("hls", "360p", &p);
        }
        tracker.complete_pass("hls", "360p", 300);
        tracker.report(
            "hls",
            "720p",
            &FfmpegProgress {
                frame: 75,
                ..Default::default()
            },
        );
        tracker.complete_pass("hls", "720p", 300);
        drop(tracker);

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event.fraction);
        }
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert!((seen[1] - 0.25).abs() < 1e-9);
        assert!((seen[4] - 0.625).abs() < 1e-9);
        assert_eq!(*seen.last().unwrap(), 1.0);
    }

    #[test]
    fn test_effective_encoder_defaults() {
        let transcoder = Transcoder::new(TranscoderConfig {
            default_preset: Some("veryfast".into()),
            default_hwaccel: Some("cuda".into()),
            ..Default::default()
        });
        let merged = transcoder.effective_encoder(&EncoderSettings {
            preset: Some("slow".into()),
            hwaccel: None,
            extra_args: vec!["-threads".into(), "1".into()],
        });
        assert_eq!(merged.preset.as_deref(), Some("slow"));
        assert_eq!(merged.hwaccel.as_deref(), Some("cuda"));
        assert_eq!(merged.extra_args.len(), 2);
    }

    #[tokio::test]
    async fn test_template_without_outputs() {
        let transcoder = Transcoder::new(TranscoderConfig::default());
        let template = JobTemplate::default();
        let dir = tempfile::tempdir().unwrap();
        let err = transcoder
            .transcode(TranscodeRequest {
                job_id: "job",
                input: &dir.path().join("in.mp4"),
                output_root: dir.path(),
                template: &template,
                progress: None,
                cancel: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::NoOutputs));
    }
}
