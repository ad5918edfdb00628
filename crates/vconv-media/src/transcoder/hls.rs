//! Segmented (HLS) packaging.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde_json::json;
use tracing::{debug, info};
use vconv_models::{ConversionOutput, OutputFile, OutputSpec, PackageKind, ProfileSpec};

use super::finalize::finalize_file;
use super::PassContext;
use crate::error::{MediaError, MediaResult};

pub const MASTER_PLAYLIST: &str = "master.m3u8";

/// Master playlist listing every rendition in declared order.
pub fn master_playlist(profiles: &[ProfileSpec]) -> String {
    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:6\n\n");
    for profile in profiles {
        playlist.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={},NAME=\"{}\"\n{}/{}.m3u8\n\n",
            profile.bandwidth(),
            profile.resolution(),
            profile.name,
            profile.name,
            profile.name,
        ));
    }
    playlist
}

pub(crate) async fn encode(
    ctx: &mut PassContext<'_>,
    output: &OutputSpec,
    profiles: &[ProfileSpec],
    output_dir: &Path,
) -> MediaResult<ConversionOutput> {
    let started = Instant::now();
    let mut files = Vec::new();

    // A ladder gets a master playlist; a single named profile does not
    if !output.profiles.is_empty() {
        let master_path = output_dir.join(MASTER_PLAYLIST);
        tokio::fs::write(&master_path, master_playlist(profiles)).await?;
        files.push(finalize_file(&master_path).await?);
    }

    for profile in profiles {
        info!(
            output = %output.name,
            profile = %profile.name,
            resolution = %profile.resolution(),
            bitrate_kbps = profile.video_bitrate_kbps,
            "Encoding HLS rendition"
        );
        files.extend(encode_rendition(ctx, output, profile, output_dir).await?);
    }

    let elapsed = started.elapsed();
    let metadata = HashMap::from([
        ("package".to_string(), json!(PackageKind::Segmented.as_str())),
        ("segment_length".to_string(), json!(output.segment_length())),
        ("total_frames".to_string(), json!(ctx.total_frames())),
        ("processing_time_ms".to_string(), json!(elapsed.as_millis() as u64)),
    ]);

    Ok(ConversionOutput {
        name: output.name.clone(),
        output_type: PackageKind::Segmented,
        profile: output.is_single_profile().then(|| profiles[0].name.clone()),
        directory: output_dir.to_path_buf(),
        files,
        metadata,
    })
}

async fn encode_rendition(
    ctx: &mut PassContext<'_>,
    output: &OutputSpec,
    profile: &ProfileSpec,
    output_dir: &Path,
) -> MediaResult<Vec<OutputFile>> {
    let profile_dir = output_dir.join(&profile.name);
    tokio::fs::create_dir_all(&profile_dir).await?;

    let playlist_path = profile_dir.join(format!("{}.m3u8", profile.name));
    let segment_pattern = profile_dir.join(format!("{}_%03d.ts", profile.name));

    let cmd = ctx
        .base_command(&playlist_path, profile, "main")
        .hls(output.segment_length(), &segment_pattern);
    let cmd = ctx.finish_command(cmd);

    let elapsed = ctx.run_pass(&output.name, profile, &cmd).await?;
    debug!(profile = %profile.name, elapsed_ms = elapsed.as_millis() as u64, "HLS rendition encoded");

    if !tokio::fs::try_exists(&playlist_path).await? {
        return Err(MediaError::incomplete_output(format!(
            "{}/{}: playlist {} was not written",
            output.name,
            profile.name,
            playlist_path.display()
        )));
    }

    let segments = list_segments(&profile_dir, &profile.name).await?;
    if segments.is_empty() {
        return Err(MediaError::incomplete_output(format!(
            "{}/{}: no segments were written",
            output.name, profile.name
        )));
    }

    let mut files = Vec::with_capacity(segments.len() + 1);
    files.push(finalize_file(&playlist_path).await?);
    for segment in &segments {
        files.push(finalize_file(segment).await?);
    }
    Ok(files)
}

/// `<profile>_*.ts` files in `dir`, sorted by name.
async fn list_segments(dir: &Path, profile_name: &str) -> MediaResult<Vec<PathBuf>> {
    let prefix = format!("{}_", profile_name);
    let mut segments = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&prefix) && name.ends_with(".ts") && entry.file_type().await?.is_file() {
            segments.push(entry.path());
        }
    }
    segments.sort();
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vconv_models::builtin_profile;

    #[test]
    fn test_master_playlist_format() {
        let profiles = vec![
            builtin_profile("360p").unwrap(),
            ProfileSpec::new("hd", 1280, 720, 2500, 0),
        ];

        let playlist = master_playlist(&profiles);
        assert_eq!(
            playlist,
            "#EXTM3U\n#EXT-X-VERSION:6\n\n\
             #EXT-X-STREAM-INF:BANDWIDTH=896000,RESOLUTION=640x360,NAME=\"360p\"\n360p/360p.m3u8\n\n\
             #EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1280x720,NAME=\"hd\"\nhd/hd.m3u8\n\n"
        );
    }

    #[tokio::test]
    async fn test_list_segments_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["720p_002.ts", "720p_000.ts", "720p_001.ts", "720p.m3u8", "480p_000.ts"] {
            tokio::fs::write(dir.path().join(name), b"x").await.unwrap();
        }

        let segments = list_segments(dir.path(), "720p").await.unwrap();
        let names: Vec<_> = segments
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["720p_000.ts", "720p_001.ts", "720p_002.ts"]);
    }
}
