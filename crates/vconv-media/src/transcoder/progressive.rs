//! Progressive download packaging: one file per profile.

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use serde_json::json;
use tracing::info;
use vconv_models::{ConversionOutput, OutputSpec, PackageKind, ProfileSpec};

use super::finalize::finalize_file;
use super::PassContext;
use crate::error::{MediaError, MediaResult};

pub(crate) async fn encode(
    ctx: &mut PassContext<'_>,
    output: &OutputSpec,
    profiles: &[ProfileSpec],
    output_dir: &Path,
) -> MediaResult<ConversionOutput> {
    let started = Instant::now();
    let container = output.container();
    let mut files = Vec::with_capacity(profiles.len());

    for profile in profiles {
        let path = output_dir.join(format!("{}.{}", profile.name, container));
        info!(
            output = %output.name,
            profile = %profile.name,
            resolution = %profile.resolution(),
            container = %container,
            "Encoding progressive file"
        );

        let cmd = ctx.base_command(&path, profile, "high").faststart();
        let cmd = ctx.finish_command(cmd);
        ctx.run_pass(&output.name, profile, &cmd).await?;

        if !tokio::fs::try_exists(&path).await? {
            return Err(MediaError::incomplete_output(format!(
                "{}/{}: {} was not written",
                output.name,
                profile.name,
                path.display()
            )));
        }
        files.push(finalize_file(&path).await?);
    }

    let metadata = HashMap::from([
        ("package".to_string(), json!(PackageKind::Progressive.as_str())),
        ("container".to_string(), json!(container)),
        ("total_frames".to_string(), json!(ctx.total_frames())),
        ("processing_time_ms".to_string(), json!(started.elapsed().as_millis() as u64)),
    ]);

    Ok(ConversionOutput {
        name: output.name.clone(),
        output_type: PackageKind::Progressive,
        profile: output.is_single_profile().then(|| profiles[0].name.clone()),
        directory: output_dir.to_path_buf(),
        files,
        metadata,
    })
}
