//! Job templates: the declarative description of what a job produces.
//!
//! A [`TemplateCatalog`] is loaded once at startup and never mutated. Keys in
//! the JSON document are snake_case:
//!
//! ```json
//! {
//!   "default": {
//!     "outputs": [
//!       {"name": "hls", "package": "hls", "segment_length_s": 6,
//!        "profiles": [{"name": "720p", "width": 1280, "height": 720,
//!                      "video_bitrate_kbps": 2500, "audio_bitrate_kbps": 128}]},
//!       {"name": "mp4_720p", "package": "mp4", "profile": "720p"}
//!     ],
//!     "ffmpeg": {"preset": "fast"},
//!     "notifications": {"webhook_url": "https://hooks.example.com/done", "on_complete": true}
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{TemplateError, TemplateResult};

/// Audio bitrate used when a profile leaves it at zero.
pub const DEFAULT_AUDIO_BITRATE_KBPS: u32 = 128;
/// HLS segment duration used when an output leaves it at zero.
pub const DEFAULT_SEGMENT_LENGTH_S: u32 = 6;
/// Container used for progressive outputs without an explicit one.
pub const DEFAULT_CONTAINER: &str = "mp4";

/// Names accepted by [`builtin_profile`], smallest first.
pub const BUILTIN_PROFILE_NAMES: [&str; 5] = ["240p", "360p", "480p", "720p", "1080p"];

/// Packaging format of an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum PackageKind {
    /// Segmented adaptive streaming (HLS playlists + transport stream segments)
    #[serde(rename = "hls", alias = "segmented")]
    Segmented,
    /// Single progressive download file per profile
    #[serde(rename = "mp4", alias = "progressive")]
    Progressive,
}

impl PackageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageKind::Segmented => "hls",
            PackageKind::Progressive => "mp4",
        }
    }
}

impl std::fmt::Display for PackageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rendition of the bitrate ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProfileSpec {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub video_bitrate_kbps: u32,
    /// Zero means [`DEFAULT_AUDIO_BITRATE_KBPS`]
    #[serde(default)]
    pub audio_bitrate_kbps: u32,
}

impl ProfileSpec {
    pub fn new(
        name: impl Into<String>,
        width: u32,
        height: u32,
        video_bitrate_kbps: u32,
        audio_bitrate_kbps: u32,
    ) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            video_bitrate_kbps,
            audio_bitrate_kbps,
        }
    }

    pub fn effective_audio_kbps(&self) -> u32 {
        if self.audio_bitrate_kbps == 0 {
            DEFAULT_AUDIO_BITRATE_KBPS
        } else {
            self.audio_bitrate_kbps
        }
    }

    /// Declared bandwidth in bits per second, as advertised in a master
    /// playlist. Uses the audio bitrate as written in the template.
    pub fn bandwidth(&self) -> u64 {
        (u64::from(self.video_bitrate_kbps) + u64::from(self.audio_bitrate_kbps)) * 1000
    }

    /// `WxH`
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Builtin profile used for an unknown single profile name.
pub const FALLBACK_PROFILE: &str = "720p";

fn fallback_profile() -> ProfileSpec {
    ProfileSpec::new(FALLBACK_PROFILE, 1280, 720, 2500, 128)
}

/// Look up a builtin profile by name.
pub fn builtin_profile(name: &str) -> Option<ProfileSpec> {
    let (width, height, video, audio) = match name {
        "240p" => (426, 240, 400, 64),
        "360p" => (640, 360, 800, 96),
        "480p" => (854, 480, 1200, 128),
        FALLBACK_PROFILE => return Some(fallback_profile()),
        "1080p" => (1920, 1080, 5000, 128),
        _ => return None,
    };
    Some(ProfileSpec::new(name, width, height, video, audio))
}

/// Encoder settings shared by every output of a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EncoderSettings {
    /// x264 preset (e.g. "fast", "medium")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,

    /// Input-side hardware acceleration (e.g. "cuda", "videotoolbox")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hwaccel: Option<String>,

    /// Appended verbatim after the generated arguments
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NotificationSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub on_complete: bool,
    #[serde(default)]
    pub on_failure: bool,
}

impl NotificationSettings {
    /// Webhook to call for a job that ended with `success`, if any.
    pub fn target(&self, success: bool) -> Option<&str> {
        let wanted = if success {
            self.on_complete
        } else {
            self.on_failure
        };
        if !wanted {
            return None;
        }
        self.webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// One output of a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OutputSpec {
    pub name: String,
    pub package: PackageKind,

    /// Explicit ladder; takes precedence over `profile`
    #[serde(default)]
    pub profiles: Vec<ProfileSpec>,

    /// Name of a single builtin profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    #[serde(default)]
    pub segment_length_s: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,

    /// Upload prefix template; see `destination_prefix` in the worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl OutputSpec {
    pub fn segment_length(&self) -> u32 {
        if self.segment_length_s == 0 {
            DEFAULT_SEGMENT_LENGTH_S
        } else {
            self.segment_length_s
        }
    }

    pub fn container(&self) -> &str {
        self.container
            .as_deref()
            .map(|c| c.trim_start_matches('.'))
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CONTAINER)
    }

    /// True when the output names one builtin profile instead of a ladder.
    pub fn is_single_profile(&self) -> bool {
        self.profiles.is_empty() && self.profile.is_some()
    }

    /// The ladder this output encodes.
    ///
    /// A single profile name that is not builtin resolves to
    /// [`FALLBACK_PROFILE`].
    pub fn resolved_profiles(&self) -> TemplateResult<Vec<ProfileSpec>> {
        if !self.profiles.is_empty() {
            return Ok(self.profiles.clone());
        }

        match self.profile.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => {
                let profile = builtin_profile(name).unwrap_or_else(|| {
                    warn!(
                        output = %self.name,
                        profile = name,
                        fallback = FALLBACK_PROFILE,
                        "Unknown profile, using fallback"
                    );
                    fallback_profile()
                });
                Ok(vec![profile])
            }
            _ => Err(TemplateError::NoProfiles {
                output: self.name.clone(),
            }),
        }
    }
}

/// A named recipe of outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobTemplate {
    pub outputs: Vec<OutputSpec>,

    #[serde(default, rename = "ffmpeg")]
    pub encoder: EncoderSettings,

    #[serde(default)]
    pub notifications: NotificationSettings,
}

impl JobTemplate {
    pub fn validate(&self) -> TemplateResult<()> {
        for output in &self.outputs {
            output.resolved_profiles()?;
        }
        Ok(())
    }
}

/// Immutable name → template map.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: HashMap<String, Arc<JobTemplate>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    Wrapped {
        job_templates: HashMap<String, JobTemplate>,
    },
    Bare(HashMap<String, JobTemplate>),
}

impl TemplateCatalog {
    pub fn new(templates: HashMap<String, JobTemplate>) -> Self {
        Self {
            templates: templates
                .into_iter()
                .map(|(name, template)| (name, Arc::new(template)))
                .collect(),
        }
    }

    /// Parse a catalog document. Accepts either a bare name → template object
    /// or one nested under `job_templates`.
    pub fn from_json_str(json: &str) -> TemplateResult<Self> {
        let templates = match serde_json::from_str::<CatalogDocument>(json) {
            Ok(CatalogDocument::Wrapped { job_templates }) => job_templates,
            Ok(CatalogDocument::Bare(map)) => map,
            // Re-parse as a bare map to surface a useful error location
            Err(_) => serde_json::from_str::<HashMap<String, JobTemplate>>(json)?,
        };
        Ok(Self::new(templates))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> TemplateResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn get(&self, name: &str) -> TemplateResult<Arc<JobTemplate>> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Sorted template names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Check every output of every template resolves to at least one profile.
    pub fn validate(&self) -> TemplateResult<()> {
        for name in self.names() {
            if let Some(template) = self.templates.get(name) {
                template.validate()?;
            }
        }
        Ok(())
    }
}
