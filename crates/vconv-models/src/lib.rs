//! Shared data models for the video conversion pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Conversion jobs, their sources and status records
//! - Job templates, output specs and encoding profiles
//! - Transcode results and output file metadata
//! - Completion/failure webhook payloads

pub mod error;
pub mod job;
pub mod notification;
pub mod result;
pub mod template;
pub mod utils;

pub use error::{InvalidTransition, TemplateError, TemplateResult, UnknownSourceType};
pub use job::{Job, JobId, JobState, JobStatus, SourceConfig, SourceType};
pub use notification::{JobNotification, NotifiedFile};
pub use result::{ConversionOutput, OutputFile, TranscodeResult, TranscodeStatistics};
pub use template::{
    builtin_profile, EncoderSettings, JobTemplate, NotificationSettings, OutputSpec, PackageKind,
    ProfileSpec, TemplateCatalog, BUILTIN_PROFILE_NAMES, DEFAULT_AUDIO_BITRATE_KBPS,
    DEFAULT_CONTAINER, DEFAULT_SEGMENT_LENGTH_S, FALLBACK_PROFILE,
};

/// JSON schema of the inbound job descriptor, for event-source collaborators.
pub fn job_descriptor_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(Job)
}
