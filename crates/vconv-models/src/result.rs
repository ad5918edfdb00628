//! Transcode results.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::template::PackageKind;

/// A file produced by the encoder, after finalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputFile {
    pub path: PathBuf,
    pub size: u64,
    /// Lowercase hex SHA-256 of the file content
    pub checksum: String,
    pub mime_type: String,
}

/// Files produced for one output of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionOutput {
    pub name: String,

    #[serde(rename = "type")]
    pub output_type: PackageKind,

    /// Set for single-profile outputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// Directory all `files` live under
    pub directory: PathBuf,

    pub files: Vec<OutputFile>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ConversionOutput {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeStatistics {
    /// Source duration in seconds
    pub input_duration: f64,
    pub frames_processed: u64,
    pub profiles_processed: u32,
    pub processing_time: Duration,
    pub total_output_bytes: u64,
    /// Source bytes / total output bytes; zero when either is unknown
    pub compression_ratio: f64,
    /// Output name → bytes
    pub output_file_sizes: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeResult {
    pub outputs: Vec<ConversionOutput>,
    pub wall_duration: Duration,
    pub statistics: TranscodeStatistics,
}

impl TranscodeResult {
    /// Every produced file across every output.
    pub fn files(&self) -> impl Iterator<Item = &OutputFile> {
        self.outputs.iter().flat_map(|o| o.files.iter())
    }

    pub fn file_count(&self) -> usize {
        self.outputs.iter().map(|o| o.files.len()).sum()
    }
}
