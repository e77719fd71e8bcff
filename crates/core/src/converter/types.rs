//! Types for the converter module.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::ConverterError;
use crate::catalog::{self, MediaKind};

/// Suffix appended to the source stem to name the output file.
pub const CONVERTED_SUFFIX: &str = "_converted";

/// Public classification of a failed conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Target not in the catalog for the kind, or not producible.
    UnsupportedFormat,
    /// A required external tool is unreachable.
    MissingDependency,
    /// Decode, encode or subprocess error at any stage.
    ConversionFailed,
}

/// A request to convert one media file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    /// Existing source file.
    pub source_path: PathBuf,
    /// Target extension, lower-cased, starting with `.`.
    pub target_extension: String,
    /// Media kind driving converter selection.
    pub media_kind: MediaKind,
}

impl ConversionRequest {
    /// Creates a request, normalizing the target extension.
    pub fn new(
        source_path: impl Into<PathBuf>,
        target_extension: &str,
        media_kind: MediaKind,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            target_extension: catalog::normalize_extension(target_extension),
            media_kind,
        }
    }

    /// Creates a request, classifying the source by its extension.
    pub fn for_path(
        source_path: impl Into<PathBuf>,
        target_extension: &str,
    ) -> Result<Self, ConverterError> {
        let source_path = source_path.into();
        let media_kind = catalog::classify(&source_path).ok_or_else(|| {
            ConverterError::UnrecognizedSource {
                path: source_path.clone(),
            }
        })?;
        Ok(Self::new(source_path, target_extension, media_kind))
    }

    /// Output location: `{parent}/{stem}_converted{ext}` next to the source.
    pub fn target_path(&self) -> PathBuf {
        converted_path(&self.source_path, &self.target_extension)
    }
}

/// Derives the converted output path for `source` and `extension`.
pub fn converted_path(source: &Path, extension: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = format!("{}{}{}", stem, CONVERTED_SUFFIX, extension);
    match source.parent() {
        Some(parent) => parent.join(file_name),
        None => PathBuf::from(file_name),
    }
}

/// A unit of work handed to a converter.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    /// Task id this job belongs to.
    pub job_id: String,
    /// Input file path.
    pub input_path: PathBuf,
    /// Output file path.
    pub output_path: PathBuf,
    /// Normalized target extension.
    pub target_extension: String,
}

impl ConversionJob {
    /// Builds the job for a request.
    pub fn from_request(job_id: impl Into<String>, request: &ConversionRequest) -> Self {
        Self {
            job_id: job_id.into(),
            input_path: request.source_path.clone(),
            output_path: request.target_path(),
            target_extension: request.target_extension.clone(),
        }
    }

    /// Lower-cased source extension, if any.
    pub fn source_extension(&self) -> Option<String> {
        catalog::extension_of(&self.input_path)
    }
}

/// Result of a successful conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResult {
    /// Job ID.
    pub job_id: String,
    /// Output file path.
    pub output_path: PathBuf,
    /// Output file size in bytes.
    pub output_size_bytes: u64,
    /// Conversion duration in milliseconds.
    pub duration_ms: u64,
}

/// A progress update, as an integer percentage in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub percent: u8,
}

impl ProgressEvent {
    /// Creates an event, clamping to 100.
    pub fn new(percent: u8) -> Self {
        Self {
            percent: percent.min(100),
        }
    }
}

/// Terminal outcome of a conversion task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConversionOutcome {
    Success {
        resolved_path: PathBuf,
    },
    Failure {
        error_kind: ErrorKind,
        message: String,
    },
}

impl ConversionOutcome {
    /// Builds the failure outcome for a converter error.
    pub fn from_error(error: &ConverterError) -> Self {
        Self::Failure {
            error_kind: error.kind(),
            message: error.to_string(),
        }
    }

    /// Whether this outcome is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The error kind, for failures.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error_kind, .. } => Some(*error_kind),
        }
    }
}

/// Information about a media file as reported by the probe tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    /// File path.
    pub path: PathBuf,
    /// Duration in seconds.
    pub duration_secs: f64,
    /// Container format (e.g., "flac", "mov").
    pub format: String,
    /// Audio codec (if present).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    /// Video codec (if present).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
}
