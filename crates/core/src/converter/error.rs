//! Error types for the converter module.

use std::path::PathBuf;
use thiserror::Error;

use super::types::ErrorKind;
use crate::catalog::MediaKind;

/// Errors that can occur while submitting or running a conversion.
#[derive(Debug, Error)]
pub enum ConverterError {
    /// Target extension is not in the catalog for the media kind.
    #[error("Unsupported {kind} format: {extension}")]
    UnsupportedFormat { kind: MediaKind, extension: String },

    /// Target is known to the catalog but cannot be produced.
    #[error("Conversion to {extension} is not supported, please choose another format")]
    UnsupportedTarget { extension: String },

    /// Source path could not be classified into a media kind.
    #[error("Unrecognized media file: {path}")]
    UnrecognizedSource { path: PathBuf },

    /// A required external tool is unreachable.
    #[error("{tool} is required for this conversion but was not found at: {path}")]
    MissingDependency { tool: String, path: PathBuf },

    /// Input file not found.
    #[error("Input file not found: {path}")]
    InputNotFound { path: PathBuf },

    /// Decode, encode or subprocess failure.
    ///
    /// The message ends with the last lines of the tool's diagnostic output,
    /// when there was any.
    #[error("{reason}{}", cause_suffix(.stderr))]
    ConversionFailed {
        reason: String,
        stderr: Option<String>,
    },

    /// Failed to probe media file.
    #[error("Failed to probe media file: {reason}")]
    ProbeFailed { reason: String },

    /// Another task is still running on this engine.
    #[error("A conversion is already running (task {task_id})")]
    EngineBusy { task_id: String },

    /// I/O error during conversion.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Number of trailing diagnostic lines shown in the error message.
const CAUSE_LINES: usize = 3;

fn cause_suffix(stderr: &Option<String>) -> String {
    let Some(stderr) = stderr else {
        return String::new();
    };
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.is_empty() {
        return String::new();
    }
    let shown = &lines[lines.len().saturating_sub(CAUSE_LINES)..];
    format!(": {}", shown.join("; "))
}

impl ConverterError {
    /// Creates a new conversion failed error with optional stderr output.
    pub fn conversion_failed(reason: impl Into<String>, stderr: Option<String>) -> Self {
        Self::ConversionFailed {
            reason: reason.into(),
            stderr,
        }
    }

    /// Creates a new probe failed error.
    pub fn probe_failed(reason: impl Into<String>) -> Self {
        Self::ProbeFailed {
            reason: reason.into(),
        }
    }

    /// Creates a missing dependency error for an external tool.
    pub fn missing_dependency(tool: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::MissingDependency {
            tool: tool.into(),
            path: path.into(),
        }
    }

    /// Wraps this error with a converter-level context prefix.
    ///
    /// Classification is preserved: only the human-readable message changes.
    pub fn context(self, context: &str) -> Self {
        match self {
            Self::ConversionFailed { reason, stderr } => Self::ConversionFailed {
                reason: format!("{}: {}", context, reason),
                stderr,
            },
            Self::ProbeFailed { reason } => Self::conversion_failed(
                format!("{}: failed to probe media file: {}", context, reason),
                None,
            ),
            Self::Io(e) => Self::conversion_failed(format!("{}: {}", context, e), None),
            Self::InputNotFound { path } => Self::conversion_failed(
                format!("{}: input file not found: {}", context, path.display()),
                None,
            ),
            other => other,
        }
    }

    /// The public error classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedFormat { .. }
            | Self::UnsupportedTarget { .. }
            | Self::UnrecognizedSource { .. } => ErrorKind::UnsupportedFormat,
            Self::MissingDependency { .. } => ErrorKind::MissingDependency,
            Self::ConversionFailed { .. }
            | Self::ProbeFailed { .. }
            | Self::InputNotFound { .. }
            | Self::EngineBusy { .. }
            | Self::Io(_) => ErrorKind::ConversionFailed,
        }
    }
}

impl From<image::ImageError> for ConverterError {
    fn from(e: image::ImageError) -> Self {
        Self::conversion_failed(e.to_string(), None)
    }
}

impl From<symphonia::core::errors::Error> for ConverterError {
    fn from(e: symphonia::core::errors::Error) -> Self {
        Self::conversion_failed(e.to_string(), None)
    }
}

impl From<hound::Error> for ConverterError {
    fn from(e: hound::Error) -> Self {
        Self::conversion_failed(e.to_string(), None)
    }
}

impl From<tempfile::PersistError> for ConverterError {
    fn from(e: tempfile::PersistError) -> Self {
        Self::Io(e.error)
    }
}
