//! Trait definitions for the converter module.

use async_trait::async_trait;

use super::error::ConverterError;
use super::progress::ProgressSink;
use super::types::{ConversionJob, ConversionResult};
use crate::catalog::MediaKind;

/// A converter for one media kind.
///
/// The engine depends only on this capability, so any implementation can be
/// substituted for the built-in image, audio and video converters.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Returns the name of this converter implementation.
    fn name(&self) -> &str;

    /// The media kind this converter handles.
    fn kind(&self) -> MediaKind;

    /// Synchronous pre-flight check of a catalog-valid target extension.
    ///
    /// Rejects targets the converter can never produce before any work
    /// is scheduled.
    fn check_target(&self, _target_extension: &str) -> Result<(), ConverterError> {
        Ok(())
    }

    /// Converts `job.input_path` into `job.output_path`.
    ///
    /// Reports fractional progress through `progress`. On error no file may be
    /// left at `job.output_path`.
    async fn convert(
        &self,
        job: ConversionJob,
        progress: ProgressSink,
    ) -> Result<ConversionResult, ConverterError>;

    /// Validates that the converter is properly configured and ready.
    async fn validate(&self) -> Result<(), ConverterError> {
        Ok(())
    }
}
