//! Mock converter for testing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::catalog::MediaKind;
use crate::converter::{
    ConversionJob, ConversionResult, Converter, ConverterError, ProgressSink,
};

/// Bytes written to the output path on a successful mock conversion.
const MOCK_OUTPUT: &[u8] = b"mock converted output";

/// A recorded conversion job for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedConversion {
    /// The job that was submitted.
    pub job: ConversionJob,
    /// Whether the conversion succeeded.
    pub success: bool,
}

/// Mock implementation of the Converter trait.
///
/// Provides controllable behavior for testing:
/// - Track conversion jobs for assertions
/// - Simulate success, failure or a panic
/// - Emit a scripted progress sequence
/// - Simulate slow conversions
///
/// Clones share recorded state, so a test can keep one clone while the
/// engine owns another.
///
/// # Example
///
/// ```rust,ignore
/// use mediaconv_core::testing::MockConverter;
///
/// let converter = MockConverter::new(MediaKind::Video).with_progress(vec![100]);
/// let engine = ConversionEngine::builder().with_converter(converter.clone()).build();
///
/// let outcome = engine.submit(request)?.wait().await;
///
/// let conversions = converter.recorded_conversions().await;
/// assert_eq!(conversions.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct MockConverter {
    kind: MediaKind,
    /// Percentages reported, in order, before finishing.
    progress: Vec<u8>,
    /// Simulated conversion duration.
    delay: Duration,
    /// If set, `convert` panics with this message.
    panic_message: Option<String>,
    /// Targets rejected by `check_target`.
    rejected_targets: Vec<String>,
    /// Recorded conversions.
    conversions: Arc<RwLock<Vec<RecordedConversion>>>,
    /// If set, the next conversion will fail with this error.
    next_error: Arc<RwLock<Option<ConverterError>>>,
    /// If set, `validate` fails with this error.
    validate_error: Arc<RwLock<Option<ConverterError>>>,
}

impl MockConverter {
    /// Create a new mock converter for `kind`, reporting a single 100.
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            progress: vec![100],
            delay: Duration::ZERO,
            panic_message: None,
            rejected_targets: Vec::new(),
            conversions: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            validate_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Set the progress sequence reported during conversion.
    pub fn with_progress(mut self, progress: Vec<u8>) -> Self {
        self.progress = progress;
        self
    }

    /// Set the simulated conversion duration.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make every conversion panic with `message`.
    pub fn panicking(mut self, message: impl Into<String>) -> Self {
        self.panic_message = Some(message.into());
        self
    }

    /// Reject `extension` in `check_target`.
    pub fn rejecting(mut self, extension: impl Into<String>) -> Self {
        self.rejected_targets.push(extension.into());
        self
    }

    /// Get all recorded conversions.
    pub async fn recorded_conversions(&self) -> Vec<RecordedConversion> {
        self.conversions.read().await.clone()
    }

    /// Get the number of conversions performed.
    pub async fn conversion_count(&self) -> usize {
        self.conversions.read().await.len()
    }

    /// Configure the next conversion to fail with the given error.
    pub async fn set_next_error(&self, error: ConverterError) {
        *self.next_error.write().await = Some(error);
    }

    /// Configure `validate` to fail with the given error.
    pub async fn set_validate_error(&self, error: ConverterError) {
        *self.validate_error.write().await = Some(error);
    }

    async fn record(&self, job: &ConversionJob, success: bool) {
        self.conversions.write().await.push(RecordedConversion {
            job: job.clone(),
            success,
        });
    }
}

#[async_trait]
impl Converter for MockConverter {
    fn name(&self) -> &str {
        "mock"
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn check_target(&self, target_extension: &str) -> Result<(), ConverterError> {
        if self.rejected_targets.iter().any(|t| t == target_extension) {
            return Err(ConverterError::UnsupportedTarget {
                extension: target_extension.to_string(),
            });
        }
        Ok(())
    }

    async fn convert(
        &self,
        job: ConversionJob,
        progress: ProgressSink,
    ) -> Result<ConversionResult, ConverterError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(message) = &self.panic_message {
            self.record(&job, false).await;
            panic!("{}", message);
        }

        let error = self.next_error.write().await.take();
        let (last, interim) = match error {
            Some(_) => (None, self.progress.as_slice()),
            None => match self.progress.split_last() {
                Some((last, interim)) => (Some(*last), interim),
                None => (None, &[][..]),
            },
        };
        for percent in interim {
            progress.report(*percent);
        }

        if let Some(err) = error {
            self.record(&job, false).await;
            return Err(err);
        }

        tokio::fs::write(&job.output_path, MOCK_OUTPUT).await?;
        if let Some(percent) = last {
            progress.report(percent);
        }
        self.record(&job, true).await;

        Ok(ConversionResult {
            job_id: job.job_id,
            output_path: job.output_path,
            output_size_bytes: MOCK_OUTPUT.len() as u64,
            duration_ms: self.delay.as_millis() as u64,
        })
    }

    async fn validate(&self) -> Result<(), ConverterError> {
        match self.validate_error.write().await.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::{ErrorKind, ProgressEvent};
    use std::path::Path;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn create_test_job(dir: &Path, id: &str) -> ConversionJob {
        ConversionJob {
            job_id: id.to_string(),
            input_path: dir.join("test.flac"),
            output_path: dir.join(format!("{}_converted.ogg", id)),
            target_extension: ".ogg".to_string(),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<u8> {
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event.percent);
        }
        seen
    }

    #[tokio::test]
    async fn test_basic_conversion() {
        let dir = TempDir::new().unwrap();
        let converter = MockConverter::new(MediaKind::Audio);

        let job = create_test_job(dir.path(), "test-1");
        let (sink, mut rx) = ProgressSink::channel();
        let result = converter.convert(job, sink).await.unwrap();

        assert_eq!(result.job_id, "test-1");
        assert!(result.output_path.exists());
        assert_eq!(drain(&mut rx), vec![100]);
    }

    #[tokio::test]
    async fn test_recorded_conversions_shared_between_clones() {
        let dir = TempDir::new().unwrap();
        let converter = MockConverter::new(MediaKind::Audio);
        let observer = converter.clone();

        converter
            .convert(create_test_job(dir.path(), "job-1"), ProgressSink::disabled())
            .await
            .unwrap();
        converter
            .convert(create_test_job(dir.path(), "job-2"), ProgressSink::disabled())
            .await
            .unwrap();

        let conversions = observer.recorded_conversions().await;
        assert_eq!(conversions.len(), 2);
        assert!(conversions[0].success);
        assert_eq!(conversions[0].job.job_id, "job-1");
    }

    #[tokio::test]
    async fn test_error_injection() {
        let dir = TempDir::new().unwrap();
        let converter = MockConverter::new(MediaKind::Audio).with_progress(vec![20, 60, 90]);
        converter
            .set_next_error(ConverterError::conversion_failed("test error", None))
            .await;

        let job = create_test_job(dir.path(), "fail");
        let output = job.output_path.clone();
        let (sink, mut rx) = ProgressSink::channel();
        let result = converter.convert(job, sink).await;
        assert!(result.is_err());
        assert!(!output.exists());
        assert_eq!(drain(&mut rx), vec![20, 60, 90]);

        // Error should be consumed, conversion recorded as failed
        let conversions = converter.recorded_conversions().await;
        assert_eq!(conversions.len(), 1);
        assert!(!conversions[0].success);
        assert!(converter
            .convert(create_test_job(dir.path(), "ok"), ProgressSink::disabled())
            .await
            .is_ok());
    }

    #[test]
    fn test_rejected_target() {
        let converter = MockConverter::new(MediaKind::Image).rejecting(".svg");
        let err = converter.check_target(".svg").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
        assert!(converter.check_target(".png").is_ok());
    }
}
