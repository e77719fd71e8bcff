//! Video converter.
//!
//! Opens the source by probing it, then re-encodes it with ffmpeg in one
//! pass. Progress is coarse: a single 100 once the output is in place.

use async_trait::async_trait;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::capabilities::EncoderCapabilities;
use super::config::ConverterConfig;
use super::error::ConverterError;
use super::ffmpeg::FfmpegTool;
use super::output::sibling_temp_file_with_suffix;
use super::progress::ProgressSink;
use super::traits::Converter;
use super::types::{ConversionJob, ConversionResult};
use crate::catalog::MediaKind;

const CONTEXT: &str = "Video conversion error";

/// Video and audio codec pair used for a target container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoEncoding {
    pub video_codec: &'static str,
    pub audio_codec: &'static str,
}

impl VideoEncoding {
    /// Royalty-free pairing for the open container.
    pub const OPEN: Self = Self {
        video_codec: "libvpx",
        audio_codec: "libvorbis",
    };

    /// Widely-compatible pairing for everything else.
    pub const COMPATIBLE: Self = Self {
        video_codec: "libx264",
        audio_codec: "aac",
    };

    pub fn for_extension(extension: &str) -> Self {
        if extension == ".webm" {
            Self::OPEN
        } else {
            Self::COMPATIBLE
        }
    }

    fn codecs(&self) -> [&'static str; 2] {
        [self.video_codec, self.audio_codec]
    }
}

/// Converts video files through ffmpeg.
pub struct VideoConverter {
    ffmpeg: FfmpegTool,
}

impl VideoConverter {
    pub fn new(config: &ConverterConfig) -> Self {
        Self {
            ffmpeg: FfmpegTool::new(config),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&ConverterConfig::default())
    }

    /// Builds the ffmpeg argument list for one transcode.
    pub fn build_args(&self, job: &ConversionJob, output: &Path) -> Vec<String> {
        let encoding = VideoEncoding::for_extension(&job.target_extension);
        let mut args = self.ffmpeg.base_args(&job.input_path);
        args.extend([
            "-c:v".to_string(),
            encoding.video_codec.to_string(),
            "-c:a".to_string(),
            encoding.audio_codec.to_string(),
        ]);
        self.ffmpeg.finish_args(args, output)
    }

    async fn transcode(&self, job: &ConversionJob) -> Result<u64, ConverterError> {
        self.ffmpeg.ensure_available().await?;

        let info = self.ffmpeg.probe(&job.input_path).await?;
        debug!(
            "Opened {} ({}, {:.2}s, video={:?}, audio={:?})",
            job.input_path.display(),
            info.format,
            info.duration_secs,
            info.video_codec,
            info.audio_codec
        );
        if info.video_codec.is_none() {
            return Err(ConverterError::conversion_failed(
                format!("no video stream in {}", job.input_path.display()),
                None,
            ));
        }

        let output = sibling_temp_file_with_suffix(&job.output_path, &job.target_extension)?;
        let args = self.build_args(job, output.path());
        self.ffmpeg.run(args, |_| {}).await?;

        let file = output.persist(&job.output_path)?;
        Ok(file.metadata()?.len())
    }
}

#[async_trait]
impl Converter for VideoConverter {
    fn name(&self) -> &str {
        "video"
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    async fn convert(
        &self,
        job: ConversionJob,
        progress: ProgressSink,
    ) -> Result<ConversionResult, ConverterError> {
        let start = Instant::now();
        info!(
            "Converting video {} -> {} ({:?})",
            job.input_path.display(),
            job.output_path.display(),
            VideoEncoding::for_extension(&job.target_extension)
        );

        let size = self.transcode(&job).await.map_err(|e| e.context(CONTEXT))?;
        progress.report(100);

        Ok(ConversionResult {
            job_id: job.job_id,
            output_path: job.output_path,
            output_size_bytes: size,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn validate(&self) -> Result<(), ConverterError> {
        self.ffmpeg.ensure_available().await?;
        let caps = EncoderCapabilities::detect(&self.ffmpeg).await;
        for encoding in [VideoEncoding::OPEN, VideoEncoding::COMPATIBLE] {
            let missing = caps.missing(&encoding.codecs());
            if !missing.is_empty() {
                warn!("ffmpeg lacks encoders {:?}; some video targets will fail", missing);
            }
        }
        Ok(())
    }
}
