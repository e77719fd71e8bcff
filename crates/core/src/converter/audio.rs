//! Audio converter.
//!
//! Two strategies, picked by target extension:
//!
//! - Direct: decode in-process and write the container natively, reporting
//!   progress in ten duration-proportional chunks.
//! - External encoder: decode in-process into a temporary WAV, then hand it to
//!   ffmpeg and follow its timestamp markers for live progress.
//!
//! Sources Symphonia cannot read (WMA, for one) are decoded by ffmpeg into
//! the temporary WAV instead, when ffmpeg is reachable.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::capabilities::EncoderCapabilities;
use super::config::ConverterConfig;
use super::error::ConverterError;
use super::ffmpeg::{line_progress, FfmpegTool};
use super::output::{sibling_temp_file, sibling_temp_file_with_suffix};
use super::pcm::{decode_file, DecodedAudio};
use super::progress::ProgressSink;
use super::traits::Converter;
use super::types::{ConversionJob, ConversionResult};
use crate::catalog::MediaKind;

const CONTEXT: &str = "Audio conversion error";

/// How a target extension gets produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioStrategy {
    /// Written natively by the in-process codec layer.
    Direct,
    /// Encoded by ffmpeg with the given audio codec.
    External { codec: &'static str },
}

impl AudioStrategy {
    /// Selects the strategy for a normalized target extension.
    pub fn for_extension(extension: &str) -> Option<Self> {
        let strategy = match extension {
            ".wav" => Self::Direct,
            ".mp3" => Self::External { codec: "libmp3lame" },
            ".ogg" => Self::External { codec: "libvorbis" },
            ".aac" => Self::External { codec: "aac" },
            ".wma" => Self::External { codec: "wmav2" },
            ".m4a" => Self::External { codec: "aac" },
            ".flac" => Self::External { codec: "flac" },
            _ => return None,
        };
        Some(strategy)
    }
}

/// Converts audio files.
pub struct AudioConverter {
    ffmpeg: FfmpegTool,
    temp_dir: PathBuf,
}

impl AudioConverter {
    /// Creates a new audio converter.
    pub fn new(config: &ConverterConfig) -> Self {
        Self {
            ffmpeg: FfmpegTool::new(config),
            temp_dir: config.temp_dir.clone(),
        }
    }

    /// Creates a converter with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(&ConverterConfig::default())
    }

    async fn convert_direct(
        &self,
        job: &ConversionJob,
        progress: &ProgressSink,
    ) -> Result<u64, ConverterError> {
        let audio = self.decode_source(&job.input_path).await?;
        debug!(
            "Decoded {} ({:.2}s, {} Hz, {} ch, {} bit)",
            job.input_path.display(),
            audio.duration_secs(),
            audio.sample_rate,
            audio.channels,
            audio.bits_per_sample
        );

        let output = job.output_path.clone();
        let worker_progress = progress.clone();
        let size = blocking(move || {
            let temp = sibling_temp_file(&output)?;
            audio.write_wav_chunked(temp.path(), |percent| worker_progress.report(percent))?;
            let file = temp.persist(&output)?;
            Ok(file.metadata()?.len())
        })
        .await?;

        progress.report(100);
        Ok(size)
    }

    async fn convert_external(
        &self,
        job: &ConversionJob,
        codec: &'static str,
        progress: &ProgressSink,
    ) -> Result<u64, ConverterError> {
        // Nothing may touch the filesystem before this check.
        self.ffmpeg.ensure_available().await?;

        let intermediate = self.materialize_intermediate(&job.input_path).await?;
        let total_secs = self.ffmpeg.probe_duration(intermediate.path()).await?;
        debug!(
            "Intermediate {} is {:.2}s long",
            intermediate.path().display(),
            total_secs
        );

        let output = sibling_temp_file_with_suffix(&job.output_path, &job.target_extension)?;
        let mut args = self.ffmpeg.base_args(intermediate.path());
        args.extend(["-vn".to_string(), "-acodec".to_string(), codec.to_string()]);
        if job.target_extension == ".aac" {
            args.extend(["-f".to_string(), "adts".to_string()]);
        }
        let args = self.ffmpeg.finish_args(args, output.path());

        let line_sink = progress.clone();
        let result = self
            .ffmpeg
            .run(args, move |line| {
                if let Some(percent) = line_progress(line, total_secs) {
                    line_sink.report(percent);
                }
            })
            .await;

        // Released right after its last use, on success and failure alike.
        let intermediate_path = intermediate.path().to_path_buf();
        if let Err(e) = intermediate.close() {
            warn!(
                "Failed to remove intermediate file {}: {}",
                intermediate_path.display(),
                e
            );
        }
        result?;

        let file = output.persist(&job.output_path)?;
        progress.report(100);
        Ok(file.metadata()?.len())
    }

    /// Decodes the source into a securely created temporary WAV file.
    async fn materialize_intermediate(
        &self,
        input: &Path,
    ) -> Result<NamedTempFile, ConverterError> {
        let temp = self.intermediate_file().await?;
        let source = input.to_path_buf();
        let target = temp.path().to_path_buf();

        match blocking(move || decode_file(&source)?.write_wav(&target)).await {
            Ok(()) => Ok(temp),
            Err(e @ ConverterError::InputNotFound { .. }) => Err(e),
            Err(e) => {
                debug!("Decoding {} in process failed ({}), using ffmpeg", input.display(), e);
                self.decode_with_ffmpeg(input, temp.path()).await?;
                Ok(temp)
            }
        }
    }

    /// Decodes the source in process, going through an ffmpeg-made WAV
    /// when Symphonia cannot read it.
    async fn decode_source(&self, input: &Path) -> Result<DecodedAudio, ConverterError> {
        let source = input.to_path_buf();
        let error = match blocking(move || decode_file(&source)).await {
            Ok(audio) => return Ok(audio),
            Err(e @ ConverterError::InputNotFound { .. }) => return Err(e),
            Err(e) => e,
        };
        if self.ffmpeg.ensure_available().await.is_err() {
            return Err(error);
        }

        debug!("Decoding {} in process failed ({}), using ffmpeg", input.display(), error);
        let temp = self.intermediate_file().await?;
        self.decode_with_ffmpeg(input, temp.path()).await?;
        let pcm = temp.path().to_path_buf();
        blocking(move || decode_file(&pcm)).await
    }

    /// Lets ffmpeg decode `input` into a 16-bit PCM WAV at `output`.
    async fn decode_with_ffmpeg(&self, input: &Path, output: &Path) -> Result<(), ConverterError> {
        let mut args = self.ffmpeg.base_args(input);
        args.extend(
            ["-vn", "-acodec", "pcm_s16le", "-f", "wav"]
                .into_iter()
                .map(str::to_string),
        );
        let args = self.ffmpeg.finish_args(args, output);
        self.ffmpeg.run(args, |_| {}).await
    }

    async fn intermediate_file(&self) -> Result<NamedTempFile, ConverterError> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;
        Ok(tempfile::Builder::new()
            .prefix("mediaconv-")
            .suffix(".wav")
            .tempfile_in(&self.temp_dir)?)
    }
}

/// Runs codec work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T, ConverterError>
where
    F: FnOnce() -> Result<T, ConverterError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| {
        ConverterError::conversion_failed(format!("audio worker failed: {}", e), None)
    })?
}

#[async_trait]
impl Converter for AudioConverter {
    fn name(&self) -> &str {
        "audio"
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn check_target(&self, target_extension: &str) -> Result<(), ConverterError> {
        match AudioStrategy::for_extension(target_extension) {
            Some(_) => Ok(()),
            None => Err(ConverterError::UnsupportedFormat {
                kind: MediaKind::Audio,
                extension: target_extension.to_string(),
            }),
        }
    }

    async fn convert(
        &self,
        job: ConversionJob,
        progress: ProgressSink,
    ) -> Result<ConversionResult, ConverterError> {
        let start = Instant::now();
        let strategy = AudioStrategy::for_extension(&job.target_extension).ok_or_else(|| {
            ConverterError::UnsupportedFormat {
                kind: MediaKind::Audio,
                extension: job.target_extension.clone(),
            }
        })?;
        info!(
            "Converting audio {} -> {} ({:?})",
            job.input_path.display(),
            job.output_path.display(),
            strategy
        );

        let size = match strategy {
            AudioStrategy::Direct => self.convert_direct(&job, &progress).await,
            AudioStrategy::External { codec } => {
                self.convert_external(&job, codec, &progress).await
            }
        }
        .map_err(|e| e.context(CONTEXT))?;

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
        for extension in MediaKind::Audio.supported_targets() {
            if let Some(AudioStrategy::External { codec }) = AudioStrategy::for_extension(extension)
            {
                if !caps.has_encoder(codec) {
                    warn!("ffmpeg lacks the {} encoder; {} targets will fail", codec, extension);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::types::{converted_path, ErrorKind, ProgressEvent};
    use crate::testing::fixtures;
    use tempfile::TempDir;

    fn job(input: PathBuf, ext: &str) -> ConversionJob {
        ConversionJob {
            job_id: "audio".to_string(),
            output_path: converted_path(&input, ext),
            input_path: input,
            target_extension: ext.to_string(),
        }
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<u8> {
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event.percent);
        }
        seen
    }

    #[test]
    fn test_strategy_table() {
        assert_eq!(AudioStrategy::for_extension(".wav"), Some(AudioStrategy::Direct));
        assert_eq!(
            AudioStrategy::for_extension(".wma"),
            Some(AudioStrategy::External { codec: "wmav2" })
        );
        assert_eq!(
            AudioStrategy::for_extension(".m4a"),
            Some(AudioStrategy::External { codec: "aac" })
        );
        assert_eq!(AudioStrategy::for_extension(".mp4"), None);
        for ext in MediaKind::Audio.supported_targets() {
            assert!(AudioStrategy::for_extension(ext).is_some(), "{} has no strategy", ext);
        }
    }

    #[tokio::test]
    async fn test_direct_path_progress() {
        let dir = TempDir::new().unwrap();
        let source = fixtures::write_wav(dir.path(), "tone.wav", 2).unwrap();

        let converter = AudioConverter::with_defaults();
        let (sink, mut rx) = ProgressSink::channel();
        let result = converter.convert(job(source, ".wav"), sink).await.unwrap();

        let progress = drain(&mut rx);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&100));
        assert!(progress.iter().any(|p| *p > 0 && *p < 100));
        assert!(result.output_path.ends_with("tone_converted.wav"));

        let reader = hound::WavReader::open(&result.output_path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.duration(), 16000);
    }

    #[tokio::test]
    async fn test_direct_path_corrupt_source() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("broken.wav");
        std::fs::write(&source, b"RIFF....not really").unwrap();

        let converter = AudioConverter::with_defaults();
        let (sink, mut rx) = ProgressSink::channel();
        let err = converter.convert(job(source, ".wav"), sink).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConversionFailed);
        assert!(err.to_string().starts_with(CONTEXT));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_external_path_missing_dependency() {
        let dir = TempDir::new().unwrap();
        let temp_dir = dir.path().join("intermediate");
        let source = dir.path().join("song.flac");
        std::fs::write(&source, b"fLaC").unwrap();

        let config = ConverterConfig::with_paths(
            PathBuf::from("/nonexistent/ffmpeg"),
            PathBuf::from("/nonexistent/ffprobe"),
        )
        .with_temp_dir(temp_dir.clone());
        let converter = AudioConverter::new(&config);
        let (sink, mut rx) = ProgressSink::channel();
        let err = converter.convert(job(source, ".wma"), sink).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MissingDependency);
        assert!(drain(&mut rx).is_empty());
        assert!(!temp_dir.exists());
        assert!(!dir.path().join("song_converted.wma").exists());
    }

    #[cfg(unix)]
    mod with_fake_ffmpeg {
        use super::*;
        use crate::testing::fixtures::FakeTools;

        /// Live progress, a stray non-UTF-8 line, then a successful encode.
        const ENCODE_OK: &str = r#"echo "out_time=00:00:01.000000" >&2
printf 'Guessed channel layout \377\376 for input\n' >&2
echo "progress=continue" >&2
echo encoded > "$out"
exit 0"#;

        const ENCODER_MISSING: &str = r#"echo "Unknown encoder 'libmp3lame'" >&2
exit 1"#;

        fn setup(body: &str) -> (TempDir, FakeTools, AudioConverter, PathBuf) {
            let dir = TempDir::new().unwrap();
            let tools =
                FakeTools::install(dir.path(), body, &fixtures::probe_json(2.0, false)).unwrap();
            let work = dir.path().join("work");
            let converter = AudioConverter::new(&tools.config(&work));
            (dir, tools, converter, work)
        }

        fn work_is_empty(work: &Path) -> bool {
            std::fs::read_dir(work).unwrap().next().is_none()
        }

        #[tokio::test]
        async fn test_external_success_reports_live_progress() {
            let (dir, tools, converter, work) = setup(ENCODE_OK);
            let source = fixtures::write_wav(dir.path(), "song.wav", 2).unwrap();

            let (sink, mut rx) = ProgressSink::channel();
            let result = converter.convert(job(source, ".mp3"), sink).await.unwrap();

            assert_eq!(drain(&mut rx), vec![50, 100]);
            assert!(result.output_path.ends_with("song_converted.mp3"));
            assert_eq!(std::fs::read_to_string(&result.output_path).unwrap(), "encoded\n");
            assert!(work_is_empty(&work));

            let calls = tools.calls();
            assert_eq!(calls.len(), 1);
            assert!(calls[0].contains("-vn -acodec libmp3lame"));
            assert!(calls[0].contains("-progress pipe:2"));
        }

        #[tokio::test]
        async fn test_external_aac_uses_adts_muxer() {
            let (dir, tools, converter, _work) = setup(ENCODE_OK);
            let source = fixtures::write_wav(dir.path(), "song.wav", 1).unwrap();

            let (sink, _rx) = ProgressSink::channel();
            converter.convert(job(source, ".aac"), sink).await.unwrap();

            assert!(tools.calls()[0].contains("-acodec aac -f adts"));
        }

        #[tokio::test]
        async fn test_external_failure_keeps_encoder_message() {
            let (dir, _tools, converter, work) = setup(ENCODER_MISSING);
            let source = fixtures::write_wav(dir.path(), "song.wav", 1).unwrap();

            let (sink, mut rx) = ProgressSink::channel();
            let err = converter.convert(job(source, ".mp3"), sink).await.unwrap_err();

            assert_eq!(err.kind(), ErrorKind::ConversionFailed);
            let message = err.to_string();
            assert!(message.starts_with(CONTEXT), "{}", message);
            assert!(message.contains("exit code 1"), "{}", message);
            assert!(message.contains("Unknown encoder 'libmp3lame'"), "{}", message);
            assert!(drain(&mut rx).is_empty());
            assert!(!dir.path().join("song_converted.mp3").exists());
            assert!(work_is_empty(&work));
        }

        #[tokio::test]
        async fn test_unreadable_source_is_decoded_by_ffmpeg() {
            let (dir, tools, converter, work) = setup(ENCODE_OK);
            let source = dir.path().join("voice.wma");
            std::fs::write(&source, b"0&\xb2u\x8ef\xcf\x11 not for symphonia").unwrap();

            let (sink, mut rx) = ProgressSink::channel();
            let result = converter.convert(job(source, ".ogg"), sink).await.unwrap();

            assert_eq!(drain(&mut rx), vec![50, 100]);
            assert!(result.output_path.ends_with("voice_converted.ogg"));
            let calls = tools.calls();
            assert_eq!(calls.len(), 2);
            assert!(calls[0].contains("voice.wma"));
            assert!(calls[0].contains("-acodec pcm_s16le -f wav"));
            assert!(calls[1].contains("-acodec libvorbis"));
            assert!(work_is_empty(&work));
        }

        #[tokio::test]
        async fn test_direct_path_falls_back_to_ffmpeg_decoding() {
            let dir = TempDir::new().unwrap();
            let tone = fixtures::write_wav(dir.path(), "tone.wav", 1).unwrap();
            let body = format!("cp '{}' \"$out\"", tone.display());
            let tools =
                FakeTools::install(dir.path(), &body, &fixtures::probe_json(1.0, false)).unwrap();
            let work = dir.path().join("work");
            let converter = AudioConverter::new(&tools.config(&work));
            let source = dir.path().join("voice.wma");
            std::fs::write(&source, b"not for symphonia").unwrap();

            let (sink, mut rx) = ProgressSink::channel();
            let result = converter.convert(job(source, ".wav"), sink).await.unwrap();

            let progress = drain(&mut rx);
            assert_eq!(progress.first(), Some(&0));
            assert_eq!(progress.last(), Some(&100));
            assert_eq!(tools.calls().len(), 1);
            let reader = hound::WavReader::open(&result.output_path).unwrap();
            assert_eq!(reader.duration(), 8000);
            assert!(work_is_empty(&work));
        }
    }
}
