//! Converters for the three media kinds.
//!
//! Each converter implements [`Converter`]: it takes a [`ConversionJob`],
//! writes the output next to the source and reports progress through a
//! [`ProgressSink`].
//!
//! - [`ImageConverter`] decodes and re-encodes in process, rasterizing SVG.
//! - [`AudioConverter`] writes WAV natively and shells out to ffmpeg for
//!   other containers, following its timestamp markers.
//! - [`VideoConverter`] re-encodes through ffmpeg in one pass.
//!
//! # Example
//!
//! ```ignore
//! use mediaconv_core::converter::{AudioConverter, Converter, ConversionJob, ProgressSink};
//!
//! let converter = AudioConverter::with_defaults();
//! converter.validate().await?;
//!
//! let (sink, mut rx) = ProgressSink::channel();
//! let job = ConversionJob {
//!     job_id: "job-1".to_string(),
//!     input_path: PathBuf::from("/music/song.flac"),
//!     output_path: PathBuf::from("/music/song_converted.mp3"),
//!     target_extension: ".mp3".to_string(),
//! };
//! let result = converter.convert(job, sink).await?;
//! println!("Converted in {} ms", result.duration_ms);
//! ```

mod audio;
mod capabilities;
mod config;
mod error;
mod ffmpeg;
mod image;
mod output;
mod pcm;
mod progress;
mod traits;
mod types;
mod video;

pub use self::audio::{AudioConverter, AudioStrategy};
pub use self::capabilities::EncoderCapabilities;
pub use self::config::{ConverterConfig, ImageConfig};
pub use self::error::ConverterError;
pub use self::ffmpeg::{line_progress, parse_timestamp, progress_percent, FfmpegTool};
pub use self::image::ImageConverter;
pub use self::pcm::{chunk_plan, decode_file, DecodedAudio, Samples};
pub use self::progress::ProgressSink;
pub use self::traits::Converter;
pub use self::types::{
    converted_path, ConversionJob, ConversionOutcome, ConversionRequest, ConversionResult,
    ErrorKind, MediaInfo, ProgressEvent, CONVERTED_SUFFIX,
};
pub use self::video::{VideoConverter, VideoEncoding};
