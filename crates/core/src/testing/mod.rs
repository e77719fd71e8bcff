//! Testing utilities and mock implementations.
//!
//! [`MockConverter`] stands in for any of the real converters, so engine
//! behavior can be exercised without codecs or external tools.
//!
//! # Example
//!
//! ```rust,ignore
//! use mediaconv_core::testing::{fixtures, MockConverter};
//!
//! let dir = tempfile::TempDir::new()?;
//! let source = fixtures::write_png(dir.path(), "photo.png", 8, 8);
//! let engine = ConversionEngine::builder()
//!     .with_converter(MockConverter::new(MediaKind::Image))
//!     .build();
//! ```

mod mock_converter;

pub use mock_converter::{MockConverter, RecordedConversion};

/// Fixture media generated on the fly.
pub mod fixtures {
    use std::path::{Path, PathBuf};

    /// Small SVG with a translucent shape, 24x16 user units.
    pub const LOGO_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg"
     width="24" height="16" viewBox="0 0 24 16">
  <rect x="2" y="2" width="20" height="12" rx="3" fill="#1e90ff" fill-opacity="0.6"/>
  <circle cx="12" cy="8" r="4" fill="#ffffff"/>
</svg>"##;

    /// Writes `LOGO_SVG` to `dir/name`.
    pub fn write_svg(dir: &Path, name: &str) -> std::io::Result<PathBuf> {
        let path = dir.join(name);
        std::fs::write(&path, LOGO_SVG)?;
        Ok(path)
    }

    /// Writes an RGBA PNG with a transparent gradient.
    pub fn write_png(
        dir: &Path,
        name: &str,
        width: u32,
        height: u32,
    ) -> image::ImageResult<PathBuf> {
        let path = dir.join(name);
        let img = image::RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([(x * 16) as u8, (y * 16) as u8, 128, ((x + y) * 8) as u8])
        });
        img.save(&path)?;
        Ok(path)
    }

    /// Writes a 16-bit stereo sine tone at 8 kHz.
    pub fn write_wav(dir: &Path, name: &str, seconds: u32) -> Result<PathBuf, hound::Error> {
        let path = dir.join(name);
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec)?;
        for i in 0..(seconds * 8000) {
            let sample = ((i as f32 * 0.03).sin() * 6000.0) as i16;
            writer.write_sample(sample)?;
            writer.write_sample(sample / 2)?;
        }
        writer.finalize()?;
        Ok(path)
    }

    /// ffprobe JSON for a file of `duration_secs`, with a video stream when
    /// `with_video` is set.
    pub fn probe_json(duration_secs: f64, with_video: bool) -> String {
        let video = if with_video {
            r#"{ "codec_type": "video", "codec_name": "h264" },"#
        } else {
            ""
        };
        format!(
            r#"{{ "format": {{ "format_name": "wav", "duration": "{:.3}" }},
  "streams": [ {} {{ "codec_type": "audio", "codec_name": "pcm_s16le" }} ] }}"#,
            duration_secs, video
        )
    }

    /// Shell-script stand-ins for ffmpeg and ffprobe.
    ///
    /// Both answer `-version` successfully. Every other ffmpeg invocation is
    /// appended to a call log, then `ffmpeg_body` runs with `$out` set to the
    /// last argument (the output path). ffprobe prints `probe_json`.
    #[cfg(unix)]
    #[derive(Debug, Clone)]
    pub struct FakeTools {
        pub ffmpeg: PathBuf,
        pub ffprobe: PathBuf,
        calls: PathBuf,
    }

    #[cfg(unix)]
    impl FakeTools {
        pub fn install(dir: &Path, ffmpeg_body: &str, probe_json: &str) -> std::io::Result<Self> {
            let bin = dir.join("bin");
            std::fs::create_dir_all(&bin)?;
            let calls = bin.join("ffmpeg.calls");

            let ffmpeg = bin.join("ffmpeg");
            let script = format!(
                "#!/bin/sh\n\
                 [ \"$1\" = \"-version\" ] && exit 0\n\
                 [ \"$2\" = \"-encoders\" ] && exit 0\n\
                 for out; do :; done\n\
                 echo \"$*\" >> '{}'\n\
                 {}\n",
                calls.display(),
                ffmpeg_body
            );
            write_executable(&ffmpeg, &script)?;

            let ffprobe = bin.join("ffprobe");
            let script = format!(
                "#!/bin/sh\n[ \"$1\" = \"-version\" ] && exit 0\ncat <<'EOF'\n{}\nEOF\n",
                probe_json
            );
            write_executable(&ffprobe, &script)?;

            Ok(Self {
                ffmpeg,
                ffprobe,
                calls,
            })
        }

        /// Converter configuration pointing at the fakes, with `temp_dir`
        /// for intermediates.
        pub fn config(&self, temp_dir: &Path) -> crate::ConverterConfig {
            crate::ConverterConfig::with_paths(self.ffmpeg.clone(), self.ffprobe.clone())
                .with_temp_dir(temp_dir.to_path_buf())
        }

        /// Argument lists of the ffmpeg runs so far, one per line.
        pub fn calls(&self) -> Vec<String> {
            std::fs::read_to_string(&self.calls)
                .map(|log| log.lines().map(str::to_string).collect())
                .unwrap_or_default()
        }
    }

    #[cfg(unix)]
    fn write_executable(path: &Path, script: &str) -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        std::fs::write(path, script)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
    }
}
