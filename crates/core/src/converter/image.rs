//! Still image converter.
//!
//! Vector sources are rasterized first; targets without alpha support get a
//! plain RGB image. The encoded bytes reach the target path only once the
//! encoder has succeeded. AVIF sources are decoded by ffmpeg, since the
//! in-process codec only encodes AVIF.

use async_trait::async_trait;
use image::codecs::avif::AvifEncoder;
use image::{DynamicImage, ImageFormat, ImageReader, Rgba, RgbaImage};
use once_cell::sync::Lazy;
use resvg::{tiny_skia, usvg};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::debug;

use super::config::{ConverterConfig, ImageConfig};
use super::error::ConverterError;
use super::ffmpeg::FfmpegTool;
use super::output::sibling_temp_file;
use super::progress::ProgressSink;
use super::traits::Converter;
use super::types::{ConversionJob, ConversionResult};
use crate::catalog::MediaKind;

/// The vector format: accepted as a source, never produced.
pub const VECTOR_EXTENSION: &str = ".svg";

/// Sources the in-process decoder cannot read.
const FFMPEG_DECODED_EXTENSIONS: &[&str] = &[".avif"];

const CONTEXT: &str = "Image conversion error";

/// System fonts for SVG `<text>`, loaded on first use.
static SVG_FONTS: Lazy<SvgFonts> = Lazy::new(SvgFonts::load);

struct SvgFonts {
    database: Arc<usvg::fontdb::Database>,
    /// Family for text without a `font-family`.
    default_family: String,
}

impl SvgFonts {
    fn load() -> Self {
        use usvg::fontdb::{Database, Family, Query};

        let mut database = Database::new();
        database.load_system_fonts();
        let resolves = |db: &Database, family: Family<'_>| {
            let families = [family];
            db.query(&Query {
                families: &families,
                ..Query::default()
            })
            .is_some()
        };

        let installed = database
            .faces()
            .find_map(|face| face.families.first())
            .map(|(name, _)| name.clone());
        let mut default_family = usvg::Options::default().font_family;
        if let Some(installed) = installed {
            // Generic names default to families most Linux hosts lack.
            if !resolves(&database, Family::Serif) {
                database.set_serif_family(installed.clone());
            }
            if !resolves(&database, Family::SansSerif) {
                database.set_sans_serif_family(installed.clone());
            }
            if !resolves(&database, Family::Monospace) {
                database.set_monospace_family(installed.clone());
            }
            if !resolves(&database, Family::Name(&default_family)) {
                default_family = installed;
            }
        }

        debug!(
            "Loaded {} font faces for SVG text (default family {})",
            database.len(),
            default_family
        );
        Self {
            database: Arc::new(database),
            default_family,
        }
    }
}

/// Converts still images between raster formats.
pub struct ImageConverter {
    config: ImageConfig,
    ffmpeg: FfmpegTool,
    temp_dir: PathBuf,
}

impl ImageConverter {
    /// Creates a new image converter. `tools` locates ffmpeg for the
    /// sources it has to decode.
    pub fn new(config: ImageConfig, tools: &ConverterConfig) -> Self {
        Self {
            config,
            ffmpeg: FfmpegTool::new(tools),
            temp_dir: tools.temp_dir.clone(),
        }
    }

    /// Creates a converter with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ImageConfig::default(), &ConverterConfig::default())
    }

    /// Has ffmpeg decode the first frame of `input` into a temporary PNG.
    async fn decode_with_ffmpeg(&self, input: &Path) -> Result<NamedTempFile, ConverterError> {
        self.ffmpeg.ensure_available().await?;
        if !input.exists() {
            return Err(ConverterError::InputNotFound {
                path: input.to_path_buf(),
            });
        }

        tokio::fs::create_dir_all(&self.temp_dir).await?;
        let decoded = tempfile::Builder::new()
            .prefix("mediaconv-")
            .suffix(".png")
            .tempfile_in(&self.temp_dir)?;

        let mut args = self.ffmpeg.base_args(input);
        args.extend(
            ["-frames:v", "1", "-c:v", "png", "-f", "image2"]
                .into_iter()
                .map(str::to_string),
        );
        let args = self.ffmpeg.finish_args(args, decoded.path());
        self.ffmpeg.run(args, |_| {}).await?;
        Ok(decoded)
    }

    fn convert_blocking(
        config: &ImageConfig,
        job: &ConversionJob,
        source: &Path,
        progress: &ProgressSink,
    ) -> Result<u64, ConverterError> {
        let source_is_vector = job.source_extension().as_deref() == Some(VECTOR_EXTENSION);
        let image = if source_is_vector {
            rasterize_svg(source)?
        } else {
            open_raster(source)?
        };

        let image = adapt_color(image, &job.target_extension);
        progress.report(50);

        let bytes = encode(&image, &job.target_extension, config)?;
        write_atomically(&job.output_path, &bytes)?;
        Ok(bytes.len() as u64)
    }
}

#[async_trait]
impl Converter for ImageConverter {
    fn name(&self) -> &str {
        "image"
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Image
    }

    fn check_target(&self, target_extension: &str) -> Result<(), ConverterError> {
        if target_extension == VECTOR_EXTENSION {
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
        self.check_target(&job.target_extension)?;
        let start = Instant::now();

        let decoded = match job.source_extension() {
            Some(ext) if FFMPEG_DECODED_EXTENSIONS.contains(&ext.as_str()) => Some(
                self.decode_with_ffmpeg(&job.input_path)
                    .await
                    .map_err(|e| e.context(CONTEXT))?,
            ),
            _ => None,
        };
        let source = decoded
            .as_ref()
            .map(|file| file.path().to_path_buf())
            .unwrap_or_else(|| job.input_path.clone());

        let config = self.config.clone();
        let worker_job = job.clone();
        let worker_progress = progress.clone();
        let size = tokio::task::spawn_blocking(move || {
            Self::convert_blocking(&config, &worker_job, &source, &worker_progress)
        })
        .await
        .map_err(|e| {
            ConverterError::conversion_failed(format!("image worker failed: {}", e), None)
        })?
        .map_err(|e| e.context(CONTEXT))?;
        drop(decoded);

        progress.report(100);
        debug!(
            "Converted image {} -> {} ({} bytes)",
            job.input_path.display(),
            job.output_path.display(),
            size
        );

        Ok(ConversionResult {
            job_id: job.job_id,
            output_path: job.output_path,
            output_size_bytes: size,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Whether the target belongs to the lossy-photographic family.
///
/// These formats carry neither alpha nor a palette.
pub fn is_lossy_photographic(extension: &str) -> bool {
    matches!(extension, ".jpg" | ".jpeg" | ".avif")
}

/// Adapts the decoded color mode to what the target encoder accepts.
pub fn adapt_color(image: DynamicImage, target_extension: &str) -> DynamicImage {
    match target_extension {
        ext if is_lossy_photographic(ext) => match image {
            DynamicImage::ImageRgb8(_) => image,
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        },
        ".webp" | ".gif" | ".bmp" => match image {
            DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => image,
            other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        },
        ".tiff" => match image {
            DynamicImage::ImageLumaA8(_) => DynamicImage::ImageRgba8(image.to_rgba8()),
            DynamicImage::ImageLumaA16(_) => DynamicImage::ImageRgba16(image.to_rgba16()),
            other => other,
        },
        _ => image,
    }
}

/// Rasterizes an SVG document at its intrinsic size.
pub fn rasterize_svg(path: &Path) -> Result<DynamicImage, ConverterError> {
    if !path.exists() {
        return Err(ConverterError::InputNotFound {
            path: path.to_path_buf(),
        });
    }
    let data = std::fs::read(path)?;
    let options = usvg::Options {
        fontdb: SVG_FONTS.database.clone(),
        font_family: SVG_FONTS.default_family.clone(),
        ..usvg::Options::default()
    };
    let tree = usvg::Tree::from_data(&data, &options).map_err(|e| {
        ConverterError::conversion_failed(format!("invalid SVG document: {}", e), None)
    })?;

    let size = tree.size().to_int_size();
    let mut pixmap = tiny_skia::Pixmap::new(size.width(), size.height()).ok_or_else(|| {
        ConverterError::conversion_failed(
            format!("SVG has an empty canvas ({}x{})", size.width(), size.height()),
            None,
        )
    })?;
    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

    // tiny-skia stores premultiplied alpha
    let mut raster = RgbaImage::new(pixmap.width(), pixmap.height());
    for (dst, src) in raster.pixels_mut().zip(pixmap.pixels()) {
        let color = src.demultiply();
        *dst = Rgba([color.red(), color.green(), color.blue(), color.alpha()]);
    }
    Ok(DynamicImage::ImageRgba8(raster))
}

fn open_raster(path: &Path) -> Result<DynamicImage, ConverterError> {
    if !path.exists() {
        return Err(ConverterError::InputNotFound {
            path: path.to_path_buf(),
        });
    }
    Ok(ImageReader::open(path)?.with_guessed_format()?.decode()?)
}

/// Encodes `image` for the target extension into memory.
pub fn encode(
    image: &DynamicImage,
    target_extension: &str,
    config: &ImageConfig,
) -> Result<Vec<u8>, ConverterError> {
    let mut bytes = Vec::new();
    if target_extension == ".avif" {
        let encoder =
            AvifEncoder::new_with_speed_quality(&mut bytes, config.avif_speed, config.avif_quality);
        image.write_with_encoder(encoder)?;
        return Ok(bytes);
    }

    let format = ImageFormat::from_extension(target_extension.trim_start_matches('.')).ok_or_else(
        || ConverterError::UnsupportedTarget {
            extension: target_extension.to_string(),
        },
    )?;
    image.write_to(&mut Cursor::new(&mut bytes), format)?;
    Ok(bytes)
}

/// Writes `bytes` to a sibling temp file, then moves it onto `target`.
fn write_atomically(target: &Path, bytes: &[u8]) -> Result<(), ConverterError> {
    let mut temp = sibling_temp_file(target)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::types::{converted_path, ErrorKind};
    use crate::testing::fixtures;
    use image::ColorType;
    use tempfile::TempDir;

    const SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg"
     width="24" height="16" viewBox="0 0 24 16">
  <rect x="2" y="2" width="12" height="8" fill="#ff0000"/>
  <circle cx="18" cy="10" r="4" fill="#0000ff" fill-opacity="0.5"/>
</svg>"##;

    fn rgba_fixture(dir: &Path) -> PathBuf {
        let path = dir.join("logo.png");
        let image = RgbaImage::from_fn(8, 8, |x, y| {
            Rgba([x as u8 * 30, y as u8 * 30, 128, (x * y) as u8])
        });
        image.save(&path).unwrap();
        path
    }

    fn job(input: PathBuf, ext: &str) -> ConversionJob {
        let output = converted_path(&input, ext);
        ConversionJob {
            job_id: "img".to_string(),
            input_path: input,
            output_path: output,
            target_extension: ext.to_string(),
        }
    }

    fn fast_avif() -> ImageConfig {
        ImageConfig {
            avif_quality: 75,
            avif_speed: 10,
        }
    }

    async fn run(job: ConversionJob) -> (Result<ConversionResult, ConverterError>, Vec<u8>) {
        run_with(&ImageConverter::new(fast_avif(), &ConverterConfig::default()), job).await
    }

    async fn run_with(
        converter: &ImageConverter,
        job: ConversionJob,
    ) -> (Result<ConversionResult, ConverterError>, Vec<u8>) {
        let (sink, mut rx) = ProgressSink::channel();
        let result = converter.convert(job, sink).await;
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event.percent);
        }
        (result, seen)
    }

    #[test]
    fn test_adapt_color_drops_alpha_for_jpeg() {
        let image = DynamicImage::ImageRgba8(RgbaImage::new(2, 2));
        assert_eq!(adapt_color(image.clone(), ".jpg").color(), ColorType::Rgb8);
        assert_eq!(adapt_color(image.clone(), ".avif").color(), ColorType::Rgb8);
        assert_eq!(adapt_color(image.clone(), ".png").color(), ColorType::Rgba8);
        assert_eq!(adapt_color(image, ".webp").color(), ColorType::Rgba8);
    }

    #[test]
    fn test_adapt_color_normalizes_depth() {
        let image = DynamicImage::ImageLumaA16(image::ImageBuffer::new(2, 2));
        assert_eq!(adapt_color(image.clone(), ".gif").color(), ColorType::Rgba8);
        assert_eq!(adapt_color(image.clone(), ".jpeg").color(), ColorType::Rgb8);
        assert_eq!(adapt_color(image.clone(), ".tiff").color(), ColorType::Rgba16);
        assert_eq!(adapt_color(image, ".png").color(), ColorType::La16);
    }

    #[test]
    fn test_lossy_family() {
        assert!(is_lossy_photographic(".jpg"));
        assert!(is_lossy_photographic(".avif"));
        assert!(!is_lossy_photographic(".webp"));
        assert!(!is_lossy_photographic(".png"));
    }

    #[test]
    fn test_rejects_vector_target() {
        let converter = ImageConverter::with_defaults();
        let err = converter.check_target(".svg").unwrap_err();
        assert!(matches!(err, ConverterError::UnsupportedTarget { .. }));
        assert!(converter.check_target(".png").is_ok());
    }

    #[tokio::test]
    async fn test_rgba_png_to_jpeg() {
        let dir = TempDir::new().unwrap();
        let source = rgba_fixture(dir.path());
        let (result, progress) = run(job(source, ".jpg")).await;

        let result = result.unwrap();
        assert_eq!(progress, vec![50, 100]);
        assert!(result.output_size_bytes > 0);
        let decoded = image::open(&result.output_path).unwrap();
        assert_eq!(decoded.color(), ColorType::Rgb8);
    }

    #[tokio::test]
    async fn test_svg_to_avif() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("logo.svg");
        std::fs::write(&source, SVG).unwrap();

        let (result, progress) = run(job(source, ".avif")).await;
        let result = result.unwrap();
        assert_eq!(progress, vec![50, 100]);
        assert!(result.output_path.ends_with("logo_converted.avif"));
        assert!(std::fs::metadata(&result.output_path).unwrap().len() > 0);
    }

    #[test]
    fn test_rasterize_uses_intrinsic_size() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("logo.svg");
        std::fs::write(&source, SVG).unwrap();

        let image = rasterize_svg(&source).unwrap();
        assert_eq!((image.width(), image.height()), (24, 16));
        assert!(image.color().has_alpha());
    }

    #[test]
    fn test_rasterize_renders_text() {
        if SVG_FONTS.database.faces().next().is_none() {
            // No system fonts to shape with.
            return;
        }
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("label.svg");
        std::fs::write(
            &source,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="60">
  <text x="10" y="45" font-size="40">HELLO</text>
</svg>"#,
        )
        .unwrap();

        let image = rasterize_svg(&source).unwrap().to_rgba8();
        let opaque = image.pixels().filter(|p| p[3] > 0).count();
        assert!(opaque > 100, "only {} painted pixels", opaque);
    }

    #[tokio::test]
    async fn test_avif_source_needs_ffmpeg() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("photo.avif");
        std::fs::write(&source, b"\0\0\0\x1cftypavif").unwrap();

        let tools = ConverterConfig::with_paths(
            PathBuf::from("/nonexistent/ffmpeg"),
            PathBuf::from("/nonexistent/ffprobe"),
        );
        let converter = ImageConverter::new(fast_avif(), &tools);
        let (result, progress) = run_with(&converter, job(source, ".png")).await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::MissingDependency);
        assert!(progress.is_empty());
        assert!(!dir.path().join("photo_converted.png").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_avif_output_reads_back_through_ffmpeg() {
        let dir = TempDir::new().unwrap();
        let svg = fixtures::write_svg(dir.path(), "logo.svg").unwrap();
        let (avif, _) = run(job(svg, ".avif")).await;
        let avif = avif.unwrap().output_path;

        // The stand-in decodes by handing back a PNG of the same canvas.
        let frame = fixtures::write_png(dir.path(), "frame.png", 24, 16).unwrap();
        let body = format!("cp '{}' \"$out\"", frame.display());
        let tools = fixtures::FakeTools::install(dir.path(), &body, "{}").unwrap();
        let work = dir.path().join("work");
        let converter = ImageConverter::new(fast_avif(), &tools.config(&work));

        let (result, progress) = run_with(&converter, job(avif, ".png")).await;
        let result = result.unwrap();
        assert_eq!(progress, vec![50, 100]);
        assert!(result.output_path.ends_with("logo_converted_converted.png"));
        let decoded = image::open(&result.output_path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (24, 16));

        let calls = tools.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains("logo_converted.avif"));
        assert!(calls[0].contains("-frames:v 1 -c:v png"));
        assert!(std::fs::read_dir(&work).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_svg_target_fails_before_decode() {
        let dir = TempDir::new().unwrap();
        let source = rgba_fixture(dir.path());
        let (result, progress) = run(job(source, ".svg")).await;

        assert!(matches!(result, Err(ConverterError::UnsupportedTarget { .. })));
        assert!(progress.is_empty());
        assert!(!dir.path().join("logo_converted.svg").exists());
    }

    #[tokio::test]
    async fn test_corrupt_source_leaves_no_output() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("broken.png");
        std::fs::write(&source, b"definitely not a png").unwrap();

        let (result, progress) = run(job(source, ".bmp")).await;
        let err = result.unwrap_err();
        assert!(err.to_string().starts_with(CONTEXT));
        assert!(progress.is_empty());
        assert!(!dir.path().join("broken_converted.bmp").exists());
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
