//! In-process audio codec layer: decode with Symphonia, write WAV with hound.

use std::fs::File;
use std::ops::Range;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{
    CodecParameters, DecoderOptions, CODEC_TYPE_NULL, CODEC_TYPE_PCM_F32BE, CODEC_TYPE_PCM_F32LE,
    CODEC_TYPE_PCM_F64BE, CODEC_TYPE_PCM_F64LE,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::SampleFormat;
use tracing::debug;

use super::error::ConverterError;

/// Number of equal time slices used for direct-path progress.
pub const PROGRESS_CHUNKS: u64 = 10;

/// Interim progress is scaled into `[0, INTERIM_SCALE)`.
const INTERIM_SCALE: u64 = 90;

/// Interleaved PCM in the source's sample family.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    /// Integer samples scaled to the full `i32` range.
    Int(Vec<i32>),
    /// Floating point samples in `[-1.0, 1.0]`.
    Float(Vec<f32>),
}

impl Samples {
    fn len(&self) -> usize {
        match self {
            Self::Int(samples) => samples.len(),
            Self::Float(samples) => samples.len(),
        }
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fully decoded, interleaved PCM.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: u16,
    /// Width written back out: 16, 24 or 32 bits (always 32 for float).
    pub bits_per_sample: u16,
    pub samples: Samples,
}

impl DecodedAudio {
    /// Number of frames (samples per channel).
    pub fn frames(&self) -> u64 {
        if self.channels == 0 {
            return 0;
        }
        (self.samples.len() / self.channels as usize) as u64
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    fn wav_spec(&self) -> hound::WavSpec {
        let (bits_per_sample, sample_format) = match self.samples {
            Samples::Int(_) => (self.bits_per_sample, hound::SampleFormat::Int),
            Samples::Float(_) => (32, hound::SampleFormat::Float),
        };
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample,
            sample_format,
        }
    }

    /// Writes the whole buffer as a PCM WAV file in the source's width.
    pub fn write_wav(&self, path: &Path) -> Result<(), ConverterError> {
        self.write_wav_chunked(path, |_| {})
    }

    /// Writes the buffer chunk by chunk, calling `on_chunk` with the interim
    /// percentage before each chunk is written.
    pub fn write_wav_chunked<F>(&self, path: &Path, mut on_chunk: F) -> Result<(), ConverterError>
    where
        F: FnMut(u8),
    {
        let spec = self.wav_spec();
        let mut writer = hound::WavWriter::create(path, spec)?;
        let channels = self.channels as usize;
        let shift = 32 - u32::from(spec.bits_per_sample);

        for (frames, percent) in chunk_plan(self.frames()) {
            on_chunk(percent);
            let range = frames.start as usize * channels..frames.end as usize * channels;
            match &self.samples {
                Samples::Int(samples) => {
                    for sample in &samples[range] {
                        writer.write_sample(*sample >> shift)?;
                    }
                }
                Samples::Float(samples) => {
                    for sample in &samples[range] {
                        writer.write_sample(*sample)?;
                    }
                }
            }
        }

        writer.finalize()?;
        Ok(())
    }
}

/// Sample family and output width for a track.
///
/// Lossy codecs carry no width and come out as 16-bit integers.
fn output_layout(params: &CodecParameters) -> (bool, u16) {
    let float = matches!(params.sample_format, Some(SampleFormat::F32 | SampleFormat::F64))
        || [
            CODEC_TYPE_PCM_F32LE,
            CODEC_TYPE_PCM_F32BE,
            CODEC_TYPE_PCM_F64LE,
            CODEC_TYPE_PCM_F64BE,
        ]
        .contains(&params.codec);
    if float {
        return (true, 32);
    }
    let bits = match params.bits_per_sample {
        Some(bits) if bits > 24 => 32,
        Some(bits) if bits > 16 => 24,
        _ => 16,
    };
    (false, bits)
}

/// Splits `total_frames` into equal chunks with their interim percentage.
///
/// Chunk size is `total / 10`; a trailing partial chunk is kept. The
/// percentage of a chunk is `floor(90 * start / total)`, so interim values
/// stay below 90. Inputs shorter than ten frames form a single chunk.
pub fn chunk_plan(total_frames: u64) -> Vec<(Range<u64>, u8)> {
    if total_frames == 0 {
        return Vec::new();
    }
    let chunk = total_frames / PROGRESS_CHUNKS;
    if chunk == 0 {
        return vec![(0..total_frames, 0)];
    }

    (0..total_frames)
        .step_by(chunk as usize)
        .map(|start| {
            let end = (start + chunk).min(total_frames);
            let percent = (INTERIM_SCALE * start / total_frames) as u8;
            (start..end, percent)
        })
        .collect()
}

/// Decodes the first audio track of `path` into interleaved PCM, keeping
/// the source's sample width.
pub fn decode_file(path: &Path) -> Result<DecodedAudio, ConverterError> {
    if !path.exists() {
        return Err(ConverterError::InputNotFound {
            path: path.to_path_buf(),
        });
    }

    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(&ext.to_lowercase());
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| ConverterError::conversion_failed("no audio track found", None))?;
    let track_id = track.id;

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let (float, bits_per_sample) = output_layout(&track.codec_params);
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);
    let mut samples = if float {
        Samples::Float(Vec::new())
    } else {
        Samples::Int(Vec::new())
    };
    let mut skipped_packets = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;
                let capacity = decoded.capacity() as u64;
                match &mut samples {
                    Samples::Int(out) => {
                        let mut buffer = SampleBuffer::<i32>::new(capacity, spec);
                        buffer.copy_interleaved_ref(decoded);
                        out.extend_from_slice(buffer.samples());
                    }
                    Samples::Float(out) => {
                        let mut buffer = SampleBuffer::<f32>::new(capacity, spec);
                        buffer.copy_interleaved_ref(decoded);
                        out.extend_from_slice(buffer.samples());
                    }
                }
            }
            Err(SymphoniaError::DecodeError(_)) => skipped_packets += 1,
            Err(e) => return Err(e.into()),
        }
    }

    if skipped_packets > 0 {
        debug!("Skipped {} undecodable packets in {}", skipped_packets, path.display());
    }

    if samples.is_empty() || sample_rate == 0 || channels == 0 {
        return Err(ConverterError::conversion_failed(
            format!("no audio could be decoded from {}", path.display()),
            None,
        ));
    }

    Ok(DecodedAudio {
        sample_rate,
        channels,
        bits_per_sample,
        samples,
    })
}
