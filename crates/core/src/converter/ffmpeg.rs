//! External encoder (ffmpeg) and introspection tool (ffprobe) plumbing.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::config::ConverterConfig;
use super::error::ConverterError;
use super::types::MediaInfo;

/// Matches `time=HH:MM:SS(.frac)` and `out_time=HH:MM:SS(.frac)` markers.
static TIME_REGEX: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"time=(\d+):(\d+):(\d+(?:\.\d+)?)").ok());

/// Maximum number of diagnostic lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Handle on the ffmpeg/ffprobe pair.
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    log_level: String,
    extra_args: Vec<String>,
}

impl FfmpegTool {
    /// Creates a tool handle from converter configuration.
    pub fn new(config: &ConverterConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            log_level: config.ffmpeg_log_level.clone(),
            extra_args: config.extra_ffmpeg_args.clone(),
        }
    }

    /// Checks that both ffmpeg and ffprobe can be executed.
    ///
    /// Touches no files; a failure is always `MissingDependency`.
    pub async fn ensure_available(&self) -> Result<(), ConverterError> {
        check_binary("ffmpeg", &self.ffmpeg_path).await?;
        check_binary("ffprobe", &self.ffprobe_path).await
    }

    /// Output of `ffmpeg -encoders`, or `None` if ffmpeg cannot be run.
    pub async fn list_encoders(&self) -> Option<String> {
        let output = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            debug!("ffmpeg -encoders exited with code {:?}", output.status.code());
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Probes a media file to get its information.
    pub async fn probe(&self, path: &Path) -> Result<MediaInfo, ConverterError> {
        if !path.exists() {
            return Err(ConverterError::InputNotFound {
                path: path.to_path_buf(),
            });
        }

        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.spawn_error("ffprobe", &self.ffprobe_path, e))?;

        if !output.status.success() {
            return Err(ConverterError::probe_failed(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_probe_output(path, &stdout)
    }

    /// Total duration of a media file in seconds.
    pub async fn probe_duration(&self, path: &Path) -> Result<f64, ConverterError> {
        let info = self.probe(path).await?;
        if info.duration_secs > 0.0 {
            Ok(info.duration_secs)
        } else {
            Err(ConverterError::probe_failed(format!(
                "no duration reported for {}",
                path.display()
            )))
        }
    }

    /// Runs ffmpeg with `args`, handing every diagnostic line to `on_line`.
    ///
    /// Lines are decoded lossily, so stray non-UTF-8 bytes never abort a run.
    /// A non-zero exit becomes `ConversionFailed` carrying the tail of the
    /// diagnostic output.
    pub async fn run<F>(&self, args: Vec<String>, mut on_line: F) -> Result<(), ConverterError>
    where
        F: FnMut(&str) + Send,
    {
        debug!("Running {} {}", self.ffmpeg_path.display(), args.join(" "));

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error("ffmpeg", &self.ffmpeg_path, e))?;

        let stderr = child.stderr.take().ok_or_else(|| {
            ConverterError::conversion_failed("ffmpeg stderr was not captured", None)
        })?;
        let mut reader = BufReader::new(stderr);

        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES + 1);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            if reader.read_until(b'\n', &mut raw).await? == 0 {
                break;
            }
            let decoded = String::from_utf8_lossy(&raw);
            let line = decoded.trim_end_matches(['\r', '\n']);
            on_line(line);
            if !line.is_empty() && !is_progress_key_line(line) {
                tail.push_back(line.to_string());
                if tail.len() > STDERR_TAIL_LINES {
                    tail.pop_front();
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            let exit = match status.code() {
                Some(code) => format!("exit code {}", code),
                None => "terminated by signal".to_string(),
            };
            warn!("ffmpeg failed ({})", exit);
            return Err(ConverterError::conversion_failed(
                format!("FFmpeg conversion error ({})", exit),
                (!tail.is_empty()).then(|| Vec::from(tail).join("\n")),
            ));
        }

        Ok(())
    }

    /// Common arguments: overwrite, input, log level and progress stream.
    pub fn base_args(&self, input_path: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            input_path.to_string_lossy().to_string(),
            "-loglevel".to_string(),
            self.log_level.clone(),
            "-nostats".to_string(),
            "-progress".to_string(),
            "pipe:2".to_string(),
        ]
    }

    /// Appends configured extra arguments and the output path.
    pub fn finish_args(&self, mut args: Vec<String>, output_path: &Path) -> Vec<String> {
        args.extend(self.extra_args.iter().cloned());
        args.push(output_path.to_string_lossy().to_string());
        args
    }

    fn spawn_error(&self, tool: &str, path: &Path, e: std::io::Error) -> ConverterError {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConverterError::missing_dependency(tool, path)
        } else {
            ConverterError::Io(e)
        }
    }
}

async fn check_binary(tool: &str, path: &Path) -> Result<(), ConverterError> {
    let result = Command::new(path)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await;

    match result {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => {
            warn!("{} -version exited with code {:?}", tool, status.code());
            Err(ConverterError::missing_dependency(tool, path))
        }
        Err(e) => {
            debug!("{} not executable at {}: {}", tool, path.display(), e);
            Err(ConverterError::missing_dependency(tool, path))
        }
    }
}

/// Key/value lines of the `-progress` stream, excluding the time markers.
fn is_progress_key_line(line: &str) -> bool {
    line.split_once('=')
        .map(|(key, _)| {
            !key.is_empty()
                && key
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        })
        .unwrap_or(false)
}

/// Parses the first timestamp marker in a diagnostic line into seconds.
pub fn parse_timestamp(line: &str) -> Option<f64> {
    let re = TIME_REGEX.as_ref()?;
    let caps = re.captures(line)?;
    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Interim progress: `min(99, floor(100 * current / total))`.
pub fn progress_percent(current_secs: f64, total_secs: f64) -> Option<u8> {
    if total_secs.is_nan() || total_secs <= 0.0 || current_secs.is_nan() || current_secs < 0.0 {
        return None;
    }
    let percent = (100.0 * current_secs / total_secs).floor();
    Some(percent.min(99.0) as u8)
}

/// Parses a diagnostic line straight into an interim progress value.
pub fn line_progress(line: &str, total_secs: f64) -> Option<u8> {
    parse_timestamp(line).and_then(|current| progress_percent(current, total_secs))
}

/// Parses ffprobe JSON output into MediaInfo.
fn parse_probe_output(path: &Path, output: &str) -> Result<MediaInfo, ConverterError> {
    #[derive(Deserialize)]
    struct ProbeOutput {
        format: ProbeFormat,
        #[serde(default)]
        streams: Vec<ProbeStream>,
    }

    #[derive(Deserialize)]
    struct ProbeFormat {
        format_name: String,
        duration: Option<String>,
    }

    #[derive(Deserialize)]
    struct ProbeStream {
        codec_type: String,
        codec_name: Option<String>,
    }

    let probe: ProbeOutput = serde_json::from_str(output).map_err(|e| {
        ConverterError::probe_failed(format!("Failed to parse ffprobe output: {}", e))
    })?;

    let duration_secs = probe
        .format
        .duration
        .as_ref()
        .and_then(|d| d.trim().parse::<f64>().ok())
        .unwrap_or(0.0);

    let audio_stream = probe.streams.iter().find(|s| s.codec_type == "audio");
    let video_stream = probe.streams.iter().find(|s| s.codec_type == "video");

    let format_name = probe
        .format
        .format_name
        .split(',')
        .next()
        .unwrap_or("unknown");

    Ok(MediaInfo {
        path: path.to_path_buf(),
        duration_secs,
        format: format_name.to_string(),
        audio_codec: audio_stream.and_then(|s| s.codec_name.clone()),
        video_codec: video_stream.and_then(|s| s.codec_name.clone()),
    })
}
