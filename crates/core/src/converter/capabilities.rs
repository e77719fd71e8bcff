//! Encoder capability detection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::ffmpeg::FfmpegTool;

/// Encoders the configured ffmpeg build reports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncoderCapabilities {
    encoders: BTreeSet<String>,
}

impl EncoderCapabilities {
    /// Detect available encoders by probing ffmpeg.
    ///
    /// An unreachable ffmpeg yields an empty set.
    pub async fn detect(tool: &FfmpegTool) -> Self {
        match tool.list_encoders().await {
            Some(listing) => Self::from_listing(&listing),
            None => Self::default(),
        }
    }

    /// Parses the table printed by `ffmpeg -encoders`.
    pub fn from_listing(listing: &str) -> Self {
        let encoders = listing
            .lines()
            .skip_while(|line| !line.trim_start().starts_with("------"))
            .skip(1)
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let flags = fields.next()?;
                let name = fields.next()?;
                (flags.len() == 6).then(|| name.to_string())
            })
            .collect();
        Self { encoders }
    }

    /// Whether ffmpeg can encode with `codec`.
    pub fn has_encoder(&self, codec: &str) -> bool {
        self.encoders.contains(codec)
    }

    /// Codecs from `wanted` that are not available.
    pub fn missing<'a>(&self, wanted: &[&'a str]) -> Vec<&'a str> {
        wanted
            .iter()
            .copied()
            .filter(|codec| !self.has_encoder(codec))
            .collect()
    }
}
