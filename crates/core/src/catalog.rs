//! Static format catalog.
//!
//! Maps each media kind to the file extensions it recognizes. The same sets
//! are used to classify a source path and to validate a requested target.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Recognized audio extensions, in display order.
pub const AUDIO_EXTENSIONS: &[&str] = &[".mp3", ".wav", ".ogg", ".aac", ".wma", ".m4a", ".flac"];

/// Recognized video extensions, in display order.
pub const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".avi", ".mkv", ".mov", ".wmv", ".flv", ".webm"];

/// Recognized image extensions, in display order.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".tiff", ".webp", ".svg", ".avif",
];

/// Top-level media classification driving converter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
}

impl MediaKind {
    /// All media kinds.
    pub const ALL: [MediaKind; 3] = [MediaKind::Image, MediaKind::Audio, MediaKind::Video];

    /// Extensions accepted for this kind, both as source and as target.
    pub fn supported_targets(self) -> &'static [&'static str] {
        supported_targets(self)
    }

    /// Whether `extension` (already normalized) belongs to this kind.
    pub fn supports(self, extension: &str) -> bool {
        supported_targets(self).contains(&extension)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Returns the ordered extension list for `kind`.
pub fn supported_targets(kind: MediaKind) -> &'static [&'static str] {
    match kind {
        MediaKind::Image => IMAGE_EXTENSIONS,
        MediaKind::Audio => AUDIO_EXTENSIONS,
        MediaKind::Video => VIDEO_EXTENSIONS,
    }
}

/// Classifies a path by its lower-cased extension.
///
/// Returns `None` when the extension is missing or not in any set.
pub fn classify(path: &Path) -> Option<MediaKind> {
    let extension = extension_of(path)?;
    MediaKind::ALL
        .into_iter()
        .find(|kind| kind.supports(&extension))
}

/// Returns the normalized extension of `path` (`.ext`, lower-cased).
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(normalize_extension)
}

/// Lower-cases an extension and makes sure it starts with a single `.`.
pub fn normalize_extension(extension: &str) -> String {
    let trimmed = extension.trim().trim_start_matches('.');
    format!(".{}", trimmed.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_extension() {
        assert_eq!(classify(Path::new("song.flac")), Some(MediaKind::Audio));
        assert_eq!(classify(Path::new("/a/b/clip.MOV")), Some(MediaKind::Video));
        assert_eq!(classify(Path::new("logo.svg")), Some(MediaKind::Image));
        assert_eq!(classify(Path::new("photo.JPeG")), Some(MediaKind::Image));
    }

    #[test]
    fn test_classify_unrecognized() {
        assert_eq!(classify(Path::new("notes.txt")), None);
        assert_eq!(classify(Path::new("README")), None);
        assert_eq!(classify(Path::new("archive.")), None);
    }

    #[test]
    fn test_supported_targets_order() {
        assert_eq!(supported_targets(MediaKind::Audio)[0], ".mp3");
        assert_eq!(supported_targets(MediaKind::Video).last(), Some(&".webm"));
        assert_eq!(supported_targets(MediaKind::Image).len(), 9);
    }

    #[test]
    fn test_sets_are_disjoint() {
        for ext in AUDIO_EXTENSIONS {
            assert!(!VIDEO_EXTENSIONS.contains(ext));
            assert!(!IMAGE_EXTENSIONS.contains(ext));
        }
        for ext in VIDEO_EXTENSIONS {
            assert!(!IMAGE_EXTENSIONS.contains(ext));
        }
    }

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension("WEBM"), ".webm");
        assert_eq!(normalize_extension(".Avif"), ".avif");
        assert_eq!(normalize_extension(" mp3 "), ".mp3");
    }

    #[test]
    fn test_media_kind_display() {
        assert_eq!(MediaKind::Audio.to_string(), "audio");
        assert_eq!(MediaKind::Image.to_string(), "image");
    }
}
