//! Output placement: every converter writes through a sibling temp file.

use std::path::Path;
use tempfile::NamedTempFile;

use super::error::ConverterError;

/// Temporary file next to `target`, later persisted onto it.
pub(crate) fn sibling_temp_file(target: &Path) -> Result<NamedTempFile, ConverterError> {
    sibling_temp_file_with_suffix(target, "")
}

/// Like [`sibling_temp_file`], keeping an extension so tools can infer the
/// container from the name.
pub(crate) fn sibling_temp_file_with_suffix(
    target: &Path,
    suffix: &str,
) -> Result<NamedTempFile, ConverterError> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok(tempfile::Builder::new()
        .prefix(".mediaconv-")
        .suffix(suffix)
        .tempfile_in(dir)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sibling_temp_file_location() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.m4a");
        let temp = sibling_temp_file_with_suffix(&target, ".m4a").unwrap();
        assert_eq!(temp.path().parent(), Some(dir.path()));
        assert!(temp.path().to_string_lossy().ends_with(".m4a"));
    }

    #[test]
    fn test_dropped_temp_file_is_removed() {
        let dir = TempDir::new().unwrap();
        let temp = sibling_temp_file(&dir.path().join("out.wav")).unwrap();
        let path = temp.path().to_path_buf();
        assert!(path.exists());
        drop(temp);
        assert!(!path.exists());
    }
}
