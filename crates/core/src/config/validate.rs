use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Tool paths are not empty
/// - AVIF quality is within 1..=100
/// - AVIF speed is within 1..=10
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.converter.ffmpeg_path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "converter.ffmpeg_path cannot be empty".to_string(),
        ));
    }
    if config.converter.ffprobe_path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "converter.ffprobe_path cannot be empty".to_string(),
        ));
    }

    if !(1..=100).contains(&config.image.avif_quality) {
        return Err(ConfigError::ValidationError(format!(
            "image.avif_quality must be between 1 and 100, got {}",
            config.image.avif_quality
        )));
    }
    if !(1..=10).contains(&config.image.avif_speed) {
        return Err(ConfigError::ValidationError(format!(
            "image.avif_speed must be between 1 and 10, got {}",
            config.image.avif_speed
        )));
    }

    Ok(())
}
