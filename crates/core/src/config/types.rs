use serde::{Deserialize, Serialize};

pub use crate::converter::{ConverterConfig, ImageConfig};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// External tools and intermediate files.
    #[serde(default)]
    pub converter: ConverterConfig,
    /// Still-image encoder settings.
    #[serde(default)]
    pub image: ImageConfig,
}
