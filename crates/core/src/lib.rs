pub mod catalog;
pub mod config;
pub mod converter;
pub mod engine;
pub mod testing;

pub use catalog::{classify, supported_targets, MediaKind};
pub use config::{
    load_config, load_config_from_env, load_config_from_str, validate_config, Config,
    ConfigError,
};
pub use converter::{
    AudioConverter, ConversionJob, ConversionOutcome, ConversionRequest, ConversionResult,
    Converter, ConverterConfig, ConverterError, ErrorKind, ImageConfig, ImageConverter,
    ProgressEvent, ProgressSink, VideoConverter,
};
pub use engine::{ConversionEngine, EngineBuilder, TaskEvent, TaskHandle, TaskState};
