use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mediaconv_core::{
    load_config, load_config_from_env, validate_config, ConversionEngine, ConversionOutcome,
    ConversionRequest, MediaKind, TaskEvent,
};

/// Convert one media file to another format.
#[derive(Debug, Parser)]
#[command(name = "mediaconv", version, about)]
struct Args {
    /// File to convert.
    source: PathBuf,

    /// Target extension, e.g. `.webm` or `mp3`.
    #[arg(long = "to", value_name = "EXT")]
    target: String,

    /// Configuration file (TOML). Defaults and `MEDIACONV_*` variables are
    /// used when omitted.
    #[arg(long, value_name = "FILE", env = "MEDIACONV_CONFIG")]
    config: Option<PathBuf>,

    /// Check that external tools are usable before converting.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            eprintln!("error: {:#}", e);
            std::process::exit(2);
        }
    }
}

/// Returns whether the conversion succeeded.
async fn run() -> Result<bool> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            load_config(path).with_context(|| format!("Failed to load config from {:?}", path))?
        }
        None => load_config_from_env().context("Failed to load configuration")?,
    };
    validate_config(&config).context("Configuration validation failed")?;

    let engine = ConversionEngine::new(&config);
    if args.check {
        for (kind, e) in engine.validate().await {
            warn!("{} conversions unavailable: {}", kind, e);
        }
    }

    let request = ConversionRequest::for_path(&args.source, &args.target)
        .with_context(|| format!("Cannot convert {:?}", args.source))?;
    if !request.media_kind.supports(&request.target_extension) {
        bail!(
            "{} is not a {} format; choose one of: {}",
            request.target_extension,
            request.media_kind,
            supported_list(request.media_kind)
        );
    }

    let mut handle = engine
        .submit(request)
        .context("Failed to start conversion")?;
    info!("Task {} writing {:?}", handle.id(), handle.target_path());

    while let Some(event) = handle.next_event().await {
        match event {
            TaskEvent::Progress(progress) => println!("{:>3}%", progress.percent),
            TaskEvent::Finished(ConversionOutcome::Success { resolved_path }) => {
                println!("{}", resolved_path.display());
                return Ok(true);
            }
            TaskEvent::Finished(ConversionOutcome::Failure {
                error_kind,
                message,
            }) => {
                eprintln!("conversion failed ({:?}): {}", error_kind, message);
                return Ok(false);
            }
        }
    }
    Ok(false)
}

fn supported_list(kind: MediaKind) -> String {
    kind.supported_targets().join(" ")
}
