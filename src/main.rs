//! Service entry point.
//!
//! Mirrors the operational surface of the detector-side deployment: the
//! input stream address and channel prefix come first, everything else has
//! defaults, and `--auto-start` brings the pipeline up without a REST call.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use specstream::bridge::NoopBridge;
use specstream::config::Settings;
use specstream::manager::ProcessingManager;
use specstream::rest;
use specstream::store::{BackgroundStore, ParameterStore};
use specstream::stream::NetworkStreamFactory;

#[derive(Parser)]
#[command(name = "specstream")]
#[command(about = "Streaming spectral reduction for 2-D detector images", long_about = None)]
struct Cli {
    /// Input stream address to process (host:port).
    input_stream: Option<String>,

    /// Settings file (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Channel-name prefix of the detector image.
    #[arg(short = 'i', long)]
    prefix: Option<String>,

    /// Suffix of the image channel.
    #[arg(long)]
    image_suffix: Option<String>,

    /// Data output stream port.
    #[arg(short = 'o', long)]
    data_output_port: Option<u16>,

    /// Image output stream port.
    #[arg(long)]
    image_output_port: Option<u16>,

    /// REST API port.
    #[arg(short = 'r', long)]
    rest_port: Option<u16>,

    /// Interface to bind the REST API on.
    #[arg(long)]
    rest_interface: Option<String>,

    /// Log level.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Start the processing as soon as the service is started.
    #[arg(long)]
    auto_start: bool,

    /// Run against the built-in simulated frame source.
    #[arg(long)]
    simulate: bool,
}

impl Cli {
    /// Fold CLI overrides into the file-based settings.
    fn apply_to(&self, settings: &mut Settings) {
        if let Some(address) = &self.input_stream {
            settings.input.stream_address = address.clone();
        }
        if let Some(prefix) = &self.prefix {
            settings.input.channel_prefix = prefix.clone();
        }
        if let Some(suffix) = &self.image_suffix {
            settings.input.image_suffix = suffix.clone();
        }
        if let Some(port) = self.data_output_port {
            settings.output.data_stream_port = port;
        }
        if let Some(port) = self.image_output_port {
            settings.output.image_stream_port = port;
        }
        if let Some(port) = self.rest_port {
            settings.rest.port = port;
        }
        if let Some(interface) = &self.rest_interface {
            settings.rest.interface = interface.clone();
        }
        if self.auto_start {
            settings.processing.auto_start = true;
        }
        if self.simulate {
            settings.input.simulate = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.log_level.as_str()),
    )
    .init();

    let mut settings = Settings::load(cli.config.as_deref())?;
    cli.apply_to(&mut settings);

    if settings.input.simulate {
        log::info!(
            "using simulated {}x{} frames at {} Hz",
            settings.processing.image_height,
            settings.processing.image_width,
            settings.input.simulate_rate_hz
        );
    } else {
        log::info!("receiving data from {}", settings.input.stream_address);
    }
    log::info!(
        "publishing processed data on port {} and images on port {}",
        settings.output.data_stream_port,
        settings.output.image_stream_port
    );
    log::info!(
        "looking for image channel '{}'",
        settings.channel_names().image()
    );

    let parameters = Arc::new(ParameterStore::new(settings.initial_parameters()));
    let background = Arc::new(BackgroundStore::new());
    let factory = Arc::new(NetworkStreamFactory::new(settings.network_config()));

    let manager = ProcessingManager::new(
        factory,
        Arc::new(NoopBridge),
        parameters,
        background,
        settings.channel_names(),
        Some(settings.detector()),
    );
    let handle = manager.spawn();

    log::info!("auto start set to {}", settings.processing.auto_start);
    if settings.processing.auto_start {
        if let Err(e) = handle.start().await {
            log::error!("auto start failed: {}", e);
        }
    }

    let rest_address = settings.rest_address();
    tokio::select! {
        result = rest::serve(&rest_address, handle.clone()) => result?,
        _ = tokio::signal::ctrl_c() => {
            log::info!("shutdown requested");
            handle.shutdown().await?;
        }
    }

    Ok(())
}
