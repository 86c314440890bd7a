//! Configuration management.
//!
//! Settings come from an optional TOML file with sane defaults for every
//! field, so the service also starts bare. The CLI may override individual
//! fields afterwards (see `main.rs`).

use std::path::Path;

use config::Config;
use serde::Deserialize;

use crate::error::ConfigurationError;
use crate::frame::ChannelNames;
use crate::parameters::Parameters;
use crate::stream::{NetworkStreamConfig, SimulationConfig};

/// Service settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Input stream and channel naming.
    pub input: InputSettings,
    /// Output stream endpoints.
    pub output: OutputSettings,
    /// REST control surface endpoint.
    pub rest: RestSettings,
    /// Pipeline behavior and detector geometry.
    pub processing: ProcessingSettings,
}

/// Input stream and channel naming.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InputSettings {
    /// Input stream address (`host:port`).
    pub stream_address: String,
    /// Channel-name prefix of the detector.
    pub channel_prefix: String,
    /// Suffix of the image channel, appended to the prefix.
    pub image_suffix: String,
    /// Replace the input stream with the simulated source.
    pub simulate: bool,
    /// Frame rate of the simulated source.
    pub simulate_rate_hz: f64,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            stream_address: "127.0.0.1:8888".to_string(),
            channel_prefix: "CAM01".to_string(),
            image_suffix: ":FPICTURE".to_string(),
            simulate: false,
            simulate_rate_hz: 10.0,
        }
    }
}

/// Output stream endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Interface the output streams bind on.
    pub bind_interface: String,
    /// Port of the data output stream.
    pub data_stream_port: u16,
    /// Port of the image output stream.
    pub image_stream_port: u16,
    /// Publish the secondary image stream at all.
    pub send_image_stream: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            bind_interface: "0.0.0.0".to_string(),
            data_stream_port: 8889,
            image_stream_port: 8890,
            send_image_stream: true,
        }
    }
}

/// REST control surface endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RestSettings {
    /// Interface to bind the REST API on.
    pub interface: String,
    /// REST API port.
    pub port: u16,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            interface: "0.0.0.0".to_string(),
            port: 12000,
        }
    }
}

/// Pipeline behavior and detector geometry.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    /// Start the pipeline as soon as the service is up.
    pub auto_start: bool,
    /// Detector image height in rows.
    pub image_height: usize,
    /// Detector image width in columns.
    pub image_width: usize,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            auto_start: false,
            image_height: 1024,
            image_width: 512,
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file; absent file fields keep
    /// their defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Output-channel naming table.
    pub fn channel_names(&self) -> ChannelNames {
        ChannelNames::new(&self.input.channel_prefix, &self.input.image_suffix)
    }

    /// Detector geometry as `(height, width)`.
    pub fn detector(&self) -> (usize, usize) {
        (self.processing.image_height, self.processing.image_width)
    }

    /// Initial parameters for the configured detector.
    pub fn initial_parameters(&self) -> Parameters {
        Parameters::for_detector(self.processing.image_height, self.processing.image_width)
    }

    /// Stream-endpoint configuration for the network factory.
    pub fn network_config(&self) -> NetworkStreamConfig {
        NetworkStreamConfig {
            input_address: self.input.stream_address.clone(),
            data_output_address: format!(
                "{}:{}",
                self.output.bind_interface, self.output.data_stream_port
            ),
            image_output_address: self.output.send_image_stream.then(|| {
                format!(
                    "{}:{}",
                    self.output.bind_interface, self.output.image_stream_port
                )
            }),
            simulate: self.input.simulate.then(|| SimulationConfig {
                height: self.processing.image_height,
                width: self.processing.image_width,
                rate_hz: self.input.simulate_rate_hz,
            }),
            image_channel: self.channel_names().image(),
        }
    }

    /// REST bind address.
    pub fn rest_address(&self) -> String {
        format!("{}:{}", self.rest.interface, self.rest.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_cover_every_section() {
        let settings: Settings = toml::from_str("").expect("empty settings");
        assert_eq!(settings.input.stream_address, "127.0.0.1:8888");
        assert_eq!(settings.output.data_stream_port, 8889);
        assert_eq!(settings.rest.port, 12000);
        assert!(!settings.processing.auto_start);
        assert_eq!(settings.detector(), (1024, 512));
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let toml_str = r#"
            [input]
            channel_prefix = "SPEC02"
            simulate = true

            [processing]
            auto_start = true
        "#;
        let settings: Settings = toml::from_str(toml_str).expect("parse");

        assert_eq!(settings.input.channel_prefix, "SPEC02");
        assert!(settings.processing.auto_start);
        // Untouched sections keep their defaults.
        assert_eq!(settings.input.image_suffix, ":FPICTURE");
        assert_eq!(settings.output.image_stream_port, 8890);
        assert_eq!(settings.channel_names().image(), "SPEC02:FPICTURE");
    }

    #[test]
    fn network_config_reflects_the_image_stream_switch() {
        let mut settings = Settings::default();
        settings.output.send_image_stream = false;
        assert!(settings.network_config().image_output_address.is_none());

        settings.output.send_image_stream = true;
        let network = settings.network_config();
        assert_eq!(network.image_output_address.as_deref(), Some("0.0.0.0:8890"));
        assert!(network.simulate.is_none());
    }

    #[test]
    fn load_reads_a_toml_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").expect("tempfile");
        writeln!(file, "[rest]\nport = 9000").expect("write");

        let settings = Settings::load(Some(file.path())).expect("load");
        assert_eq!(settings.rest.port, 9000);
        assert_eq!(settings.rest_address(), "0.0.0.0:9000");
    }

    #[test]
    fn missing_file_is_a_configuration_error() {
        let err = Settings::load(Some(Path::new("/nonexistent/specstream.toml")));
        assert!(matches!(err, Err(ConfigurationError::File(_))));
    }
}
