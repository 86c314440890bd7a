//! Named-channel frame and record types.
//!
//! Frames arrive from the input stream as a map of named channels keyed by
//! the `<prefix><suffix>` convention; the image channel is looked up by its
//! exact configured name. Processed results leave the service as [`Record`]s
//! with the same channel-map shape.

use std::collections::BTreeMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// A single value carried on a named channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ChannelValue {
    /// 2-D detector image, row-major `(height, width)`.
    Image(Array2<u16>),
    /// Scalar reading.
    Scalar(f64),
    /// 1-D numeric array (spectrum, axis, ...).
    Waveform(Vec<f64>),
    /// Serialized structured data.
    Text(String),
}

impl ChannelValue {
    /// The image payload, if this channel carries one.
    pub fn as_image(&self) -> Option<&Array2<u16>> {
        match self {
            ChannelValue::Image(image) => Some(image),
            _ => None,
        }
    }
}

/// One frame received from the input stream.
///
/// Immutable once constructed: the reducer only ever borrows the image
/// channel and the worker consumes each frame exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Sequence identifier assigned by the frame source.
    pub pulse_id: u64,
    /// Named channels; may carry auxiliary channels beyond the image.
    pub channels: BTreeMap<String, ChannelValue>,
}

impl Frame {
    /// Build a frame carrying a single image channel.
    pub fn with_image(pulse_id: u64, channel: &str, image: Array2<u16>) -> Self {
        let mut channels = BTreeMap::new();
        channels.insert(channel.to_string(), ChannelValue::Image(image));
        Self { pulse_id, channels }
    }

    /// Look up the image on the named channel, if present.
    pub fn image(&self, channel: &str) -> Option<&Array2<u16>> {
        self.channels.get(channel).and_then(ChannelValue::as_image)
    }
}

/// One record published on an output stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Sequence identifier of the frame this record was reduced from.
    pub pulse_id: u64,
    /// Named output channels.
    pub channels: BTreeMap<String, ChannelValue>,
}

impl Record {
    /// Empty record for the given pulse.
    pub fn new(pulse_id: u64) -> Self {
        Self {
            pulse_id,
            channels: BTreeMap::new(),
        }
    }

    /// Insert a channel, consuming and returning the record for chaining.
    pub fn with_channel(mut self, name: String, value: ChannelValue) -> Self {
        self.channels.insert(name, value);
        self
    }
}

/// Output-channel names derived from the configured prefix and image suffix.
#[derive(Debug, Clone)]
pub struct ChannelNames {
    prefix: String,
    image_suffix: String,
}

impl ChannelNames {
    /// Build the channel-name table for a prefix/suffix pair.
    pub fn new(prefix: &str, image_suffix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            image_suffix: image_suffix.to_string(),
        }
    }

    /// Exact name of the input (and republished) image channel.
    pub fn image(&self) -> String {
        format!("{}{}", self.prefix, self.image_suffix)
    }

    /// Serialized parameters-snapshot channel.
    pub fn processing_parameters(&self) -> String {
        format!("{}:processing_parameters", self.prefix)
    }

    /// Spectrum intensity channel.
    pub fn spectrum_y(&self) -> String {
        format!("{}:SPECTRUM_Y", self.prefix)
    }

    /// Energy-axis channel.
    pub fn spectrum_x(&self) -> String {
        format!("{}:SPECTRUM_X", self.prefix)
    }

    /// Spectrum centroid channel.
    pub fn spectrum_center(&self) -> String {
        format!("{}:SPECTRUM_CENTER", self.prefix)
    }

    /// Spectrum FWHM channel.
    pub fn spectrum_fwhm(&self) -> String {
        format!("{}:SPECTRUM_FWHM", self.prefix)
    }
}
