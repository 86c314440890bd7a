//! Error types for the processing service.
//!
//! Errors fall into three categories with different propagation policies:
//!
//! - [`ReductionError`] — per-frame failures inside the reduction pipeline.
//!   Recorded in the worker statistics; never fatal to the pipeline.
//! - [`ConfigurationError`] — invalid settings or parameter updates. Raised
//!   before any store is replaced, so the previous snapshot stays intact,
//!   and surfaced to the control client as an error envelope.
//! - [`TransportError`] — stream I/O failures. Publish failures are logged
//!   and the frame dropped; a connect failure aborts a `start()` attempt.
//!
//! Lifecycle no-ops (stopping an already stopped pipeline, starting a
//! running one) are deliberately not errors anywhere in this taxonomy.

use thiserror::Error;

/// Per-frame failures inside the frame reducer or channel lookup.
///
/// These stay local to the worker loop: the failing frame is skipped, the
/// error is recorded in [`crate::statistics::Statistics`], and processing
/// continues with the next frame.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReductionError {
    /// The configured image channel was not present in the received frame.
    #[error("channel '{0}' missing from frame")]
    MissingChannel(String),

    /// ROI rows fall outside the image.
    #[error("ROI rows [{y_min}, {y_max}) exceed image height {height}")]
    RoiOutOfBounds {
        /// First ROI row (inclusive).
        y_min: usize,
        /// Last ROI row (exclusive).
        y_max: usize,
        /// Image height after rotation.
        height: usize,
    },

    /// Energy axis length does not match the processed image width.
    #[error("energy axis has {axis} points but processed image is {width} columns wide")]
    AxisLengthMismatch {
        /// Calibration axis length.
        axis: usize,
        /// Image width after ROI/rotation.
        width: usize,
    },

    /// Rotation is not a multiple of 90 degrees.
    #[error("rotation of {0} degrees is not a multiple of 90")]
    InvalidRotation(i32),
}

/// Rejected settings or parameter updates.
///
/// Raised by validation before the parameter store is replaced; the store
/// keeps its previous snapshot on rejection.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// Configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    File(#[from] config::ConfigError),

    /// ROI bounds are not strictly ordered.
    #[error("invalid ROI: y_min {y_min} must be below y_max {y_max}")]
    InvalidRoi {
        /// First ROI row (inclusive).
        y_min: usize,
        /// Last ROI row (exclusive).
        y_max: usize,
    },

    /// Threshold bounds are inverted.
    #[error("invalid thresholds: max_threshold {max} must exceed min_threshold {min}")]
    InvalidThresholds {
        /// Lower spectrum-value bound.
        min: f64,
        /// Upper spectrum-value bound.
        max: f64,
    },

    /// Rotation is not a multiple of 90 degrees.
    #[error("rotation of {0} degrees is not a multiple of 90")]
    InvalidRotation(i32),

    /// Energy axis length does not match the expected processed width.
    #[error("energy axis has {axis} points but the processed image width is {expected}")]
    AxisLength {
        /// Calibration axis length.
        axis: usize,
        /// Expected processed image width.
        expected: usize,
    },

    /// Background rows are not all the same length.
    #[error("background image is not rectangular: row {row} has {got} columns, expected {expected}")]
    RaggedBackground {
        /// Index of the offending row.
        row: usize,
        /// Columns in that row.
        got: usize,
        /// Columns in the first row.
        expected: usize,
    },
}

/// Stream transport failures.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Could not connect to the input stream.
    #[error("failed to connect to input stream {address}: {source}")]
    Connect {
        /// Stream address.
        address: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Could not bind an output stream port.
    #[error("failed to bind output stream {address}: {source}")]
    Bind {
        /// Listen address.
        address: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Receiving from the input stream failed.
    #[error("input stream receive failed: {0}")]
    Receive(#[source] std::io::Error),

    /// A received record could not be decoded.
    #[error("failed to decode frame: {0}")]
    Decode(#[from] serde_json::Error),

    /// The in-process channel backing a stream endpoint has closed.
    #[error("stream channel closed")]
    ChannelClosed,
}
