//! Processing parameters and background reference.
//!
//! [`Parameters`] is the strongly-typed record of every tunable the reducer
//! consumes. It is only ever replaced wholesale: partial updates from the
//! control surface are expressed as a [`ParameterUpdate`], merged onto the
//! current snapshot and validated *before* the store is touched, so a
//! rejected update leaves the previous snapshot in place and a concurrent
//! reader never observes a half-applied change.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Row range of the image retained before reduction, `[y_min, y_max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    /// First retained row (inclusive).
    pub y_min: usize,
    /// First excluded row (exclusive).
    pub y_max: usize,
}

impl Roi {
    /// Number of retained rows.
    pub fn height(&self) -> usize {
        self.y_max.saturating_sub(self.y_min)
    }
}

/// Current tunable settings of the reduction pipeline.
///
/// `min_threshold`/`max_threshold` bound the spectrum values admitted to the
/// centroid/FWHM computation; the reported spectrum itself is never
/// thresholded. A `max_threshold` of `0.0` disables the upper bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    /// Lower spectrum-value bound for centroid/FWHM.
    pub min_threshold: f64,
    /// Upper spectrum-value bound for centroid/FWHM; `0.0` disables it.
    pub max_threshold: f64,
    /// Image-plane rotation in degrees; must be a multiple of 90.
    pub rotation: i32,
    /// Retained row range.
    pub roi: Roi,
    /// Energy calibration, one value per processed image column.
    pub energy_axis: Vec<f64>,
    /// Advisory identifier of the active background; empty when none.
    pub background: String,
}

impl Parameters {
    /// Defaults for a detector of the given `(height, width)` geometry:
    /// full-height ROI, pixel-index energy axis, no thresholds, no rotation.
    pub fn for_detector(height: usize, width: usize) -> Self {
        Self {
            min_threshold: 0.0,
            max_threshold: 0.0,
            rotation: 0,
            roi: Roi {
                y_min: 0,
                y_max: height,
            },
            energy_axis: (0..width).map(|j| j as f64).collect(),
            background: String::new(),
        }
    }

    /// Validate the record against the optional detector geometry
    /// `(height, width)`.
    ///
    /// ROI ordering, rotation step and threshold ordering are always
    /// checked. The energy-axis length is checked here only when the
    /// geometry is known (the reducer re-checks it against the actual frame
    /// on every reduction).
    pub fn validate(&self, detector: Option<(usize, usize)>) -> Result<(), ConfigurationError> {
        if self.roi.y_min >= self.roi.y_max {
            return Err(ConfigurationError::InvalidRoi {
                y_min: self.roi.y_min,
                y_max: self.roi.y_max,
            });
        }

        if self.rotation % 90 != 0 {
            return Err(ConfigurationError::InvalidRotation(self.rotation));
        }

        if self.max_threshold != 0.0 && self.max_threshold <= self.min_threshold {
            return Err(ConfigurationError::InvalidThresholds {
                min: self.min_threshold,
                max: self.max_threshold,
            });
        }

        if let Some((height, width)) = detector {
            // Rotation by an odd multiple of 90 swaps the image axes.
            let (processed_height, processed_width) = if self.rotation_steps() % 2 == 1 {
                (width, height)
            } else {
                (height, width)
            };

            if self.roi.y_max > processed_height {
                return Err(ConfigurationError::InvalidRoi {
                    y_min: self.roi.y_min,
                    y_max: self.roi.y_max,
                });
            }

            if self.energy_axis.len() != processed_width {
                return Err(ConfigurationError::AxisLength {
                    axis: self.energy_axis.len(),
                    expected: processed_width,
                });
            }
        }

        Ok(())
    }

    /// Number of counterclockwise quarter turns in `[0, 4)`.
    pub fn rotation_steps(&self) -> u32 {
        ((self.rotation / 90).rem_euclid(4)) as u32
    }
}

/// Partial parameter update from the control surface.
///
/// Absent fields keep their current value; present fields replace it. The
/// merged record is validated as a whole before the store is replaced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterUpdate {
    /// New lower threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_threshold: Option<f64>,
    /// New upper threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_threshold: Option<f64>,
    /// New rotation in degrees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<i32>,
    /// New retained row range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roi: Option<Roi>,
    /// New energy calibration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy_axis: Option<Vec<f64>>,
    /// New advisory background identifier. The reference image itself is
    /// only ever replaced through the background store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
}

impl ParameterUpdate {
    /// Merge this update onto `current`, returning the candidate record.
    pub fn apply_to(&self, current: &Parameters) -> Parameters {
        Parameters {
            min_threshold: self.min_threshold.unwrap_or(current.min_threshold),
            max_threshold: self.max_threshold.unwrap_or(current.max_threshold),
            rotation: self.rotation.unwrap_or(current.rotation),
            roi: self.roi.unwrap_or(current.roi),
            energy_axis: self
                .energy_axis
                .clone()
                .unwrap_or_else(|| current.energy_axis.clone()),
            background: self
                .background
                .clone()
                .unwrap_or_else(|| current.background.clone()),
        }
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.min_threshold.is_none()
            && self.max_threshold.is_none()
            && self.rotation.is_none()
            && self.roi.is_none()
            && self.energy_axis.is_none()
            && self.background.is_none()
    }
}

/// Background reference image.
///
/// `data` of `None` means "no subtraction"; the filename is an advisory
/// label tracking where the image was loaded from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Background {
    /// Advisory label, typically the source filename.
    pub filename: String,
    /// Reference image matching the expected raw frame shape.
    pub data: Option<Array2<u16>>,
}

impl Background {
    /// Build a background from nested rows as received on the wire.
    ///
    /// Rows must be rectangular; an empty row list clears the background.
    pub fn from_rows(filename: String, rows: Vec<Vec<u16>>) -> Result<Self, ConfigurationError> {
        if rows.is_empty() {
            return Ok(Self {
                filename,
                data: None,
            });
        }

        let width = rows[0].len();
        for (row, values) in rows.iter().enumerate() {
            if values.len() != width {
                return Err(ConfigurationError::RaggedBackground {
                    row,
                    got: values.len(),
                    expected: width,
                });
            }
        }

        let height = rows.len();
        let flat: Vec<u16> = rows.into_iter().flatten().collect();
        let data = Array2::from_shape_vec((height, width), flat)
            .map_err(|_| ConfigurationError::RaggedBackground {
                row: 0,
                got: 0,
                expected: width,
            })?;

        Ok(Self {
            filename,
            data: Some(data),
        })
    }

    /// True when no reference image is held.
    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }
}
