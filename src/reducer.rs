//! Frame reducer: raw image to spectrum, centroid and width.
//!
//! [`reduce`] is a pure transform with no state of its own. The pipeline is
//! deliberately fixed and narrow: subtract the background reference, rotate
//! by the configured quarter turns, crop to the ROI rows, collapse columns
//! into a spectrum and fit the centroid/FWHM over the energy axis. Failures
//! are typed [`ReductionError`]s; the input frame is never mutated and the
//! parameter/background stores are never touched from here.

use std::sync::Arc;

use ndarray::{s, Array2, Axis, Zip};

use crate::error::ReductionError;
use crate::frame::{ChannelNames, ChannelValue, Record};
use crate::parameters::{Background, Parameters};

/// Everything derived from one frame.
///
/// Immutable once produced. Carries the post-ROI/rotation image and the
/// exact parameters snapshot used, so a consumer can audit which settings
/// produced the numbers.
#[derive(Debug, Clone)]
pub struct ProcessedResult {
    /// Column sums of the processed image, one value per column.
    pub spectrum: Vec<f64>,
    /// Energy calibration, same length as `spectrum`.
    pub energy_axis: Vec<f64>,
    /// Intensity-weighted centroid of the spectrum along the energy axis.
    pub center: f64,
    /// Full width at half maximum of the spectrum peak, in axis units.
    pub fwhm: f64,
    /// Parameters snapshot the reduction ran with.
    pub parameters: Arc<Parameters>,
    /// The processed (post-ROI/rotation) image.
    pub image: Array2<u16>,
}

impl ProcessedResult {
    /// Assemble the primary output record.
    ///
    /// Carries exactly the published channel set: the serialized parameters
    /// snapshot, spectrum, axis, centroid, FWHM and the processed image.
    pub fn to_record(&self, names: &ChannelNames, pulse_id: u64) -> Record {
        let parameters_json =
            serde_json::to_string(self.parameters.as_ref()).unwrap_or_default();

        Record::new(pulse_id)
            .with_channel(
                names.processing_parameters(),
                ChannelValue::Text(parameters_json),
            )
            .with_channel(names.spectrum_y(), ChannelValue::Waveform(self.spectrum.clone()))
            .with_channel(
                names.spectrum_x(),
                ChannelValue::Waveform(self.energy_axis.clone()),
            )
            .with_channel(names.spectrum_center(), ChannelValue::Scalar(self.center))
            .with_channel(names.spectrum_fwhm(), ChannelValue::Scalar(self.fwhm))
            .with_channel(names.image(), ChannelValue::Image(self.image.clone()))
    }

    /// Assemble the secondary record carrying only the processed image.
    pub fn image_record(&self, names: &ChannelNames, pulse_id: u64) -> Record {
        Record::new(pulse_id).with_channel(names.image(), ChannelValue::Image(self.image.clone()))
    }
}

/// Reduce one raw frame with the given parameter/background snapshot.
pub fn reduce(
    image: &Array2<u16>,
    parameters: &Arc<Parameters>,
    background: &Background,
) -> Result<ProcessedResult, ReductionError> {
    if parameters.rotation % 90 != 0 {
        return Err(ReductionError::InvalidRotation(parameters.rotation));
    }

    let mut working = image.to_owned();

    if let Some(reference) = background.data.as_ref() {
        if reference.dim() == working.dim() {
            Zip::from(&mut working)
                .and(reference)
                .for_each(|v, &b| *v = v.saturating_sub(b));
        } else {
            log::warn!(
                "background '{}' shape {:?} does not match frame shape {:?}, skipping subtraction",
                background.filename,
                reference.dim(),
                working.dim()
            );
        }
    }

    for _ in 0..parameters.rotation_steps() {
        working = rot90(&working);
    }

    let height = working.nrows();
    let roi = parameters.roi;
    if roi.y_min >= roi.y_max || roi.y_max > height {
        return Err(ReductionError::RoiOutOfBounds {
            y_min: roi.y_min,
            y_max: roi.y_max,
            height,
        });
    }

    let cropped = working.slice(s![roi.y_min..roi.y_max, ..]);
    if cropped.ncols() != parameters.energy_axis.len() {
        return Err(ReductionError::AxisLengthMismatch {
            axis: parameters.energy_axis.len(),
            width: cropped.ncols(),
        });
    }

    let spectrum = cropped
        .fold_axis(Axis(0), 0.0f64, |acc, &v| *acc + f64::from(v))
        .to_vec();

    // Thresholds gate the fit only; the reported spectrum stays raw.
    let masked: Vec<f64> = spectrum
        .iter()
        .map(|&v| if within_thresholds(v, parameters) { v } else { 0.0 })
        .collect();

    let center = centroid(&masked, &parameters.energy_axis);
    let fwhm = full_width_half_maximum(&masked, &parameters.energy_axis);

    Ok(ProcessedResult {
        spectrum,
        energy_axis: parameters.energy_axis.clone(),
        center,
        fwhm,
        parameters: parameters.clone(),
        image: cropped.to_owned(),
    })
}

fn within_thresholds(value: f64, parameters: &Parameters) -> bool {
    if value < parameters.min_threshold {
        return false;
    }
    // A zero max_threshold leaves the upper bound open.
    parameters.max_threshold == 0.0 || value <= parameters.max_threshold
}

/// Quarter turn counterclockwise, the numpy `rot90` convention.
fn rot90(image: &Array2<u16>) -> Array2<u16> {
    image.slice(s![.., ..;-1]).t().to_owned()
}

/// Intensity-weighted centroid over `axis`; `0.0` when the total intensity
/// is zero (documented degenerate case, not an error).
fn centroid(spectrum: &[f64], axis: &[f64]) -> f64 {
    let total: f64 = spectrum.iter().sum();
    if total == 0.0 {
        return 0.0;
    }

    let weighted: f64 = spectrum.iter().zip(axis).map(|(&v, &x)| v * x).sum();
    weighted / total
}

/// Width in axis units of the contiguous region around the peak where the
/// spectrum stays at or above half the peak value.
///
/// Degenerate inputs (empty, non-positive peak, or a half-max region
/// spanning the whole spectrum) yield `0.0`.
fn full_width_half_maximum(spectrum: &[f64], axis: &[f64]) -> f64 {
    let Some((peak_index, &peak)) = spectrum
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
    else {
        return 0.0;
    };

    if peak <= 0.0 {
        return 0.0;
    }

    let half = peak / 2.0;
    let mut left = peak_index;
    while left > 0 && spectrum[left - 1] >= half {
        left -= 1;
    }
    let mut right = peak_index;
    while right + 1 < spectrum.len() && spectrum[right + 1] >= half {
        right += 1;
    }

    if left == 0 && right == spectrum.len() - 1 {
        return 0.0;
    }

    (axis[right] - axis[left]).abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::Roi;

    fn params_for(height: usize, width: usize) -> Arc<Parameters> {
        Arc::new(Parameters::for_detector(height, width))
    }

    fn ones(height: usize, width: usize) -> Array2<u16> {
        Array2::from_elem((height, width), 1)
    }

    #[test]
    fn constant_image_sums_to_height_per_column() {
        let image = ones(1024, 512);
        let result = reduce(&image, &params_for(1024, 512), &Background::default())
            .expect("reduce");

        assert_eq!(result.spectrum.len(), 512);
        assert_eq!(result.energy_axis.len(), 512);
        assert!(result.spectrum.iter().all(|&v| v == 1024.0));
    }

    #[test]
    fn input_frame_is_never_mutated() {
        let image = ones(64, 32);
        let pristine = image.clone();

        let background = Background {
            filename: "bg".into(),
            data: Some(ones(64, 32)),
        };
        let mut parameters = Parameters::for_detector(64, 32);
        parameters.rotation = 180;
        reduce(&image, &Arc::new(parameters), &background).expect("reduce");

        assert_eq!(image, pristine);
    }

    #[test]
    fn background_equal_to_frame_zeroes_the_spectrum() {
        let image = ones(128, 16);
        let background = Background {
            filename: "bg".into(),
            data: Some(image.clone()),
        };

        let result = reduce(&image, &params_for(128, 16), &background).expect("reduce");
        assert!(result.spectrum.iter().all(|&v| v == 0.0));
        assert_eq!(result.center, 0.0);
        assert_eq!(result.fwhm, 0.0);
    }

    #[test]
    fn oversized_background_saturates_at_zero() {
        let image = ones(8, 4);
        let background = Background {
            filename: "bg".into(),
            data: Some(Array2::from_elem((8, 4), 5)),
        };

        let result = reduce(&image, &params_for(8, 4), &background).expect("reduce");
        assert!(result.spectrum.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn mismatched_background_shape_is_skipped() {
        let image = ones(8, 4);
        let background = Background {
            filename: "wrong".into(),
            data: Some(ones(4, 4)),
        };

        let result = reduce(&image, &params_for(8, 4), &background).expect("reduce");
        assert!(result.spectrum.iter().all(|&v| v == 8.0));
    }

    #[test]
    fn roi_crop_limits_the_column_sums() {
        let image = ones(10, 6);
        let mut parameters = Parameters::for_detector(10, 6);
        parameters.roi = Roi { y_min: 2, y_max: 5 };

        let result = reduce(&image, &Arc::new(parameters), &Background::default())
            .expect("reduce");
        assert!(result.spectrum.iter().all(|&v| v == 3.0));
        assert_eq!(result.image.dim(), (3, 6));
    }

    #[test]
    fn roi_beyond_image_height_is_a_reduction_error() {
        let image = ones(10, 6);
        let mut parameters = Parameters::for_detector(10, 6);
        parameters.roi = Roi { y_min: 0, y_max: 11 };

        let err = reduce(&image, &Arc::new(parameters), &Background::default());
        assert!(matches!(
            err,
            Err(ReductionError::RoiOutOfBounds { y_max: 11, height: 10, .. })
        ));
    }

    #[test]
    fn axis_length_mismatch_is_a_reduction_error() {
        let image = ones(10, 6);
        let mut parameters = Parameters::for_detector(10, 6);
        parameters.energy_axis = vec![0.0; 5];

        let err = reduce(&image, &Arc::new(parameters), &Background::default());
        assert!(matches!(
            err,
            Err(ReductionError::AxisLengthMismatch { axis: 5, width: 6 })
        ));
    }

    #[test]
    fn quarter_rotation_swaps_the_image_axes() {
        // 2x3 image: [[1, 2, 3], [4, 5, 6]]
        let image = Array2::from_shape_vec((2, 3), vec![1u16, 2, 3, 4, 5, 6]).expect("shape");

        let mut parameters = Parameters::for_detector(2, 3);
        parameters.rotation = 90;
        parameters.roi = Roi { y_min: 0, y_max: 3 };
        parameters.energy_axis = vec![0.0, 1.0];

        let result = reduce(&image, &Arc::new(parameters), &Background::default())
            .expect("reduce");
        // Counterclockwise: [[3, 6], [2, 5], [1, 4]]
        assert_eq!(result.image.dim(), (3, 2));
        assert_eq!(result.image[[0, 0]], 3);
        assert_eq!(result.image[[0, 1]], 6);
        assert_eq!(result.image[[2, 0]], 1);
        assert_eq!(result.spectrum, vec![6.0, 15.0]);
    }

    #[test]
    fn full_turn_is_identity() {
        let image = Array2::from_shape_vec((2, 2), vec![1u16, 2, 3, 4]).expect("shape");
        let mut parameters = Parameters::for_detector(2, 2);
        parameters.rotation = 360;

        let result = reduce(&image, &Arc::new(parameters), &Background::default())
            .expect("reduce");
        assert_eq!(result.image, image);
    }

    #[test]
    fn thresholds_gate_the_fit_but_not_the_spectrum() {
        // Column sums: [30, 10, 30] over a 1-row ROI.
        let image = Array2::from_shape_vec((1, 3), vec![30u16, 10, 30]).expect("shape");
        let mut parameters = Parameters::for_detector(1, 3);
        parameters.min_threshold = 20.0;

        let result = reduce(&image, &Arc::new(parameters), &Background::default())
            .expect("reduce");
        // Spectrum stays raw.
        assert_eq!(result.spectrum, vec![30.0, 10.0, 30.0]);
        // The middle value is excluded from the centroid: (0*30 + 2*30)/60 = 1.
        assert_eq!(result.center, 1.0);
    }

    #[test]
    fn upper_threshold_excludes_hot_columns() {
        let image = Array2::from_shape_vec((1, 3), vec![10u16, 100, 10]).expect("shape");
        let mut parameters = Parameters::for_detector(1, 3);
        parameters.max_threshold = 50.0;

        let result = reduce(&image, &Arc::new(parameters), &Background::default())
            .expect("reduce");
        assert_eq!(result.spectrum, vec![10.0, 100.0, 10.0]);
        assert_eq!(result.center, 1.0); // (0*10 + 2*10)/20
    }

    #[test]
    fn centroid_of_empty_spectrum_is_zero() {
        let image = Array2::<u16>::zeros((4, 4));
        let result = reduce(&image, &params_for(4, 4), &Background::default()).expect("reduce");
        assert_eq!(result.center, 0.0);
        assert_eq!(result.fwhm, 0.0);
    }

    #[test]
    fn fwhm_of_a_triangular_peak() {
        let spectrum = [0.0, 1.0, 4.0, 10.0, 4.0, 1.0, 0.0];
        let axis: Vec<f64> = (0..7).map(|j| j as f64).collect();
        // Half max is 5.0; only index 3 stays at or above it.
        assert_eq!(full_width_half_maximum(&spectrum, &axis), 0.0);

        let spectrum = [0.0, 6.0, 8.0, 10.0, 8.0, 6.0, 0.0];
        // Half max 5.0; indices 1..=5 stay above, width = 5 - 1 = 4.
        assert_eq!(full_width_half_maximum(&spectrum, &axis), 4.0);
    }

    #[test]
    fn fwhm_scales_with_the_axis_units() {
        let spectrum = [0.0, 6.0, 8.0, 10.0, 8.0, 6.0, 0.0];
        let axis: Vec<f64> = (0..7).map(|j| 9100.0 + 0.5 * j as f64).collect();
        assert_eq!(full_width_half_maximum(&spectrum, &axis), 2.0);
    }

    #[test]
    fn flat_spectrum_has_zero_width() {
        let spectrum = [5.0; 8];
        let axis: Vec<f64> = (0..8).map(|j| j as f64).collect();
        assert_eq!(full_width_half_maximum(&spectrum, &axis), 0.0);
    }

    #[test]
    fn output_record_carries_exactly_the_published_channels() {
        let image = ones(16, 8);
        let result = reduce(&image, &params_for(16, 8), &Background::default()).expect("reduce");

        let names = ChannelNames::new("CAM01", ":FPICTURE");
        let record = result.to_record(&names, 42);

        let keys: Vec<&str> = record.channels.keys().map(String::as_str).collect();
        let mut expected = vec![
            "CAM01:processing_parameters",
            "CAM01:SPECTRUM_Y",
            "CAM01:SPECTRUM_X",
            "CAM01:SPECTRUM_CENTER",
            "CAM01:SPECTRUM_FWHM",
            "CAM01:FPICTURE",
        ];
        expected.sort_unstable();
        assert_eq!(keys, expected);
        assert_eq!(record.pulse_id, 42);

        // The snapshot channel is valid JSON describing the parameters used.
        let Some(ChannelValue::Text(snapshot)) =
            record.channels.get("CAM01:processing_parameters")
        else {
            panic!("missing parameters snapshot");
        };
        let decoded: Parameters = serde_json::from_str(snapshot).expect("snapshot json");
        assert_eq!(decoded.roi.y_max, 16);
    }

    #[test]
    fn image_record_carries_only_the_image() {
        let image = ones(4, 4);
        let result = reduce(&image, &params_for(4, 4), &Background::default()).expect("reduce");

        let names = ChannelNames::new("CAM01", ":FPICTURE");
        let record = result.image_record(&names, 7);
        assert_eq!(record.channels.len(), 1);
        assert!(record.channels.contains_key("CAM01:FPICTURE"));
    }
}
