//! Control-system bridge boundary.
//!
//! The accelerator control system owns the calibration that the stream
//! itself does not carry: the energy axis and the ROI bounds. It also wants
//! the reduced scalars back. Both directions go through this trait so the
//! pipeline never depends on a concrete control-system client; the default
//! [`NoopBridge`] supplies nothing and discards everything.

use async_trait::async_trait;

use crate::parameters::Roi;
use crate::reducer::ProcessedResult;

/// Calibration values fetched from the control system.
#[derive(Debug, Clone, Default)]
pub struct CalibrationUpdate {
    /// New energy axis, when the control system published one.
    pub energy_axis: Option<Vec<f64>>,
    /// New ROI bounds, when the control system published them.
    pub roi: Option<Roi>,
}

impl CalibrationUpdate {
    /// True when nothing changed.
    pub fn is_empty(&self) -> bool {
        self.energy_axis.is_none() && self.roi.is_none()
    }
}

/// External control-system bridge.
///
/// `poll_calibration` is consulted before each reduction; `push_summary`
/// receives the derived scalars after each successful one. Both are best
/// effort: a failing bridge never stops the pipeline.
#[async_trait]
pub trait CalibrationBridge: Send + Sync {
    /// Fetch pending calibration changes, if any.
    async fn poll_calibration(&self) -> CalibrationUpdate;

    /// Deliver the summary of one reduced frame.
    async fn push_summary(&self, result: &ProcessedResult);
}

/// Bridge used when no control system is attached.
#[derive(Debug, Default)]
pub struct NoopBridge;

#[async_trait]
impl CalibrationBridge for NoopBridge {
    async fn poll_calibration(&self) -> CalibrationUpdate {
        CalibrationUpdate::default()
    }

    async fn push_summary(&self, _result: &ProcessedResult) {}
}
