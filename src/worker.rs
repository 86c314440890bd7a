//! Pipeline worker: the per-frame loop.
//!
//! One worker task lives per running period. It pulls frames from the input
//! stream, reduces each one with the latest parameter/background snapshot
//! and publishes the results. Every per-frame failure is contained here: a
//! bad frame is recorded in the statistics and the loop moves on. Only the
//! input stream ending (or failing) ends the loop on its own.
//!
//! Cancellation is cooperative: the shutdown flag is checked at the top of
//! every iteration, so at most the one in-flight frame completes after
//! `stop()` is signalled, and the rest of the input stream is not drained.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;

use crate::bridge::CalibrationBridge;
use crate::error::{ReductionError, TransportError};
use crate::frame::{ChannelNames, Frame};
use crate::parameters::ParameterUpdate;
use crate::reducer;
use crate::statistics::Statistics;
use crate::store::{BackgroundStore, ParameterStore};
use crate::stream::{FrameSource, PipelineEndpoints, RecordSink};

/// Drives frames from the input stream through the reducer to the sinks.
pub struct PipelineWorker {
    source: Box<dyn FrameSource>,
    data_sink: Box<dyn RecordSink>,
    image_sink: Option<Box<dyn RecordSink>>,
    parameters: Arc<ParameterStore>,
    background: Arc<BackgroundStore>,
    bridge: Arc<dyn CalibrationBridge>,
    names: ChannelNames,
    image_channel: String,
    stats: Statistics,
    stats_tx: watch::Sender<Statistics>,
}

impl PipelineWorker {
    /// Build a worker around freshly connected endpoints.
    pub fn new(
        endpoints: PipelineEndpoints,
        parameters: Arc<ParameterStore>,
        background: Arc<BackgroundStore>,
        bridge: Arc<dyn CalibrationBridge>,
        names: ChannelNames,
        stats_tx: watch::Sender<Statistics>,
    ) -> Self {
        let image_channel = names.image();
        Self {
            source: endpoints.source,
            data_sink: endpoints.data_sink,
            image_sink: endpoints.image_sink,
            parameters,
            background,
            bridge,
            names,
            image_channel,
            stats: Statistics::default(),
            stats_tx,
        }
    }

    /// Run until the shutdown flag is raised or the input stream ends.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), TransportError> {
        self.stats.started_at = Some(Utc::now());
        self.publish_stats();
        log::info!("pipeline worker started, image channel '{}'", self.image_channel);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = self.source.next_frame() => received,
            };

            let frame = match received {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::info!("input stream ended");
                    break;
                }
                Err(e) => {
                    log::error!("input stream failed: {}", e);
                    self.stats.last_error = Some(e.to_string());
                    self.publish_stats();
                    return Err(e);
                }
            };

            self.handle_frame(frame).await;
        }

        log::info!(
            "pipeline worker stopped after {} frames",
            self.stats.frames_received
        );
        Ok(())
    }

    async fn handle_frame(&mut self, frame: Frame) {
        self.stats.frames_received += 1;
        self.stats.last_pulse_id = Some(frame.pulse_id);
        self.stats.last_frame_at = Some(Utc::now());

        self.refresh_calibration().await;

        let Some(image) = frame.image(&self.image_channel) else {
            let err = ReductionError::MissingChannel(self.image_channel.clone());
            self.stats.frames_missed += 1;
            self.stats.last_error = Some(err.to_string());
            self.publish_stats();
            return;
        };

        // One consistent snapshot per frame; concurrent sets apply to the
        // next frame.
        let parameters = self.parameters.get();
        let background = self.background.get();

        let started = Instant::now();
        match reducer::reduce(image, &parameters, &background) {
            Ok(result) => {
                self.stats.last_duration_ms = started.elapsed().as_secs_f64() * 1e3;
                self.bridge.push_summary(&result).await;

                let record = result.to_record(&self.names, frame.pulse_id);
                match self.data_sink.publish(record).await {
                    Ok(()) => {
                        self.stats.frames_processed += 1;
                        if let Some(sink) = self.image_sink.as_mut() {
                            let image_record = result.image_record(&self.names, frame.pulse_id);
                            if let Err(e) = sink.publish(image_record).await {
                                log::warn!("image stream publish failed: {}", e);
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!(
                            "data stream publish failed, dropping frame {}: {}",
                            frame.pulse_id,
                            e
                        );
                        self.stats.frames_dropped += 1;
                        self.stats.last_error = Some(e.to_string());
                    }
                }
            }
            Err(e) => {
                log::warn!("reduction of frame {} failed: {}", frame.pulse_id, e);
                self.stats.frames_failed += 1;
                self.stats.last_error = Some(e.to_string());
            }
        }

        self.publish_stats();
    }

    /// Apply pending ROI/axis calibration from the control system before the
    /// next reduction. Invalid updates are logged and skipped, never fatal.
    async fn refresh_calibration(&mut self) {
        let update = self.bridge.poll_calibration().await;
        if update.is_empty() {
            return;
        }

        let current = self.parameters.get();
        let merged = ParameterUpdate {
            roi: update.roi,
            energy_axis: update.energy_axis,
            ..ParameterUpdate::default()
        }
        .apply_to(&current);

        match merged.validate(None) {
            Ok(()) => self.parameters.set(merged),
            Err(e) => log::warn!("ignoring calibration update from control system: {}", e),
        }
    }

    fn publish_stats(&self) {
        self.stats_tx.send_replace(self.stats.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::NoopBridge;
    use crate::parameters::Parameters;
    use crate::statistics::statistics_channel;
    use crate::stream::{ChannelFrameSource, ChannelRecordSink};
    use ndarray::Array2;
    use tokio::sync::mpsc;

    fn worker_with_channels(
        height: usize,
        width: usize,
    ) -> (
        PipelineWorker,
        mpsc::Sender<Frame>,
        mpsc::Receiver<crate::frame::Record>,
        watch::Receiver<Statistics>,
    ) {
        let (frame_tx, frame_rx) = mpsc::channel(16);
        let (record_tx, record_rx) = mpsc::channel(16);
        let (stats_tx, stats_rx) = statistics_channel();

        let endpoints = PipelineEndpoints {
            source: Box::new(ChannelFrameSource::new(frame_rx)),
            data_sink: Box::new(ChannelRecordSink::new(record_tx)),
            image_sink: None,
        };
        let worker = PipelineWorker::new(
            endpoints,
            Arc::new(ParameterStore::new(Parameters::for_detector(height, width))),
            Arc::new(BackgroundStore::new()),
            Arc::new(NoopBridge),
            ChannelNames::new("CAM01", ":FPICTURE"),
            stats_tx,
        );
        (worker, frame_tx, record_rx, stats_rx)
    }

    #[tokio::test]
    async fn frames_without_the_image_channel_are_skipped_not_fatal() {
        let (worker, frame_tx, mut record_rx, stats_rx) = worker_with_channels(4, 4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(worker.run(shutdown_rx));

        frame_tx
            .send(Frame::with_image(1, "OTHER:FPICTURE", Array2::<u16>::ones((4, 4))))
            .await
            .expect("send");
        frame_tx
            .send(Frame::with_image(2, "CAM01:FPICTURE", Array2::<u16>::ones((4, 4))))
            .await
            .expect("send");

        let record = record_rx.recv().await.expect("record");
        assert_eq!(record.pulse_id, 2);

        shutdown_tx.send_replace(true);
        task.await.expect("join").expect("worker result");

        let stats = stats_rx.borrow().clone();
        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.frames_missed, 1);
        assert_eq!(stats.frames_processed, 1);
    }

    #[tokio::test]
    async fn reduction_failures_do_not_stop_the_loop() {
        let (worker, frame_tx, mut record_rx, stats_rx) = worker_with_channels(4, 4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(worker.run(shutdown_rx));

        // Wrong width: axis-length mismatch inside the reducer.
        frame_tx
            .send(Frame::with_image(1, "CAM01:FPICTURE", Array2::<u16>::ones((4, 7))))
            .await
            .expect("send");
        frame_tx
            .send(Frame::with_image(2, "CAM01:FPICTURE", Array2::<u16>::ones((4, 4))))
            .await
            .expect("send");

        let record = record_rx.recv().await.expect("record");
        assert_eq!(record.pulse_id, 2);

        shutdown_tx.send_replace(true);
        task.await.expect("join").expect("worker result");

        let stats = stats_rx.borrow().clone();
        assert_eq!(stats.frames_failed, 1);
        assert_eq!(stats.frames_processed, 1);
        // The recorded error belongs to frame 1; frame 2 succeeded after it.
        let last_error = stats.last_error.expect("recorded error");
        assert!(last_error.contains("energy axis"));
    }

    #[tokio::test]
    async fn worker_exits_when_the_input_stream_ends() {
        let (worker, frame_tx, _record_rx, _stats_rx) = worker_with_channels(4, 4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(worker.run(shutdown_rx));

        drop(frame_tx);
        task.await.expect("join").expect("clean end");
    }
}
