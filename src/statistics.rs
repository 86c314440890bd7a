//! Pipeline statistics.
//!
//! The worker owns a mutable [`Statistics`] value and publishes a clone
//! through a `watch` channel after every frame; the manager and the control
//! surface only ever see those read-only snapshots, so reading statistics
//! never blocks the per-frame loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Counters and gauges accumulated by the pipeline worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// Frames pulled from the input stream.
    pub frames_received: u64,
    /// Frames successfully reduced and published.
    pub frames_processed: u64,
    /// Frames skipped because the image channel was absent.
    pub frames_missed: u64,
    /// Frames whose reduction failed.
    pub frames_failed: u64,
    /// Frames reduced but dropped on publish.
    pub frames_dropped: u64,
    /// Duration of the most recent reduction, in milliseconds.
    pub last_duration_ms: f64,
    /// Sequence identifier of the most recent frame.
    pub last_pulse_id: Option<u64>,
    /// Most recent per-frame error, if any.
    pub last_error: Option<String>,
    /// When the current (or last) run started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the most recent frame was received.
    pub last_frame_at: Option<DateTime<Utc>>,
}

/// Create the publisher/receiver pair the worker and manager share.
pub fn statistics_channel() -> (watch::Sender<Statistics>, watch::Receiver<Statistics>) {
    watch::channel(Statistics::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshots_are_independent_of_later_updates() {
        let (tx, rx) = statistics_channel();

        let mut stats = Statistics::default();
        stats.frames_received = 3;
        tx.send_replace(stats.clone());

        let snapshot = rx.borrow().clone();
        stats.frames_received = 9;
        tx.send_replace(stats);

        assert_eq!(snapshot.frames_received, 3);
        assert_eq!(rx.borrow().frames_received, 9);
    }

    #[test]
    fn statistics_serialize_for_the_envelope() {
        let stats = Statistics {
            frames_received: 2,
            last_error: Some("boom".into()),
            ..Statistics::default()
        };
        let json = serde_json::to_value(&stats).expect("serialize");
        assert_eq!(json["frames_received"], 2);
        assert_eq!(json["last_error"], "boom");
    }
}
