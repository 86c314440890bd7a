//! # specstream
//!
//! Streaming spectral reduction service: continuously reduces 2-D detector
//! images arriving on a live data stream into 1-D energy spectra with
//! derived centroid/FWHM scalars, republishes the results, and exposes a
//! REST control surface to start/stop the pipeline and retune it while it
//! runs.
//!
//! ## Crate Structure
//!
//! - **`config`**: `Settings` loaded from TOML with CLI overrides.
//! - **`error`**: the `ReductionError`/`ConfigurationError`/`TransportError`
//!   taxonomy and its propagation rules.
//! - **`frame`**: named-channel `Frame`/`Record` data model.
//! - **`parameters`**: typed `Parameters` record, partial updates and the
//!   background reference.
//! - **`store`**: atomic single-value stores with snapshot reads.
//! - **`reducer`**: the pure frame-to-spectrum transform.
//! - **`statistics`**: worker counters published as read-only snapshots.
//! - **`stream`**: `FrameSource`/`RecordSink` transport boundary with TCP,
//!   in-process and simulated implementations.
//! - **`bridge`**: control-system calibration boundary.
//! - **`worker`**: the per-frame pipeline loop.
//! - **`manager`** / **`messages`**: the lifecycle actor and its command
//!   protocol.
//! - **`rest`**: the axum control surface speaking the
//!   `{state: ok|error}` envelope.

pub mod bridge;
pub mod config;
pub mod error;
pub mod frame;
pub mod manager;
pub mod messages;
pub mod parameters;
pub mod reducer;
pub mod rest;
pub mod statistics;
pub mod store;
pub mod stream;
pub mod worker;
