//! Command types for the processing manager actor.
//!
//! Control operations are expressed as [`ManagerCommand`] values sent over
//! an mpsc channel and answered through the oneshot sender embedded in each
//! variant. The actor processes commands strictly in order, which is what
//! serializes start/stop transitions without any shared lock.
//!
//! Each variant has a helper constructor returning the command together
//! with its response receiver:
//!
//! ```rust,ignore
//! let (cmd, rx) = ManagerCommand::start();
//! cmd_tx.send(cmd).await?;
//! let state = rx.await??;
//! ```

use tokio::sync::oneshot;

use crate::error::{ConfigurationError, TransportError};
use crate::manager::ProcessingState;
use crate::parameters::{Background, ParameterUpdate, Parameters};
use crate::statistics::Statistics;

/// Commands processed sequentially by the manager actor.
#[derive(Debug)]
pub enum ManagerCommand {
    /// Launch a pipeline worker; a no-op when one is already running.
    Start {
        /// Resulting state, or the transport error that kept it stopped.
        response: oneshot::Sender<Result<ProcessingState, TransportError>>,
    },

    /// Stop the running worker; a no-op when already stopped.
    Stop {
        /// State after the transition (always `Stopped`).
        response: oneshot::Sender<ProcessingState>,
    },

    /// Report the current state without blocking on the worker.
    Status {
        /// Current state.
        response: oneshot::Sender<ProcessingState>,
    },

    /// Latest statistics snapshot (live, or retained from the last run).
    GetStatistics {
        /// Snapshot.
        response: oneshot::Sender<Statistics>,
    },

    /// Current parameters snapshot.
    GetParameters {
        /// Snapshot.
        response: oneshot::Sender<Parameters>,
    },

    /// Merge and validate a partial update, then atomically replace the
    /// parameter store.
    SetParameters {
        /// Partial update from the control surface.
        update: ParameterUpdate,
        /// The resulting parameters, or the validation rejection.
        response: oneshot::Sender<Result<Parameters, ConfigurationError>>,
    },

    /// Replace or clear the background reference.
    SetBackground {
        /// New background; empty data clears.
        background: Background,
        /// Status message for the control surface.
        response: oneshot::Sender<String>,
    },

    /// Stop any running worker and end the actor.
    Shutdown {
        /// Acknowledged once the worker is down.
        response: oneshot::Sender<()>,
    },
}

impl ManagerCommand {
    /// Build a `Start` command and its response receiver.
    pub fn start() -> (
        Self,
        oneshot::Receiver<Result<ProcessingState, TransportError>>,
    ) {
        let (response, rx) = oneshot::channel();
        (Self::Start { response }, rx)
    }

    /// Build a `Stop` command and its response receiver.
    pub fn stop() -> (Self, oneshot::Receiver<ProcessingState>) {
        let (response, rx) = oneshot::channel();
        (Self::Stop { response }, rx)
    }

    /// Build a `Status` command and its response receiver.
    pub fn status() -> (Self, oneshot::Receiver<ProcessingState>) {
        let (response, rx) = oneshot::channel();
        (Self::Status { response }, rx)
    }

    /// Build a `GetStatistics` command and its response receiver.
    pub fn get_statistics() -> (Self, oneshot::Receiver<Statistics>) {
        let (response, rx) = oneshot::channel();
        (Self::GetStatistics { response }, rx)
    }

    /// Build a `GetParameters` command and its response receiver.
    pub fn get_parameters() -> (Self, oneshot::Receiver<Parameters>) {
        let (response, rx) = oneshot::channel();
        (Self::GetParameters { response }, rx)
    }

    /// Build a `SetParameters` command and its response receiver.
    pub fn set_parameters(
        update: ParameterUpdate,
    ) -> (
        Self,
        oneshot::Receiver<Result<Parameters, ConfigurationError>>,
    ) {
        let (response, rx) = oneshot::channel();
        (Self::SetParameters { update, response }, rx)
    }

    /// Build a `SetBackground` command and its response receiver.
    pub fn set_background(background: Background) -> (Self, oneshot::Receiver<String>) {
        let (response, rx) = oneshot::channel();
        (Self::SetBackground { background, response }, rx)
    }

    /// Build a `Shutdown` command and its response receiver.
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (response, rx) = oneshot::channel();
        (Self::Shutdown { response }, rx)
    }
}
