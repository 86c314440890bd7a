//! Processing manager: the lifecycle state machine.
//!
//! The manager is an actor owning everything mutable about the service —
//! the worker task, the retained statistics and access to the parameter and
//! background stores. It runs in a dedicated task and processes
//! [`ManagerCommand`]s strictly in order, so there is exactly one
//! mutual-exclusion point for lifecycle transitions and no shared lock:
//! concurrent `start`/`stop` requests can never race two workers alive or
//! leave the state `running` with no worker.
//!
//! The worker runs under its own failure boundary. If it ends on its own
//! (input stream gone, panic), the next command reaps it: the state reverts
//! to `stopped` and the failure is recorded in the retained statistics, so
//! a worker crash never takes the control surface down.
//!
//! External components hold a cloneable [`ManagerHandle`] and never touch
//! the actor state directly.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};

use crate::bridge::CalibrationBridge;
use crate::error::{ConfigurationError, TransportError};
use crate::frame::ChannelNames;
use crate::messages::ManagerCommand;
use crate::parameters::{Background, ParameterUpdate, Parameters};
use crate::statistics::{statistics_channel, Statistics};
use crate::store::{BackgroundStore, ParameterStore};
use crate::stream::StreamFactory;
use crate::worker::PipelineWorker;

/// How long `stop()` waits for the worker before aborting it.
const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the manager command channel.
const COMMAND_QUEUE: usize = 32;

/// Lifecycle state of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    /// No worker is running.
    Stopped,
    /// A worker is pulling frames.
    Running,
}

impl std::fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingState::Stopped => write!(f, "stopped"),
            ProcessingState::Running => write!(f, "running"),
        }
    }
}

struct WorkerHandle {
    join: JoinHandle<Result<(), TransportError>>,
    shutdown_tx: watch::Sender<bool>,
    stats_rx: watch::Receiver<Statistics>,
}

/// Actor owning the service lifecycle.
pub struct ProcessingManager {
    factory: Arc<dyn StreamFactory>,
    bridge: Arc<dyn CalibrationBridge>,
    parameters: Arc<ParameterStore>,
    background: Arc<BackgroundStore>,
    names: ChannelNames,
    detector: Option<(usize, usize)>,
    worker: Option<WorkerHandle>,
    last_statistics: Statistics,
}

impl ProcessingManager {
    /// Create a manager in the `stopped` state.
    ///
    /// `detector` is the optional `(height, width)` geometry used to
    /// validate parameter updates up front.
    pub fn new(
        factory: Arc<dyn StreamFactory>,
        bridge: Arc<dyn CalibrationBridge>,
        parameters: Arc<ParameterStore>,
        background: Arc<BackgroundStore>,
        names: ChannelNames,
        detector: Option<(usize, usize)>,
    ) -> Self {
        Self {
            factory,
            bridge,
            parameters,
            background,
            names,
            detector,
            worker: None,
            last_statistics: Statistics::default(),
        }
    }

    /// Spawn the actor task and return the handle to command it.
    pub fn spawn(self) -> ManagerHandle {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        tokio::spawn(self.run(rx));
        ManagerHandle { tx }
    }

    /// Process commands until `Shutdown` or until every handle is dropped.
    pub async fn run(mut self, mut rx: mpsc::Receiver<ManagerCommand>) {
        log::info!("processing manager started");

        while let Some(command) = rx.recv().await {
            self.reap_worker().await;

            match command {
                ManagerCommand::Start { response } => {
                    let _ = response.send(self.start().await);
                }
                ManagerCommand::Stop { response } => {
                    self.stop().await;
                    let _ = response.send(ProcessingState::Stopped);
                }
                ManagerCommand::Status { response } => {
                    let _ = response.send(self.state());
                }
                ManagerCommand::GetStatistics { response } => {
                    let _ = response.send(self.statistics());
                }
                ManagerCommand::GetParameters { response } => {
                    let _ = response.send((*self.parameters.get()).clone());
                }
                ManagerCommand::SetParameters { update, response } => {
                    let _ = response.send(self.set_parameters(update));
                }
                ManagerCommand::SetBackground { background, response } => {
                    let _ = response.send(self.set_background(background));
                }
                ManagerCommand::Shutdown { response } => {
                    self.stop().await;
                    let _ = response.send(());
                    break;
                }
            }
        }

        // Command channel gone: make sure no worker outlives the manager.
        self.stop().await;
        log::info!("processing manager stopped");
    }

    fn state(&self) -> ProcessingState {
        if self.worker.is_some() {
            ProcessingState::Running
        } else {
            ProcessingState::Stopped
        }
    }

    fn statistics(&self) -> Statistics {
        match &self.worker {
            Some(handle) => handle.stats_rx.borrow().clone(),
            None => self.last_statistics.clone(),
        }
    }

    async fn start(&mut self) -> Result<ProcessingState, TransportError> {
        if self.worker.is_some() {
            log::debug!("start requested while already running");
            return Ok(ProcessingState::Running);
        }

        let endpoints = self.factory.connect().await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (stats_tx, stats_rx) = statistics_channel();

        let worker = PipelineWorker::new(
            endpoints,
            self.parameters.clone(),
            self.background.clone(),
            self.bridge.clone(),
            self.names.clone(),
            stats_tx,
        );
        let join = tokio::spawn(worker.run(shutdown_rx));

        self.worker = Some(WorkerHandle {
            join,
            shutdown_tx,
            stats_rx,
        });
        log::info!("processing started");
        Ok(ProcessingState::Running)
    }

    async fn stop(&mut self) {
        let Some(mut handle) = self.worker.take() else {
            log::debug!("stop requested while already stopped");
            return;
        };

        handle.shutdown_tx.send_replace(true);
        match tokio::time::timeout(WORKER_STOP_TIMEOUT, &mut handle.join).await {
            Ok(result) => self.record_worker_exit(result, &handle.stats_rx),
            Err(_) => {
                log::warn!(
                    "worker did not stop within {:?}, aborting",
                    WORKER_STOP_TIMEOUT
                );
                handle.join.abort();
                self.last_statistics = handle.stats_rx.borrow().clone();
                self.last_statistics.last_error =
                    Some("worker aborted after stop timeout".to_string());
            }
        }
        log::info!("processing stopped");
    }

    /// Fold a finished worker back into `stopped`, keeping its final
    /// statistics and recording how it ended.
    async fn reap_worker(&mut self) {
        let finished = self
            .worker
            .as_ref()
            .map(|handle| handle.join.is_finished())
            .unwrap_or(false);
        if !finished {
            return;
        }

        if let Some(handle) = self.worker.take() {
            log::warn!("pipeline worker exited on its own");
            let result = handle.join.await;
            self.record_worker_exit(result, &handle.stats_rx);
        }
    }

    fn record_worker_exit(
        &mut self,
        result: Result<Result<(), TransportError>, JoinError>,
        stats_rx: &watch::Receiver<Statistics>,
    ) {
        self.last_statistics = stats_rx.borrow().clone();
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.last_statistics.last_error = Some(e.to_string());
            }
            Err(e) if e.is_panic() => {
                log::error!("pipeline worker panicked");
                self.last_statistics.last_error = Some("pipeline worker panicked".to_string());
            }
            Err(_) => {
                // Cancelled by abort; the timeout path already recorded it.
            }
        }
    }

    fn set_parameters(&self, update: ParameterUpdate) -> Result<Parameters, ConfigurationError> {
        let current = self.parameters.get();
        let merged = update.apply_to(&current);
        merged.validate(self.detector)?;
        self.parameters.set(merged.clone());
        log::info!("parameters updated");
        Ok(merged)
    }

    fn set_background(&self, background: Background) -> String {
        let mut updated = (*self.parameters.get()).clone();

        if background.is_empty() {
            self.background.clear();
            updated.background = String::new();
            self.parameters.set(updated);
            log::info!("background cleared");
            "background cleared".to_string()
        } else {
            let label = background.filename.clone();
            updated.background = label.clone();
            self.background.set(background);
            self.parameters.set(updated);
            log::info!("background set to '{}'", label);
            format!("background set to '{}'", label)
        }
    }
}

/// Cloneable handle commanding the manager actor.
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    tx: mpsc::Sender<ManagerCommand>,
}

impl ManagerHandle {
    async fn dispatch<T>(
        &self,
        command: ManagerCommand,
        rx: tokio::sync::oneshot::Receiver<T>,
    ) -> Result<T> {
        self.tx
            .send(command)
            .await
            .map_err(|_| anyhow!("processing manager is not running"))?;
        rx.await.context("processing manager dropped the request")
    }

    /// Start the pipeline; idempotent while running.
    pub async fn start(&self) -> Result<ProcessingState> {
        let (cmd, rx) = ManagerCommand::start();
        self.dispatch(cmd, rx).await?.map_err(Into::into)
    }

    /// Stop the pipeline; idempotent while stopped.
    pub async fn stop(&self) -> Result<ProcessingState> {
        let (cmd, rx) = ManagerCommand::stop();
        self.dispatch(cmd, rx).await
    }

    /// Current lifecycle state.
    pub async fn status(&self) -> Result<ProcessingState> {
        let (cmd, rx) = ManagerCommand::status();
        self.dispatch(cmd, rx).await
    }

    /// Latest statistics snapshot.
    pub async fn statistics(&self) -> Result<Statistics> {
        let (cmd, rx) = ManagerCommand::get_statistics();
        self.dispatch(cmd, rx).await
    }

    /// Current parameters snapshot.
    pub async fn parameters(&self) -> Result<Parameters> {
        let (cmd, rx) = ManagerCommand::get_parameters();
        self.dispatch(cmd, rx).await
    }

    /// Apply a partial parameter update; rejected updates leave the store
    /// unchanged.
    pub async fn set_parameters(&self, update: ParameterUpdate) -> Result<Parameters> {
        let (cmd, rx) = ManagerCommand::set_parameters(update);
        self.dispatch(cmd, rx).await?.map_err(Into::into)
    }

    /// Replace or clear the background reference.
    pub async fn set_background(&self, background: Background) -> Result<String> {
        let (cmd, rx) = ManagerCommand::set_background(background);
        self.dispatch(cmd, rx).await
    }

    /// Stop the worker and end the manager actor.
    pub async fn shutdown(&self) -> Result<()> {
        let (cmd, rx) = ManagerCommand::shutdown();
        self.dispatch(cmd, rx).await
    }
}
