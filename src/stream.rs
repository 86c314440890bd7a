//! Stream transport boundary.
//!
//! The worker only ever talks to [`FrameSource`] and [`RecordSink`]; the
//! concrete transport behind them is interchangeable. Three transports are
//! provided:
//!
//! - framed JSON over TCP (one record per line) for the live service,
//! - in-process channels for embedding and tests,
//! - a simulated source producing synthetic frames at a fixed rate.
//!
//! A [`StreamFactory`] bundles the endpoint construction so the manager can
//! connect a fresh set of endpoints on every `start()`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ndarray::Array2;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::TransportError;
use crate::frame::{Frame, Record};

/// Blocking source of input frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next frame; `None` when the stream has ended.
    async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError>;
}

/// Sink for published output records.
#[async_trait]
pub trait RecordSink: Send {
    /// Publish one record.
    async fn publish(&mut self, record: Record) -> Result<(), TransportError>;
}

/// Source, primary sink and optional secondary image sink for one run.
pub struct PipelineEndpoints {
    /// Input frame stream.
    pub source: Box<dyn FrameSource>,
    /// Primary output channel (full processed record).
    pub data_sink: Box<dyn RecordSink>,
    /// Optional secondary channel carrying the processed image.
    pub image_sink: Option<Box<dyn RecordSink>>,
}

/// Connects a fresh set of stream endpoints for each pipeline run.
#[async_trait]
pub trait StreamFactory: Send + Sync {
    /// Open the input stream and bind the output streams.
    async fn connect(&self) -> Result<PipelineEndpoints, TransportError>;
}

// =============================================================================
// TCP transport (framed JSON, one record per line)
// =============================================================================

/// Frame source reading line-framed JSON from a TCP connection.
pub struct TcpFrameSource {
    reader: BufReader<OwnedReadHalf>,
    // Write half kept alive so the peer does not see an early close.
    _writer: tokio::net::tcp::OwnedWriteHalf,
    line: String,
}

impl TcpFrameSource {
    /// Connect to the input stream at `address` (`host:port`).
    pub async fn connect(address: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|source| TransportError::Connect {
                address: address.to_string(),
                source,
            })?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            _writer: write_half,
            line: String::new(),
        })
    }
}

#[async_trait]
impl FrameSource for TcpFrameSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        self.line.clear();
        let read = self
            .reader
            .read_line(&mut self.line)
            .await
            .map_err(TransportError::Receive)?;

        if read == 0 {
            return Ok(None);
        }

        let frame: Frame = serde_json::from_str(self.line.trim_end())?;
        Ok(Some(frame))
    }
}

/// Publisher that binds a port and fans records out to every connected
/// client.
///
/// Records are serialized once and broadcast; a client that cannot keep up
/// skips the records it missed rather than stalling the pipeline.
pub struct TcpRecordPublisher {
    tx: broadcast::Sender<Arc<String>>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl TcpRecordPublisher {
    /// Fan-out queue depth per client before old records are skipped.
    const CLIENT_QUEUE: usize = 64;

    /// Bind `address` (`host:port`, port 0 for ephemeral) and start
    /// accepting subscribers.
    pub async fn bind(address: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| TransportError::Bind {
                address: address.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| TransportError::Bind {
            address: address.to_string(),
            source,
        })?;

        let (tx, _) = broadcast::channel(Self::CLIENT_QUEUE);
        let accept_tx = tx.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, peer)) => {
                        log::debug!("output stream subscriber connected from {}", peer);
                        tokio::spawn(serve_subscriber(socket, accept_tx.subscribe()));
                    }
                    Err(e) => {
                        log::warn!("output stream accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        });

        Ok(Self {
            tx,
            local_addr,
            accept_task,
        })
    }

    /// Address the publisher is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for TcpRecordPublisher {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_subscriber(mut socket: TcpStream, mut rx: broadcast::Receiver<Arc<String>>) {
    loop {
        match rx.recv().await {
            Ok(line) => {
                if socket.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if socket.write_all(b"\n").await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("slow output subscriber skipped {} records", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[async_trait]
impl RecordSink for TcpRecordPublisher {
    async fn publish(&mut self, record: Record) -> Result<(), TransportError> {
        let line = serde_json::to_string(&record)?;
        // No subscribers is not an error; the record is simply not observed.
        let _ = self.tx.send(Arc::new(line));
        Ok(())
    }
}

// =============================================================================
// In-process channel transport
// =============================================================================

/// Frame source backed by an in-process channel.
pub struct ChannelFrameSource {
    rx: mpsc::Receiver<Frame>,
}

impl ChannelFrameSource {
    /// Wrap a receiver; the sending side plays the role of the camera.
    pub fn new(rx: mpsc::Receiver<Frame>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl FrameSource for ChannelFrameSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

/// Record sink backed by an in-process channel.
pub struct ChannelRecordSink {
    tx: mpsc::Sender<Record>,
}

impl ChannelRecordSink {
    /// Wrap a sender; the receiving side observes the published records.
    pub fn new(tx: mpsc::Sender<Record>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl RecordSink for ChannelRecordSink {
    async fn publish(&mut self, record: Record) -> Result<(), TransportError> {
        self.tx
            .send(record)
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }
}

/// Factory handing out pre-built channel endpoints, one set per `start()`.
///
/// Used for embedding the pipeline in-process and throughout the
/// integration tests.
#[derive(Default)]
pub struct ChannelStreamFactory {
    prepared: Mutex<Vec<PipelineEndpoints>>,
}

impl ChannelStreamFactory {
    /// Empty factory; queue endpoints with [`push`](Self::push).
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one set of endpoints for the next `connect()`.
    pub async fn push(&self, endpoints: PipelineEndpoints) {
        self.prepared.lock().await.push(endpoints);
    }
}

#[async_trait]
impl StreamFactory for ChannelStreamFactory {
    async fn connect(&self) -> Result<PipelineEndpoints, TransportError> {
        self.prepared
            .lock()
            .await
            .pop()
            .ok_or(TransportError::ChannelClosed)
    }
}

// =============================================================================
// Simulated source
// =============================================================================

/// Synthetic frame source for development without a detector.
///
/// Produces uniformly random images of a fixed shape on the configured
/// image channel at a fixed rate.
pub struct SimulatedFrameSource {
    channel: String,
    height: usize,
    width: usize,
    interval: tokio::time::Interval,
    rng: SmallRng,
    pulse_id: u64,
}

impl SimulatedFrameSource {
    /// Create a source emitting `(height, width)` frames at `rate_hz`.
    pub fn new(channel: &str, height: usize, width: usize, rate_hz: f64) -> Self {
        let period = Duration::from_secs_f64(1.0 / rate_hz.max(0.1));
        Self {
            channel: channel.to_string(),
            height,
            width,
            interval: tokio::time::interval(period),
            rng: SmallRng::from_entropy(),
            pulse_id: 0,
        }
    }
}

#[async_trait]
impl FrameSource for SimulatedFrameSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        self.interval.tick().await;

        let rng = &mut self.rng;
        let image = Array2::from_shape_simple_fn((self.height, self.width), || {
            rng.gen_range(0u16..4096)
        });

        self.pulse_id += 1;
        Ok(Some(Frame::with_image(self.pulse_id, &self.channel, image)))
    }
}

// =============================================================================
// Network factory
// =============================================================================

/// Stream-endpoint settings for the live service.
#[derive(Debug, Clone)]
pub struct NetworkStreamConfig {
    /// Input stream address (`host:port`).
    pub input_address: String,
    /// Listen address for the data output stream.
    pub data_output_address: String,
    /// Listen address for the image output stream, when enabled.
    pub image_output_address: Option<String>,
    /// Replace the TCP input with the simulated source.
    pub simulate: Option<SimulationConfig>,
    /// Exact input image channel name.
    pub image_channel: String,
}

/// Shape and rate of the simulated source.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Frame height in rows.
    pub height: usize,
    /// Frame width in columns.
    pub width: usize,
    /// Frame rate in Hz.
    pub rate_hz: f64,
}

/// Factory connecting the TCP (or simulated) endpoints of the live service.
pub struct NetworkStreamFactory {
    config: NetworkStreamConfig,
}

impl NetworkStreamFactory {
    /// Factory for the given endpoint configuration.
    pub fn new(config: NetworkStreamConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StreamFactory for NetworkStreamFactory {
    async fn connect(&self) -> Result<PipelineEndpoints, TransportError> {
        let source: Box<dyn FrameSource> = match &self.config.simulate {
            Some(sim) => Box::new(SimulatedFrameSource::new(
                &self.config.image_channel,
                sim.height,
                sim.width,
                sim.rate_hz,
            )),
            None => Box::new(TcpFrameSource::connect(&self.config.input_address).await?),
        };

        let data_sink: Box<dyn RecordSink> =
            Box::new(TcpRecordPublisher::bind(&self.config.data_output_address).await?);

        let image_sink: Option<Box<dyn RecordSink>> = match &self.config.image_output_address {
            Some(address) => Some(Box::new(TcpRecordPublisher::bind(address).await?)),
            None => None,
        };

        Ok(PipelineEndpoints {
            source,
            data_sink,
            image_sink,
        })
    }
}
