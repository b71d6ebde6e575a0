//! # Pipeline Coordinator
//!
//! Owns the four concurrent activities and the hand-off between them:
//!
//! ```text
//!  UDP socket ──► listener ──(bounded queue)──► consumer ──► sample log ──► live feed
//!                    │
//!                    └──(frame queue)──► capture task ──► frame buffer ◄── flush timer ──► pcap
//! ```
//!
//! - The listener decodes every datagram; rejections are counted and dropped.
//! - The consumer runs on a blocking thread and is the only writer of the sample
//!   log, so rows land in decode order. A failed append halts ingestion.
//! - Raw frames are teed to the capture task without ever blocking the listener;
//!   if the frame queue is full the frame is dropped and counted.
//! - The flush timer drains the frame buffer to the capture file off the
//!   runtime threads; failed flushes keep their frames for the next tick.
//!
//! Every suspension point observes one [`CancellationToken`]; [`Pipeline::shutdown`]
//! cancels it, drains the queues, performs a final flush and syncs the log.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capture::pcap::PcapFileStore;
use crate::capture::{FrameCapture, FrameStore, RawFrame};
use crate::config::Config;
use crate::error::{Result, SnifferError};
use crate::feed::LiveFeed;
use crate::osc::decoder::{decode_sample, unpack_datagram};
use crate::persistence::{SampleLog, SampleSink};
use crate::sample::TelemetrySample;

/// Largest UDP payload we accept (IPv4 limit rounded up)
const MAX_DATAGRAM_LEN: usize = 65_536;

/// Shared counters, updated lock-free by the workers
#[derive(Debug, Default)]
pub struct PipelineStats {
    datagrams: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    persisted: AtomicU64,
    frames_captured: AtomicU64,
    frames_dropped: AtomicU64,
    frames_flushed: AtomicU64,
    flush_failures: AtomicU64,
}

impl PipelineStats {
    fn bump(counter: &AtomicU64, n: u64) -> u64 {
        counter.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            datagrams: self.datagrams.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_flushed: self.frames_flushed.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Datagrams received on the socket
    pub datagrams: u64,
    /// Messages decoded into samples
    pub accepted: u64,
    /// Messages (or whole datagrams) the decoder refused
    pub rejected: u64,
    /// Samples written to the log
    pub persisted: u64,
    pub frames_captured: u64,
    /// Frames lost because the capture queue was full
    pub frames_dropped: u64,
    pub frames_flushed: u64,
    pub flush_failures: u64,
}

/// Outcome of a completed shutdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stats: StatsSnapshot,
    /// Data rows in the sample log
    pub log_rows: u64,
}

/// Coordinates listener, consumer, capture and flush timer.
///
/// Start order matters: [`start_capture`](Self::start_capture) must run before
/// [`start_listening`](Self::start_listening) for datagrams to be captured.
pub struct Pipeline<S = PcapFileStore> {
    config: Config,
    cancel: CancellationToken,
    feed: LiveFeed,
    stats: Arc<PipelineStats>,
    log: Option<Box<dyn SampleSink>>,
    capture: Option<FrameCapture<S>>,
    frame_tx: Option<mpsc::Sender<RawFrame>>,
    local_addr: Option<SocketAddr>,
    listener: Option<JoinHandle<Result<()>>>,
    consumer: Option<JoinHandle<Result<Box<dyn SampleSink>>>>,
    capture_task: Option<JoinHandle<()>>,
    flush_task: Option<JoinHandle<()>>,
}

impl Pipeline<PcapFileStore> {
    /// Open the sample log and (if enabled) the capture file named in `config`
    ///
    /// # Errors
    ///
    /// Returns error if either file cannot be opened
    pub fn from_config(config: Config) -> Result<Self> {
        let log = SampleLog::init(&config.persistence.log_file)?;
        let store = if config.capture.enabled {
            Some(PcapFileStore::open(&config.capture.capture_file, config.capture.snaplen)?)
        } else {
            None
        };
        Ok(Self::new(config, log, store))
    }
}

impl<S> Pipeline<S>
where
    S: FrameStore + 'static,
{
    /// Assemble a pipeline from an initialized sample sink and an optional frame store
    pub fn new<L: SampleSink + 'static>(config: Config, log: L, store: Option<S>) -> Self {
        let feed = LiveFeed::new(config.feed.capacity);
        Self {
            config,
            cancel: CancellationToken::new(),
            feed,
            stats: Arc::new(PipelineStats::default()),
            log: Some(Box::new(log)),
            capture: store.map(FrameCapture::new),
            frame_tx: None,
            local_addr: None,
            listener: None,
            consumer: None,
            capture_task: None,
            flush_task: None,
        }
    }

    /// Handle to the live feed; clones share the same window
    pub fn feed(&self) -> LiveFeed {
        self.feed.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Address the listener is bound to, once listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Token cancelled on shutdown or when a worker hits a fatal fault
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start tapping received datagrams into the frame buffer
    ///
    /// # Errors
    ///
    /// Returns [`SnifferError::Pipeline`] if capture is disabled, already
    /// started, or the listener is already running
    pub fn start_capture(&mut self) -> Result<()> {
        let capture = self
            .capture
            .clone()
            .ok_or_else(|| SnifferError::Pipeline("capture is disabled".to_string()))?;
        if self.capture_task.is_some() {
            return Err(SnifferError::Pipeline("capture already started".to_string()));
        }
        if self.listener.is_some() {
            return Err(SnifferError::Pipeline(
                "capture must be started before the listener".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(self.config.capture.frame_queue_capacity);
        self.frame_tx = Some(tx);
        self.capture_task = Some(tokio::spawn(run_capture(capture, rx, Arc::clone(&self.stats))));

        info!("Raw frame capture started");
        Ok(())
    }

    /// Flush the frame buffer to the capture file every `period`
    ///
    /// # Errors
    ///
    /// Returns [`SnifferError::Pipeline`] if capture is disabled or the timer
    /// is already running
    pub fn start_flush_timer(&mut self, period: Duration) -> Result<()> {
        let capture = self
            .capture
            .clone()
            .ok_or_else(|| SnifferError::Pipeline("capture is disabled".to_string()))?;
        if self.flush_task.is_some() {
            return Err(SnifferError::Pipeline("flush timer already started".to_string()));
        }
        if period.is_zero() {
            return Err(SnifferError::Pipeline("flush period must be non-zero".to_string()));
        }

        self.flush_task = Some(tokio::spawn(run_flush_timer(
            capture,
            period,
            Arc::clone(&self.stats),
            self.cancel.clone(),
        )));

        info!("Flush timer started ({:?} period)", period);
        Ok(())
    }

    /// Bind the UDP socket and start the listener and consumer
    ///
    /// # Returns
    ///
    /// * `Result<SocketAddr>` - The bound address (useful with port 0)
    ///
    /// # Errors
    ///
    /// Returns [`SnifferError::Transport`] if the socket cannot be bound, or
    /// [`SnifferError::Pipeline`] if already listening
    pub async fn start_listening(&mut self) -> Result<SocketAddr> {
        let addr = self.config.listen_addr()?;
        let log = self
            .log
            .take()
            .ok_or_else(|| SnifferError::Pipeline("listener already started".to_string()))?;

        let bound = UdpSocket::bind(addr)
            .await
            .and_then(|socket| Ok((socket.local_addr()?, socket)));
        let (local, socket) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                self.log = Some(log);
                return Err(SnifferError::Transport(format!("Failed to bind {}: {}", addr, e)));
            }
        };

        let (sample_tx, sample_rx) = mpsc::channel(self.config.listener.queue_capacity);

        let consumer = Consumer {
            log,
            feed: self.feed.clone(),
            stats: Arc::clone(&self.stats),
            cancel: self.cancel.clone(),
            status_interval: self.config.logging.status_interval_samples.max(1),
        };
        self.consumer = Some(tokio::task::spawn_blocking(move || consumer.run(sample_rx)));

        let listener = Listener {
            socket,
            local,
            destinations: DestinationResolver::new(local),
            samples: sample_tx,
            frames: self.frame_tx.clone(),
            stats: Arc::clone(&self.stats),
            cancel: self.cancel.clone(),
        };
        self.listener = Some(tokio::spawn(listener.run()));
        self.local_addr = Some(local);

        info!("Listening for OSC on udp://{}", local);
        Ok(local)
    }

    /// Stop every activity, flush buffered frames and sync the log.
    ///
    /// Samples already queued are persisted before the consumer exits.
    ///
    /// # Returns
    ///
    /// * `Result<ShutdownReport>` - Final counters and log size
    ///
    /// # Errors
    ///
    /// Returns the first fault seen: a worker's fatal error, a failed final
    /// flush, or a failed log sync
    pub async fn shutdown(mut self) -> Result<ShutdownReport> {
        info!("Shutting down pipeline");
        self.cancel.cancel();

        let mut first_error = None;

        if let Some(handle) = self.listener.take() {
            keep_first(&mut first_error, join(handle).await.and_then(|r| r));
        }

        // listener is gone; dropping the last frame sender lets the capture task drain
        self.frame_tx = None;

        let mut log_rows = 0;
        if let Some(handle) = self.consumer.take() {
            match join(handle).await.and_then(|r| r) {
                Ok(log) => log_rows = log.rows(),
                Err(e) => keep_first(&mut first_error, Err(e)),
            }
        }
        if let Some(mut log) = self.log.take() {
            keep_first(&mut first_error, log.sync());
            log_rows = log.rows();
        }

        if let Some(handle) = self.capture_task.take() {
            keep_first(&mut first_error, join(handle).await);
        }
        if let Some(handle) = self.flush_task.take() {
            keep_first(&mut first_error, join(handle).await);
        }

        if let Some(capture) = self.capture.take() {
            let result = flush_capture(&capture, &self.stats).await.map(|_| ());
            if capture.pending() > 0 {
                error!("{} captured frames could not be written", capture.pending());
            }
            keep_first(&mut first_error, result);
        }

        let report = ShutdownReport {
            stats: self.stats.snapshot(),
            log_rows,
        };
        info!(
            "Pipeline stopped: {} datagrams, {} accepted, {} rejected, {} persisted, \
             {} frames flushed",
            report.stats.datagrams,
            report.stats.accepted,
            report.stats.rejected,
            report.stats.persisted,
            report.stats.frames_flushed
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

impl<S> Drop for Pipeline<S> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn keep_first(slot: &mut Option<SnifferError>, result: Result<()>) {
    if let Err(e) = result {
        if slot.is_none() {
            *slot = Some(e);
        } else {
            debug!("Suppressed secondary shutdown error: {}", e);
        }
    }
}

async fn join<T>(handle: JoinHandle<T>) -> Result<T> {
    handle
        .await
        .map_err(|e| SnifferError::Pipeline(format!("worker task failed: {}", e)))
}

struct Listener {
    socket: UdpSocket,
    local: SocketAddr,
    destinations: DestinationResolver,
    samples: mpsc::Sender<Arc<TelemetrySample>>,
    frames: Option<mpsc::Sender<RawFrame>>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
}

impl Listener {
    async fn run(mut self) -> Result<()> {
        let result = self.receive_loop().await;
        if let Err(e) = &result {
            error!("Listener stopped: {}", e);
            self.cancel.cancel();
        }
        debug!("Listener exited");
        result
    }

    async fn receive_loop(&mut self) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

        loop {
            let (len, source) = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) if is_transient(&e) => {
                        debug!("Ignoring transient receive error: {}", e);
                        continue;
                    }
                    Err(e) => {
                        return Err(SnifferError::Transport(format!(
                            "Receive on {} failed: {}", self.local, e
                        )));
                    }
                },
            };

            PipelineStats::bump(&self.stats.datagrams, 1);
            let datagram = Bytes::copy_from_slice(&buf[..len]);

            if let Some(frames) = &self.frames {
                let destination = self.destinations.resolve(source);
                let frame = RawFrame::new(source, destination, datagram.clone());
                if frames.try_send(frame).is_err() {
                    PipelineStats::bump(&self.stats.frames_dropped, 1);
                }
            }

            if !self.dispatch(&datagram, source).await {
                // consumer is gone; it has already reported why
                return Ok(());
            }
        }
    }

    /// Decode a datagram and queue its samples; false once the consumer has stopped
    async fn dispatch(&self, datagram: &[u8], source: SocketAddr) -> bool {
        let messages = match unpack_datagram(datagram) {
            Ok(messages) => messages,
            Err(e) => {
                PipelineStats::bump(&self.stats.rejected, 1);
                debug!("Rejected datagram from {}: {}", source, e);
                return true;
            }
        };

        for message in messages {
            match decode_sample(&message.addr, &message.args) {
                Ok(sample) => {
                    PipelineStats::bump(&self.stats.accepted, 1);
                    // blocks while the queue is full, pushing back onto the socket buffer
                    if self.samples.send(Arc::new(sample)).await.is_err() {
                        return false;
                    }
                }
                Err(e) => {
                    PipelineStats::bump(&self.stats.rejected, 1);
                    debug!("Rejected {} from {}: {}", message.addr, source, e);
                }
            }
        }
        true
    }
}

/// Maps each sender to the local address its datagrams arrive on.
///
/// A socket bound to a specific address always receives on it. A wildcard
/// bind is narrowed per peer to the interface address the kernel routes that
/// peer through, looked up once per peer IP.
#[derive(Debug)]
struct DestinationResolver {
    local: SocketAddr,
    routes: HashMap<IpAddr, IpAddr>,
}

impl DestinationResolver {
    fn new(local: SocketAddr) -> Self {
        Self {
            local,
            routes: HashMap::new(),
        }
    }

    fn resolve(&mut self, source: SocketAddr) -> SocketAddr {
        if !self.local.ip().is_unspecified() {
            return self.local;
        }

        let local = self.local;
        let ip = *self.routes.entry(source.ip()).or_insert_with(|| {
            route_local_ip(local.ip(), source).unwrap_or_else(|e| {
                warn!(
                    "No route back to {}, recording {} as destination: {}",
                    source,
                    local.ip(),
                    e
                );
                local.ip()
            })
        });
        SocketAddr::new(ip, local.port())
    }
}

/// Local address the kernel picks to reach `peer` (connecting UDP sends nothing)
fn route_local_ip(wildcard: IpAddr, peer: SocketAddr) -> std::io::Result<IpAddr> {
    let bind: SocketAddr = match wildcard {
        IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = std::net::UdpSocket::bind(bind)?;
    socket.connect(peer)?;
    Ok(socket.local_addr()?.ip())
}

/// Errors a UDP receive can report for earlier traffic (ICMP feedback) or signals
fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::Interrupted
    )
}

struct Consumer {
    log: Box<dyn SampleSink>,
    feed: LiveFeed,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
    status_interval: u64,
}

impl Consumer {
    /// Persist then publish each sample until the listener hangs up
    fn run(
        mut self,
        mut samples: mpsc::Receiver<Arc<TelemetrySample>>,
    ) -> Result<Box<dyn SampleSink>> {
        while let Some(sample) = samples.blocking_recv() {
            if let Err(e) = self.log.append(&sample) {
                error!("Halting ingestion: {}", e);
                self.cancel.cancel();
                return Err(e);
            }
            self.feed.publish(&sample);

            let persisted = PipelineStats::bump(&self.stats.persisted, 1);
            if persisted % self.status_interval == 0 {
                let stats = self.stats.snapshot();
                info!(
                    "Persisted {} samples ({} rejected, {} frames flushed, {} frames dropped)",
                    persisted, stats.rejected, stats.frames_flushed, stats.frames_dropped
                );
            }
        }

        if let Err(e) = self.log.sync() {
            self.cancel.cancel();
            return Err(e);
        }
        debug!("Consumer exited after {} rows", self.log.rows());
        Ok(self.log)
    }
}

async fn run_capture<S: FrameStore + 'static>(
    capture: FrameCapture<S>,
    mut frames: mpsc::Receiver<RawFrame>,
    stats: Arc<PipelineStats>,
) {
    while let Some(frame) = frames.recv().await {
        capture.buffer_frame(frame);
        PipelineStats::bump(&stats.frames_captured, 1);
    }
    debug!("Capture task exited");
}

async fn run_flush_timer<S: FrameStore + 'static>(
    capture: FrameCapture<S>,
    period: Duration,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                // failures are logged inside and retried next tick
                let _ = flush_capture(&capture, &stats).await;
            }
        }
    }
    debug!("Flush timer exited");
}

/// Run one flush on the blocking pool and account for it
async fn flush_capture<S: FrameStore + 'static>(
    capture: &FrameCapture<S>,
    stats: &PipelineStats,
) -> Result<usize> {
    let worker = capture.clone();
    let result = join(tokio::task::spawn_blocking(move || worker.flush()))
        .await
        .and_then(|r| r);

    match &result {
        Ok(0) => {}
        Ok(n) => {
            PipelineStats::bump(&stats.frames_flushed, *n as u64);
            debug!("Flushed {} frames to capture file", n);
        }
        Err(e) => {
            PipelineStats::bump(&stats.flush_failures, 1);
            warn!("Capture flush failed, {} frames retained: {}", capture.pending(), e);
        }
    }
    result
}
