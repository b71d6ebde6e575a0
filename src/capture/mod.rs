//! # Raw Frame Capture
//!
//! Buffers received datagrams in memory and periodically flushes them to a
//! capture file.
//!
//! This module handles:
//! - O(1) buffering of frames under a lock scoped to the buffer only
//! - Swapping the pending buffer out before any disk I/O
//! - Retaining frames (in order, ahead of newer ones) when a flush fails
//! - Writing pcap records via [`pcap::PcapFileStore`]

pub mod pcap;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::Result;

/// One received UDP datagram as seen on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// Arrival time
    pub captured_at: DateTime<Utc>,
    /// Sender address
    pub source: SocketAddr,
    /// Local address the datagram was received on
    pub destination: SocketAddr,
    /// UDP payload
    pub payload: Bytes,
}

impl RawFrame {
    pub fn new(source: SocketAddr, destination: SocketAddr, payload: Bytes) -> Self {
        Self {
            captured_at: Utc::now(),
            source,
            destination,
            payload,
        }
    }
}

/// Durable sink for flushed frames.
///
/// `append` must either persist the whole batch or fail; on failure the
/// caller keeps the batch and retries it later.
#[cfg_attr(test, mockall::automock)]
pub trait FrameStore: Send {
    /// Append a batch of frames in the given order
    fn append(&mut self, frames: &[RawFrame]) -> Result<()>;
}

/// Pending frames shared between the capture task (writer) and the flusher (drainer)
#[derive(Debug, Clone, Default)]
pub struct FrameBuffer {
    pending: Arc<Mutex<Vec<RawFrame>>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RawFrame>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one frame to the pending buffer
    pub fn push(&self, frame: RawFrame) {
        self.lock().push(frame);
    }

    /// Swap the pending buffer for an empty one and return its contents
    pub fn take(&self) -> Vec<RawFrame> {
        std::mem::take(&mut *self.lock())
    }

    /// Put a batch back in front of anything buffered since it was taken
    pub fn restore(&self, mut frames: Vec<RawFrame>) {
        let mut pending = self.lock();
        frames.append(&mut pending);
        *pending = frames;
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Frame buffer plus the store it drains into
pub struct FrameCapture<S> {
    buffer: FrameBuffer,
    store: Arc<Mutex<S>>,
}

impl<S> Clone for FrameCapture<S> {
    fn clone(&self) -> Self {
        Self {
            buffer: self.buffer.clone(),
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> std::fmt::Debug for FrameCapture<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCapture")
            .field("pending", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

impl<S: FrameStore> FrameCapture<S> {
    pub fn new(store: S) -> Self {
        Self {
            buffer: FrameBuffer::new(),
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// Buffer a frame for the next flush
    pub fn buffer_frame(&self, frame: RawFrame) {
        self.buffer.push(frame);
    }

    /// Number of frames waiting for a flush
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Move every pending frame to the store.
    ///
    /// The store lock serializes flushes so batches land in the order they were
    /// taken; the buffer lock is only held for the swap. An empty buffer never
    /// touches the store.
    ///
    /// # Returns
    ///
    /// * `Result<usize>` - Number of frames written
    ///
    /// # Errors
    ///
    /// Returns the store's error; the batch is put back at the front of the
    /// buffer so the next flush retries it
    pub fn flush(&self) -> Result<usize> {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);

        let frames = self.buffer.take();
        if frames.is_empty() {
            return Ok(0);
        }

        match store.append(&frames) {
            Ok(()) => {
                debug!("Flushed {} frames", frames.len());
                Ok(frames.len())
            }
            Err(e) => {
                self.buffer.restore(frames);
                Err(e)
            }
        }
    }
}
