//! # Live Feed
//!
//! Fixed-capacity history of the twelve plotted channels.
//!
//! Every publish pushes one elapsed-time value and one value per channel under
//! a single lock, so the time buffer and all channel buffers always have the
//! same length. Snapshots copy the buffers out under the same lock and never
//! observe a half-applied publish.
//!
//! ```
//! use osc_sniffer::feed::{Channel, LiveFeed};
//!
//! let feed = LiveFeed::new(300);
//! let snapshot = feed.snapshot();
//! assert!(snapshot.is_empty());
//! assert_eq!(snapshot.series(Channel::Roll).count(), 0);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::orientation::to_euler;
use crate::sample::{Quaternion, TelemetrySample, Vector3};

/// Number of plotted channels
pub const CHANNEL_COUNT: usize = 12;

/// Default window length in samples
pub const DEFAULT_CAPACITY: usize = 300;

/// Plotted channels, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Ax,
    Ay,
    Az,
    Gx,
    Gy,
    Gz,
    Mx,
    My,
    Mz,
    Roll,
    Pitch,
    Yaw,
}

impl Channel {
    pub const ALL: [Channel; CHANNEL_COUNT] = [
        Channel::Ax,
        Channel::Ay,
        Channel::Az,
        Channel::Gx,
        Channel::Gy,
        Channel::Gz,
        Channel::Mx,
        Channel::My,
        Channel::Mz,
        Channel::Roll,
        Channel::Pitch,
        Channel::Yaw,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Channel::Ax => "ax",
            Channel::Ay => "ay",
            Channel::Az => "az",
            Channel::Gx => "gx",
            Channel::Gy => "gy",
            Channel::Gz => "gz",
            Channel::Mx => "mx",
            Channel::My => "my",
            Channel::Mz => "mz",
            Channel::Roll => "roll",
            Channel::Pitch => "pitch",
            Channel::Yaw => "yaw",
        }
    }
}

/// Derive the plotted values of a sample (runs the orientation conversion once)
pub fn channel_values(sample: &TelemetrySample) -> [f64; CHANNEL_COUNT] {
    plotted_values(sample.accel, sample.gyro, sample.mag, sample.orientation)
}

/// Plotted values from the raw sensor vectors and orientation quaternion
pub fn plotted_values(
    accel: Vector3,
    gyro: Vector3,
    mag: Vector3,
    q: Quaternion,
) -> [f64; CHANNEL_COUNT] {
    let euler = to_euler(q.w, q.x, q.y, q.z);
    [
        accel.x, accel.y, accel.z,
        gyro.x, gyro.y, gyro.z,
        mag.x, mag.y, mag.z,
        euler.roll, euler.pitch, euler.yaw,
    ]
}

#[derive(Debug)]
struct Window {
    capacity: usize,
    time: VecDeque<f64>,
    channels: [VecDeque<f64>; CHANNEL_COUNT],
    published: u64,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            time: VecDeque::with_capacity(capacity),
            channels: std::array::from_fn(|_| VecDeque::with_capacity(capacity)),
            published: 0,
        }
    }

    fn push(&mut self, elapsed: f64, values: [f64; CHANNEL_COUNT]) {
        if self.time.len() == self.capacity {
            self.time.pop_front();
            for channel in &mut self.channels {
                channel.pop_front();
            }
        }
        self.time.push_back(elapsed);
        for (channel, value) in self.channels.iter_mut().zip(values) {
            channel.push_back(value);
        }
        self.published += 1;
    }
}

/// Shared handle to the live window; clones see the same buffers
#[derive(Debug, Clone)]
pub struct LiveFeed {
    window: Arc<Mutex<Window>>,
    started: Instant,
}

impl LiveFeed {
    /// Create a feed holding at most `capacity` samples per channel (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            window: Arc::new(Mutex::new(Window::new(capacity.max(1)))),
            started: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Publish a sample stamped with the time since the feed was created
    pub fn publish(&self, sample: &TelemetrySample) {
        let values = channel_values(sample);
        let mut window = self.lock();
        // read the clock under the lock so concurrent publishers stay ordered
        let elapsed = self.started.elapsed().as_secs_f64();
        window.push(elapsed, values);
    }

    /// Publish a sample with an explicit elapsed time.
    ///
    /// Times earlier than the newest entry are raised to it, keeping the time
    /// axis non-decreasing.
    pub fn publish_at(&self, sample: &TelemetrySample, elapsed: f64) {
        let values = channel_values(sample);
        let mut window = self.lock();
        let elapsed = window.time.back().map_or(elapsed, |last| elapsed.max(*last));
        window.push(elapsed, values);
    }

    /// Copy out the current window
    pub fn snapshot(&self) -> FeedSnapshot {
        let window = self.lock();
        FeedSnapshot {
            time: window.time.iter().copied().collect(),
            channels: std::array::from_fn(|i| window.channels[i].iter().copied().collect()),
            published: window.published,
        }
    }
}

/// Point-in-time copy of the live window
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot {
    /// Elapsed seconds, oldest first
    pub time: Vec<f64>,
    /// Per-channel values, co-indexed with `time`
    pub channels: [Vec<f64>; CHANNEL_COUNT],
    /// Total samples ever published; unchanged between polls means nothing new
    pub published: u64,
}

impl FeedSnapshot {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Values of one channel, oldest first
    pub fn values(&self, channel: Channel) -> &[f64] {
        &self.channels[channel.index()]
    }

    /// `(elapsed, value)` pairs of one channel, oldest first
    pub fn series(&self, channel: Channel) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.time.iter().copied().zip(self.values(channel).iter().copied())
    }

    /// Most recent value of one channel
    pub fn latest(&self, channel: Channel) -> Option<f64> {
        self.values(channel).last().copied()
    }
}
