//! # Console Monitor
//!
//! Polls the live feed on a fixed cadence and renders the newest values as a
//! log line. Polling never waits for data: when nothing was published since
//! the last poll the unchanged window is "redrawn" and only traced.

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::feed::{Channel, FeedSnapshot, LiveFeed};

/// Result of one poll
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Feed has no samples yet
    Empty,
    /// Same window as the previous poll
    Unchanged,
    /// New samples arrived; carries the rendered line
    Fresh(String),
}

/// Tracks what was drawn last
#[derive(Debug)]
pub struct Monitor {
    feed: LiveFeed,
    last_published: u64,
    frames: u64,
    fresh_frames: u64,
}

impl Monitor {
    pub fn new(feed: LiveFeed) -> Self {
        Self {
            feed,
            last_published: 0,
            frames: 0,
            fresh_frames: 0,
        }
    }

    /// Take a snapshot and render it
    pub fn poll(&mut self) -> Frame {
        let snapshot = self.feed.snapshot();
        self.frames += 1;

        if snapshot.is_empty() {
            return Frame::Empty;
        }
        if snapshot.published == self.last_published {
            return Frame::Unchanged;
        }

        let fresh = snapshot.published - self.last_published;
        self.last_published = snapshot.published;
        self.fresh_frames += 1;
        Frame::Fresh(render_line(&snapshot, fresh))
    }

    /// Total polls so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Polls that found new samples
    pub fn fresh_frames(&self) -> u64 {
        self.fresh_frames
    }

    /// Poll every `period` until `cancel` fires
    pub async fn run(mut self, period: Duration, cancel: CancellationToken) -> Self {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => match self.poll() {
                    Frame::Fresh(line) => debug!("{}", line),
                    Frame::Unchanged => trace!("No new samples; redrawing"),
                    Frame::Empty => trace!("Waiting for samples"),
                },
            }
        }

        debug!("Monitor stopped after {} frames ({} fresh)", self.frames, self.fresh_frames);
        self
    }
}

fn render_line(snapshot: &FeedSnapshot, fresh: u64) -> String {
    let time = snapshot.time.last().copied().unwrap_or_default();
    let mut line = format!("+{} t={:.2}s", fresh, time);
    for channel in Channel::ALL {
        if let Some(value) = snapshot.latest(channel) {
            line.push_str(&format!(" {}={:.2}", channel.name(), value));
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osc::decoder::decode_sample;
    use crate::sample::fixtures::telemetry_args;
    use crate::sample::TelemetrySample;

    fn sample() -> TelemetrySample {
        decode_sample("/imu", &telemetry_args([1.0, 0.0, 0.0, 0.0], 0)).unwrap()
    }

    #[test]
    fn test_poll_empty_feed() {
        let mut monitor = Monitor::new(LiveFeed::new(10));
        assert_eq!(monitor.poll(), Frame::Empty);
        assert_eq!(monitor.frames(), 1);
        assert_eq!(monitor.fresh_frames(), 0);
    }

    #[test]
    fn test_poll_detects_new_samples() {
        let feed = LiveFeed::new(10);
        let mut monitor = Monitor::new(feed.clone());

        feed.publish_at(&sample(), 1.5);
        feed.publish_at(&sample(), 2.0);

        match monitor.poll() {
            Frame::Fresh(line) => {
                assert!(line.starts_with("+2 t=2.00s"), "{}", line);
                assert!(line.contains("az=9.81"), "{}", line);
                assert!(line.contains("roll=0.00"), "{}", line);
            }
            other => panic!("expected fresh frame, got {:?}", other),
        }

        assert_eq!(monitor.poll(), Frame::Unchanged);

        feed.publish_at(&sample(), 3.0);
        assert!(matches!(monitor.poll(), Frame::Fresh(_)));
        assert_eq!(monitor.frames(), 3);
        assert_eq!(monitor.fresh_frames(), 2);
    }

    #[test]
    fn test_poll_after_eviction_still_fresh() {
        let feed = LiveFeed::new(1);
        let mut monitor = Monitor::new(feed.clone());

        feed.publish_at(&sample(), 0.0);
        assert!(matches!(monitor.poll(), Frame::Fresh(_)));

        // window length stays 1, the publish counter still moves
        feed.publish_at(&sample(), 1.0);
        assert!(matches!(monitor.poll(), Frame::Fresh(_)));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let feed = LiveFeed::new(10);
        feed.publish_at(&sample(), 0.0);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Monitor::new(feed).run(Duration::from_millis(5), cancel.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        let monitor = handle.await.unwrap();
        assert!(monitor.frames() >= 1);
        assert_eq!(monitor.fresh_frames(), 1);
    }
}
