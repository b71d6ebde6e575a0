//! # OSC Sniffer Library
//!
//! Capture, persist and live-plot IMU telemetry streamed as OSC over UDP.
//!
//! Each datagram is decoded into a [`sample::TelemetrySample`], appended to a
//! CSV sample log and published to a bounded live feed, while the raw
//! datagrams are buffered and periodically flushed to a pcap capture file.

pub mod capture;
pub mod config;
pub mod error;
pub mod feed;
pub mod monitor;
pub mod orientation;
pub mod osc;
pub mod persistence;
pub mod pipeline;
pub mod replay;
pub mod sample;
