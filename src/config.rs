//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and field has a default, so an absent file or an empty
//! section is valid. After parsing, selected fields can be overridden from
//! the command line (see [`Overrides`]).

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, SnifferError};

/// Values given on the command line (or their environment variables) that
/// replace what the file says
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub log_file: Option<String>,
    pub capture_file: Option<String>,
    pub flush_period_ms: Option<u64>,
    pub feed_capacity: Option<usize>,
}

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// UDP listener configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ListenerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Decoded samples waiting for the consumer before the listener blocks
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Sample log configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PersistenceConfig {
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// Raw frame capture configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CaptureConfig {
    #[serde(default = "default_capture_enabled")]
    pub enabled: bool,

    #[serde(default = "default_capture_file")]
    pub capture_file: String,

    #[serde(default = "default_flush_period_ms")]
    pub flush_period_ms: u64,

    #[serde(default = "default_snaplen")]
    pub snaplen: u32,

    /// Frames waiting for the capture task before new ones are dropped
    #[serde(default = "default_frame_queue_capacity")]
    pub frame_queue_capacity: usize,
}

/// Live feed configuration
#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    #[serde(default = "default_feed_capacity")]
    pub capacity: usize,

    #[serde(default = "default_render_interval_ms")]
    pub render_interval_ms: u64,
}

/// Diagnostic logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for a daily-rolling log file; empty logs to the console only
    #[serde(default)]
    pub log_dir: String,

    #[serde(default = "default_status_interval_samples")]
    pub status_interval_samples: u64,
}

// Default value functions
fn default_bind_address() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 4000 }
fn default_queue_capacity() -> usize { 1024 }

fn default_log_file() -> String { "osc_capture.csv".to_string() }

fn default_capture_enabled() -> bool { true }
fn default_capture_file() -> String { "osc_capture.pcap".to_string() }
fn default_flush_period_ms() -> u64 { 3000 }
fn default_snaplen() -> u32 { 65535 }
fn default_frame_queue_capacity() -> usize { 4096 }

fn default_feed_capacity() -> usize { 300 }
fn default_render_interval_ms() -> u64 { 100 }

fn default_log_level() -> String { "info".to_string() }
fn default_status_interval_samples() -> u64 { 1000 }

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { log_file: default_log_file() }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: default_capture_enabled(),
            capture_file: default_capture_file(),
            flush_period_ms: default_flush_period_ms(),
            snaplen: default_snaplen(),
            frame_queue_capacity: default_frame_queue_capacity(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            capacity: default_feed_capacity(),
            render_interval_ms: default_render_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: String::new(),
            status_interval_samples: default_status_interval_samples(),
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> SnifferError {
    SnifferError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use osc_sniffer::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Build the runtime configuration: file (or defaults), then overrides,
    /// then validation
    pub fn resolve(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = fs::read_to_string(path)?;
                toml::from_str(&contents)?
            }
            None => Config::default(),
        };
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Replace every field that has an override
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(bind_address) = &overrides.bind_address {
            self.listener.bind_address = bind_address.clone();
        }
        if let Some(port) = overrides.port {
            self.listener.port = port;
        }
        if let Some(log_file) = &overrides.log_file {
            self.persistence.log_file = log_file.clone();
        }
        if let Some(capture_file) = &overrides.capture_file {
            self.capture.capture_file = capture_file.clone();
        }
        if let Some(flush_period_ms) = overrides.flush_period_ms {
            self.capture.flush_period_ms = flush_period_ms;
        }
        if let Some(capacity) = overrides.feed_capacity {
            self.feed.capacity = capacity;
        }
    }

    /// Socket address the listener binds to
    ///
    /// # Errors
    ///
    /// Returns error if `bind_address` is not an IP address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .listener
            .bind_address
            .parse()
            .map_err(|_| {
                let address = &self.listener.bind_address;
                invalid(format!("bind_address '{}' is not an IP address", address))
            })?;
        Ok(SocketAddr::new(ip, self.listener.port))
    }

    pub fn flush_period(&self) -> Duration {
        Duration::from_millis(self.capture.flush_period_ms)
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.feed.render_interval_ms)
    }

    /// Validate configuration values
    ///
    /// # Returns
    ///
    /// * `Result<()>` - Ok if valid, Err if invalid
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Listener
        self.listen_addr()?;

        if self.listener.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be greater than 0"));
        }

        // Persistence
        if self.persistence.log_file.trim().is_empty() {
            return Err(invalid("log_file cannot be empty"));
        }

        // Capture
        if self.capture.enabled {
            if self.capture.capture_file.trim().is_empty() {
                return Err(invalid("capture_file cannot be empty when capture is enabled"));
            }

            if self.capture.capture_file == self.persistence.log_file {
                return Err(invalid("capture_file and log_file must be different files"));
            }
        }

        if self.capture.flush_period_ms == 0 || self.capture.flush_period_ms > 60000 {
            return Err(invalid("flush_period_ms must be between 1 and 60000"));
        }

        if self.capture.snaplen < 64 || self.capture.snaplen > 262144 {
            return Err(invalid("snaplen must be between 64 and 262144"));
        }

        if self.capture.frame_queue_capacity == 0 {
            return Err(invalid("frame_queue_capacity must be greater than 0"));
        }

        // Feed
        if self.feed.capacity == 0 || self.feed.capacity > 100000 {
            return Err(invalid("feed capacity must be between 1 and 100000"));
        }

        if self.feed.render_interval_ms == 0 || self.feed.render_interval_ms > 10000 {
            return Err(invalid("render_interval_ms must be between 1 and 10000"));
        }

        // Logging
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid("log level must be one of: trace, debug, info, warn, error"));
        }

        if self.logging.status_interval_samples == 0 {
            return Err(invalid("status_interval_samples must be greater than 0"));
        }

        Ok(())
    }
}
