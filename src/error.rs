//! # Error Types
//!
//! Custom error types for OSC Sniffer using `thiserror`.
//!
//! Two families:
//! - [`SnifferError`]: faults that escalate to the pipeline and stop ingestion
//! - [`DecodeError`]: per-message rejections that are counted and dropped

use thiserror::Error;

/// Main error type for OSC Sniffer
#[derive(Debug, Error)]
pub enum SnifferError {
    /// Configuration errors (parsing and validation)
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Socket bind or receive failures
    #[error("Transport error: {0}")]
    Transport(String),

    /// Sample log write failures
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Raw frame capture file failures
    #[error("Capture error: {0}")]
    Capture(String),

    /// CSV encoding/decoding errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Pipeline lifecycle misuse or task failures
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons an inbound message is rejected by the sample decoder
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Datagram is not a valid OSC packet
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// Argument count differs from the telemetry layout
    #[error("expected {expected} arguments, got {found}")]
    WrongArity { expected: usize, found: usize },

    /// First argument is not a native number (control message on a shared address)
    #[error("first argument is not numeric")]
    NotTelemetry,

    /// A numeric field holds something that is not a number
    #[error("field `{field}` (argument {index}) is not numeric")]
    NonNumeric { index: usize, field: &'static str },

    /// An integer field holds a number with a fractional part
    #[error("field `{field}` (argument {index}) is not an integer")]
    NonIntegral { index: usize, field: &'static str },
}

/// Result type alias for OSC Sniffer
pub type Result<T> = std::result::Result<T, SnifferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_messages() {
        let err = DecodeError::WrongArity { expected: 24, found: 10 };
        assert_eq!(err.to_string(), "expected 24 arguments, got 10");

        let err = DecodeError::NonNumeric { index: 3, field: "az" };
        assert!(err.to_string().contains("`az`"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: SnifferError = io.into();
        assert!(matches!(err, SnifferError::Io(_)));
        assert!(err.to_string().starts_with("I/O error"));
    }
}
