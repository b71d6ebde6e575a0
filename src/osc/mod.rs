//! # OSC Module
//!
//! Turns received OSC datagrams into telemetry samples.
//!
//! This module handles:
//! - Unpacking datagrams into messages (bundles are flattened in order)
//! - Validating the 24-argument telemetry layout
//! - Coercing numeric arguments into typed sample fields

pub mod decoder;
