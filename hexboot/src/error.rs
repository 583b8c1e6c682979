//! Error types for hexboot.

use std::io;
use thiserror::Error;

use crate::protocol::hex::HexError;

/// Result type for hexboot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for hexboot operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Malformed hex record in an image, with its 1-based line number.
    #[error("Invalid hex record at line {line}: {source}")]
    Hex {
        /// Line number within the image.
        line: usize,
        /// Underlying parse error.
        source: HexError,
    },

    /// Flash program-memory operation failed.
    #[error("Flash error: {0}")]
    Flash(String),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Protocol error (line never acknowledged, unexpected response).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The byte stream was closed by the other side.
    #[error("Transport disconnected")]
    Disconnected,

    /// The embedding application requested the operation to stop.
    #[error("Interrupted")]
    Interrupted,

    /// No serial port could be found.
    #[error("No serial port found")]
    DeviceNotFound,
}
