//! Transport error types.

use thiserror::Error;

/// Errors raised by a transport channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error from the OS, passed through unchanged.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error opening or configuring a serial port.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The channel is closed.
    #[error("not connected")]
    NotConnected,

    /// The port path could not be interpreted.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Result type alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
