//! Error types for device sessions.

use std::fmt;

use mpy_protocol::ProtocolError;
use mpy_transport::TransportError;
use thiserror::Error;

/// Errors surfaced by protocol and filesystem operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No matching response before the deadline.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The device printed error output; carries the device text verbatim.
    #[error("{0}")]
    Device(String),

    /// Unexpected bytes during a raw or raw-paste exchange.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// An operation or a response wait is already in progress.
    #[error("busy: {0}")]
    Busy(String),

    /// The transport is closed.
    #[error("not connected")]
    NotConnected,

    /// A device path exceeds the configured limit.
    #[error("path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        /// Offending path.
        path: String,
        /// Its length in bytes.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The caller cancelled a chunked read.
    #[error("operation cancelled")]
    Cancelled,

    /// The device does not have the capability required.
    #[error("not supported by device: {0}")]
    Unsupported(String),

    /// I/O failure below the protocol.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// Device output that could not be decoded.
    #[error("invalid data from device: {0}")]
    Decode(String),

    /// A malformed command from a listener.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

/// Result type alias for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

impl From<TransportError> for DeviceError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::NotConnected => DeviceError::NotConnected,
            other => DeviceError::Transport(other),
        }
    }
}

impl From<ProtocolError> for DeviceError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::InvalidHex(_) | ProtocolError::MalformedResponse(_) => {
                DeviceError::Decode(e.to_string())
            }
            other => DeviceError::ProtocolViolation(other.to_string()),
        }
    }
}

/// Coarse classification of a [`DeviceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    Device,
    ProtocolViolation,
    Busy,
    NotConnected,
    PathTooLong,
    Cancelled,
    Unsupported,
    Transport,
    Decode,
    InvalidCommand,
}

impl ErrorKind {
    /// The kind as a short name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Device => "device error",
            ErrorKind::ProtocolViolation => "protocol violation",
            ErrorKind::Busy => "busy",
            ErrorKind::NotConnected => "not connected",
            ErrorKind::PathTooLong => "path too long",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Transport => "transport error",
            ErrorKind::Decode => "decode error",
            ErrorKind::InvalidCommand => "invalid command",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DeviceError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::Timeout(_) => ErrorKind::Timeout,
            DeviceError::Device(_) => ErrorKind::Device,
            DeviceError::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            DeviceError::Busy(_) => ErrorKind::Busy,
            DeviceError::NotConnected => ErrorKind::NotConnected,
            DeviceError::PathTooLong { .. } => ErrorKind::PathTooLong,
            DeviceError::Cancelled => ErrorKind::Cancelled,
            DeviceError::Unsupported(_) => ErrorKind::Unsupported,
            DeviceError::Transport(_) => ErrorKind::Transport,
            DeviceError::Decode(_) => ErrorKind::Decode,
            DeviceError::InvalidCommand(_) => ErrorKind::InvalidCommand,
        }
    }

    /// Message for an end user.
    ///
    /// Device output is shown as-is; everything else becomes
    /// `"<operation> failed: <kind>"`.
    pub fn user_message(&self, operation: &str) -> String {
        match self {
            DeviceError::Device(text) => text.trim().to_string(),
            other => format!("{} failed: {}", operation, other.kind()),
        }
    }
}
