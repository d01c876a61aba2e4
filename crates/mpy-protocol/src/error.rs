//! Protocol error types.

use thiserror::Error;

/// Errors raised while interpreting device output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The raw-paste header did not start with `R`.
    #[error("unexpected raw-paste header byte 0x{0:02X}")]
    BadHeader(u8),

    /// The raw-paste header carried an unknown acceptance flag.
    #[error("unexpected raw-paste acceptance flag 0x{0:02X}")]
    BadAcceptance(u8),

    /// The device negotiated a zero-byte window.
    #[error("device negotiated an empty raw-paste window")]
    EmptyWindow,

    /// An unexpected flow-control byte arrived while streaming.
    #[error("unexpected flow-control byte 0x{0:02X}")]
    UnexpectedFlowByte(u8),

    /// A send was attempted beyond the available credit.
    #[error("credit exhausted: {requested} bytes requested, {available} available")]
    CreditExceeded {
        /// Bytes the caller tried to send.
        requested: usize,
        /// Credit remaining.
        available: usize,
    },

    /// A raw-mode result frame was malformed.
    #[error("malformed raw response: {0}")]
    MalformedResponse(String),

    /// Hex payload returned by the device did not decode.
    #[error("invalid hex from device: {0}")]
    InvalidHex(String),
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
