//! Raw-paste flow control.
//!
//! Raw-paste is a binary sub-mode of raw mode. After the host sends
//! `0x05 'A' 0x01`, the device answers with a header:
//!
//! ```text
//! +------+------+--------+--------+
//! | 'R'  | 0x01 | win_lo | win_hi |   accepted, window size follows
//! +------+------+--------+--------+
//! | 'R'  | 0x00 |                     refused, use plain raw mode
//! +------+------+
//! ```
//!
//! The window is the initial credit. Every `0x01` from the device adds one
//! more window; `0x04` means the device stopped receiving. The host must
//! never have more bytes outstanding than the credit it holds, or the
//! device's receive buffer overflows.

use crate::constants::*;
use crate::error::{ProtocolError, ProtocolResult};

/// Decoded raw-paste header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawPasteHeader {
    /// Device accepted raw-paste with the given window size in bytes.
    Accepted {
        /// Window size, also the initial credit.
        window: u16,
    },
    /// Device refused raw-paste.
    Refused,
}

impl RawPasteHeader {
    /// Try to decode a header from the front of `buf`.
    ///
    /// Returns `Ok(Some((header, consumed)))` once enough bytes are present,
    /// `Ok(None)` if more data is needed.
    pub fn decode(buf: &[u8]) -> ProtocolResult<Option<(RawPasteHeader, usize)>> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };
        if first != RAW_PASTE_ACK {
            return Err(ProtocolError::BadHeader(first));
        }
        let Some(&flag) = buf.get(1) else {
            return Ok(None);
        };
        match flag {
            RAW_PASTE_REFUSED => Ok(Some((RawPasteHeader::Refused, 2))),
            RAW_PASTE_ACCEPTED => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                let window = u16::from_le_bytes([buf[2], buf[3]]);
                if window == 0 {
                    return Err(ProtocolError::EmptyWindow);
                }
                Ok(Some((RawPasteHeader::Accepted { window }, 4)))
            }
            other => Err(ProtocolError::BadAcceptance(other)),
        }
    }
}

/// What a single flow-control byte from the device means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEvent {
    /// One more window of credit was granted.
    Credit,
    /// The device has stopped receiving.
    End,
}

/// Window credit accounting for one raw-paste session.
#[derive(Debug, Clone)]
pub struct CreditWindow {
    window: usize,
    credit: usize,
    granted: u64,
    sent: u64,
}

impl CreditWindow {
    /// Start a session with the negotiated window as initial credit.
    pub fn new(window: u16) -> Self {
        CreditWindow {
            window: window as usize,
            credit: window as usize,
            granted: window as u64,
            sent: 0,
        }
    }

    /// Negotiated window size.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Credit currently available.
    pub fn available(&self) -> usize {
        self.credit
    }

    /// Total credit granted so far, including the initial window.
    pub fn total_granted(&self) -> u64 {
        self.granted
    }

    /// Total bytes sent so far.
    pub fn total_sent(&self) -> u64 {
        self.sent
    }

    /// Apply a credit grant.
    pub fn grant(&mut self) {
        self.credit += self.window;
        self.granted += self.window as u64;
    }

    /// Record `n` bytes as sent.
    pub fn consume(&mut self, n: usize) -> ProtocolResult<()> {
        if n > self.credit {
            return Err(ProtocolError::CreditExceeded {
                requested: n,
                available: self.credit,
            });
        }
        self.credit -= n;
        self.sent += n as u64;
        Ok(())
    }

    /// Interpret a flow-control byte, granting credit when appropriate.
    pub fn on_flow_byte(&mut self, byte: u8) -> ProtocolResult<FlowEvent> {
        match byte {
            RAW_PASTE_CREDIT => {
                self.grant();
                Ok(FlowEvent::Credit)
            }
            RAW_PASTE_END => Ok(FlowEvent::End),
            other => Err(ProtocolError::UnexpectedFlowByte(other)),
        }
    }
}

/// Cursor over a payload being streamed under a [`CreditWindow`].
#[derive(Debug)]
pub struct RawPasteSender<'a> {
    payload: &'a [u8],
    offset: usize,
    window: CreditWindow,
}

impl<'a> RawPasteSender<'a> {
    /// Create a sender for `payload` with the negotiated window.
    pub fn new(payload: &'a [u8], window: u16) -> Self {
        RawPasteSender {
            payload,
            offset: 0,
            window: CreditWindow::new(window),
        }
    }

    /// Take the next slice that fits within the current credit.
    ///
    /// Returns `None` when nothing can be sent: either the payload is done
    /// or the credit is exhausted.
    pub fn next_chunk(&mut self) -> Option<&'a [u8]> {
        let n = self.window.available().min(self.remaining());
        if n == 0 {
            return None;
        }
        // n <= available, consume cannot fail
        self.window.consume(n).ok()?;
        let chunk = &self.payload[self.offset..self.offset + n];
        self.offset += n;
        Some(chunk)
    }

    /// Interpret a flow-control byte from the device.
    pub fn on_flow_byte(&mut self, byte: u8) -> ProtocolResult<FlowEvent> {
        self.window.on_flow_byte(byte)
    }

    /// Bytes not yet sent.
    pub fn remaining(&self) -> usize {
        self.payload.len() - self.offset
    }

    /// Bytes sent so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Whether every payload byte has been sent.
    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    /// Credit accounting for this session.
    pub fn window(&self) -> &CreditWindow {
        &self.window
    }
}
