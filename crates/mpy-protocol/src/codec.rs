//! Line codec for Normal-mode traffic.
//!
//! Inbound bytes arrive in arbitrary chunks. The codec accumulates them and
//! releases complete lines only once the buffer ends on a line terminator,
//! so a prompt or a half-printed line is never split mid-way.

use bytes::BytesMut;

/// Size at which an unterminated buffer is flushed as a line anyway.
pub const MAX_PENDING_LINE: usize = 4096;

/// Accumulates inbound text and splits it into lines.
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
}

impl LineCodec {
    /// Create a new line codec.
    pub fn new() -> Self {
        LineCodec {
            buffer: BytesMut::with_capacity(MAX_PENDING_LINE),
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Take every complete line if the buffer ends on a terminator.
    ///
    /// Returns `None` while the buffer still holds a partial line. Empty lines
    /// are dropped. A buffer that grows past [`MAX_PENDING_LINE`] without a
    /// terminator is released as-is.
    pub fn take_lines(&mut self) -> Option<Vec<String>> {
        let last = *self.buffer.last()?;
        if !is_terminator(last) && self.buffer.len() < MAX_PENDING_LINE {
            return None;
        }

        let data = self.buffer.split();
        let text = String::from_utf8_lossy(&data);
        let lines = text
            .split(['\r', '\n'])
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Some(lines)
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Encode a Normal-mode statement for transmission.
    ///
    /// Appends the carriage return terminator.
    pub fn encode_statement(stmt: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(stmt.len() + 1);
        buf.extend_from_slice(stmt.as_bytes());
        buf.push(b'\r');
        buf
    }
}

fn is_terminator(byte: u8) -> bool {
    byte == b'\r' || byte == b'\n'
}

/// Remove the device's echo of `command` from `text`.
///
/// Only the first occurrence is removed; later repeats are real output.
pub fn strip_echo(text: &str, command: &str) -> String {
    if command.is_empty() {
        return text.to_string();
    }
    text.replacen(command, "", 1)
}
