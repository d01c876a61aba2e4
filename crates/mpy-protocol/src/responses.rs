//! Parsing of device output.
//!
//! Two shapes of output are understood here:
//! - The listing printed by the `ls` helper: `path mode size ,` repeated.
//! - Raw-mode result frames: `OK`, stdout, `0x04`, stderr, `0x04`, `>`.

use std::fmt;

use crate::constants::*;
use crate::error::{ProtocolError, ProtocolResult};

/// Kind of a directory entry, from the `stat` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Anything else; carries the raw mode.
    Other(u32),
}

impl EntryKind {
    /// Classify a `stat` mode value.
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFREG => EntryKind::File,
            S_IFDIR => EntryKind::Dir,
            _ => EntryKind::Other(mode),
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::File => f.write_str("file"),
            EntryKind::Dir => f.write_str("dir"),
            EntryKind::Other(mode) => write!(f, "{}", mode),
        }
    }
}

/// One entry of a device directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Full device path.
    pub path: String,
    /// Entry kind.
    pub kind: EntryKind,
    /// Size in bytes.
    pub size: u64,
}

/// Parse the output of the `ls` helper.
///
/// Fragments are split on `,` and then on whitespace. Fragments that do not
/// carry a path, a numeric mode and a numeric size (the trailing prompt, a
/// stray echo) are discarded.
pub fn parse_listing(text: &str) -> Vec<DirEntry> {
    text.split(',')
        .filter_map(|fragment| {
            let parts: Vec<&str> = fragment.split_whitespace().collect();
            if parts.len() < 3 {
                return None;
            }
            let (Ok(mode), Ok(size)) = (parts[1].parse::<u32>(), parts[2].parse::<u64>()) else {
                log::trace!("discarding malformed listing fragment {:?}", fragment);
                return None;
            };
            Some(DirEntry {
                path: parts[0].to_string(),
                kind: EntryKind::from_mode(mode),
                size,
            })
        })
        .collect()
}

/// Ensure a directory path ends with `/`.
pub fn normalize_dir(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// Output of one raw-mode execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResponse {
    /// Bytes printed to stdout.
    pub stdout: Vec<u8>,
    /// Bytes printed to stderr; non-empty means the script raised.
    pub stderr: Vec<u8>,
}

impl RawResponse {
    /// Split a result frame into stdout and stderr.
    ///
    /// `frame` is everything the device sent before the final `0x04 >`,
    /// optionally starting with the `OK` acknowledgement (absent after
    /// raw-paste).
    pub fn parse(frame: &[u8]) -> ProtocolResult<RawResponse> {
        RawResponse::parse_body(frame.strip_prefix(RAW_EXEC_ACK).unwrap_or(frame))
    }

    /// Split a frame that carries no acknowledgement, as sent after raw-paste.
    pub fn parse_body(body: &[u8]) -> ProtocolResult<RawResponse> {
        let split = body.iter().position(|&b| b == CTRL_EOT).ok_or_else(|| {
            ProtocolError::MalformedResponse(format!(
                "missing stdout terminator in {:?}",
                String::from_utf8_lossy(body)
            ))
        })?;
        Ok(RawResponse {
            stdout: body[..split].to_vec(),
            stderr: body[split + 1..].to_vec(),
        })
    }

    /// Whether the device reported an exception.
    pub fn is_error(&self) -> bool {
        !self.stderr.is_empty()
    }

    /// stdout decoded lossily as text.
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// stderr decoded lossily as text.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// Decode concatenated hex lines printed by the chunked read.
///
/// Carriage returns and line feeds between chunks are dropped first.
pub fn decode_hex_output(output: &[u8]) -> ProtocolResult<Vec<u8>> {
    let digits: Vec<u8> = output
        .iter()
        .copied()
        .filter(|&b| b != b'\r' && b != b'\n')
        .collect();
    hex::decode(&digits).map_err(|e| ProtocolError::InvalidHex(e.to_string()))
}
