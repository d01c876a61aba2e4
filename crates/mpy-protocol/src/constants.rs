//! Protocol constants
//!
//! Control bytes and fixed sequences of the MicroPython REPL. These values
//! are set by the device firmware and must be bit-exact.

// ============================================================================
// Control Bytes (host → device)
// ============================================================================

/// Ctrl-A: enter raw REPL (sent after a carriage return).
pub const CTRL_ENTER_RAW: u8 = 0x01;
/// Ctrl-B: leave raw REPL (sent after a carriage return).
pub const CTRL_EXIT_RAW: u8 = 0x02;
/// Ctrl-C: interrupt the running program.
pub const CTRL_BREAK: u8 = 0x03;
/// Ctrl-D: execute in raw mode, end of transmission in raw-paste mode.
pub const CTRL_EOT: u8 = 0x04;
/// Ctrl-E: first byte of the raw-paste request.
pub const CTRL_RAW_PASTE: u8 = 0x05;

/// Sequence that switches Normal → Raw.
pub const ENTER_RAW: &[u8] = b"\r\x01";
/// Sequence that switches Raw → Normal.
pub const EXIT_RAW: &[u8] = b"\r\x02";
/// Sequence that requests raw-paste mode from Raw.
pub const ENTER_RAW_PASTE: &[u8] = b"\x05A\x01";

// ============================================================================
// Device Responses (device → host)
// ============================================================================

/// Prompt printed by the device in Normal mode.
pub const NORMAL_PROMPT: &str = ">>>";
/// Prompt byte printed by the device in Raw mode.
pub const RAW_PROMPT: u8 = b'>';
/// Banner the device prints when raw mode is entered.
pub const RAW_BANNER: &[u8] = b"raw REPL; CTRL-B to exit\r\n>";
/// Acknowledgement the device sends after a raw-mode `0x04`.
pub const RAW_EXEC_ACK: &[u8] = b"OK";
/// Trailer of every raw-mode or raw-paste execution result.
pub const RAW_RESULT_END: &[u8] = &[CTRL_EOT, RAW_PROMPT];

/// First byte of the raw-paste header.
pub const RAW_PASTE_ACK: u8 = b'R';
/// Second header byte: raw-paste accepted, window size follows.
pub const RAW_PASTE_ACCEPTED: u8 = 0x01;
/// Second header byte: raw-paste refused, fall back to plain raw mode.
pub const RAW_PASTE_REFUSED: u8 = 0x00;
/// Flow-control byte granting one more window of credit.
pub const RAW_PASTE_CREDIT: u8 = 0x01;
/// Flow-control byte announcing the end of reception.
pub const RAW_PASTE_END: u8 = CTRL_EOT;

/// Substring that marks device-side error output in Normal mode.
pub const ERROR_MARKER: &str = "Error";

// ============================================================================
// Filesystem
// ============================================================================

/// `stat` mode bits for the file type.
pub const S_IFMT: u32 = 0o170000;
/// `stat` mode for a regular file (32768).
pub const S_IFREG: u32 = 0o100000;
/// `stat` mode for a directory (16384).
pub const S_IFDIR: u32 = 0o040000;

/// Default hex characters per write/read statement.
pub const DEFAULT_TRANSFER_RATE: usize = 256;
/// Default statements sent per raw-paste session.
pub const DEFAULT_STATEMENTS_PER_PASTE: usize = 16;
/// Slice size used when streaming a script body in plain raw mode.
pub const RAW_WRITE_SLICE: usize = 255;
