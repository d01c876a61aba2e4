//! MicroPython REPL Protocol
//!
//! This crate provides the sans-IO building blocks for talking to a
//! MicroPython-capable microcontroller over its serial REPL. Nothing here
//! touches a port or a clock; the async layers in `mpy-device` feed bytes in
//! and take bytes out.
//!
//! # Protocol Overview
//!
//! The device exposes three modes on one half-duplex text stream:
//!
//! - **Normal**: line-oriented statements terminated with `\r`, echoed back,
//!   answered with the `>>>` prompt.
//! - **Raw**: a whole script is written without echo and executed on `0x04`.
//!   The device answers `OK`, stdout, `0x04`, stderr, `0x04`, `>`.
//! - **Raw-paste**: a binary sub-mode of raw mode with windowed flow control.
//!   The device grants credit with single `0x01` bytes.
//!
//! # Example
//!
//! ```rust
//! use mpy_protocol::{parse_listing, EntryKind, Statement};
//!
//! let stmt = Statement::mkdir("/lib");
//! assert_eq!(stmt.as_str(), "os.mkdir('/lib')");
//!
//! let entries = parse_listing("/a.py 32768 10 ,/sub 16384 0 ,");
//! assert_eq!(entries[1].kind, EntryKind::Dir);
//! ```

mod codec;
mod constants;
mod error;
mod raw_paste;
mod responses;
mod statements;

pub use codec::*;
pub use constants::*;
pub use error::*;
pub use raw_paste::*;
pub use responses::*;
pub use statements::*;
