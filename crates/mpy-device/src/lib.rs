//! MicroPython device sessions.
//!
//! The async half of the stack: a response matcher over a transport, the
//! REPL state machine with its raw-paste upload, filesystem operations
//! guarded by a per-device lock, and sessions that route inbound traffic
//! between response waits, the terminal, and external listeners.
//!
//! # Example
//!
//! ```rust,ignore
//! use mpy_device::{DeviceIdentity, DeviceManager, SessionConfig};
//!
//! let manager = DeviceManager::new(SessionConfig::default());
//! let session = manager.connect(DeviceIdentity::new("/dev/ttyACM0")).await?;
//! for entry in session.fs().list_directory("/").await? {
//!     println!("{} {} {}", entry.kind, entry.size, entry.path);
//! }
//! session.fs().write_file("/main.py", b"print('hi')\n", None).await?;
//! manager.disconnect_all().await;
//! ```

mod config;
mod error;
mod fs;
mod identity;
mod inflight;
mod lock;
mod manager;
mod matcher;
pub mod metrics;
mod raw_paste;
mod repl;
mod router;
mod session;

pub use config::*;
pub use error::*;
pub use fs::*;
pub use identity::*;
pub use inflight::*;
pub use lock::*;
pub use manager::*;
pub use matcher::*;
pub use raw_paste::*;
pub use repl::*;
pub use router::*;
pub use session::*;

pub use mpy_protocol::{DirEntry, EntryKind, RawResponse};
