//! Transport channels to MicroPython devices.
//!
//! A [`Transport`] is the write half of a duplex byte stream to one device;
//! the read half is delivered as a stream of [`Inbound`] events carrying
//! arbitrarily-chunked bytes. Three backends are provided:
//!
//! - **Serial**: a native port opened with `serialport`, pumped by two
//!   threads.
//! - **TCP**: `tcp://host:port`, for serial-over-network bridges.
//! - **Memory**: an in-process pair used by tests and simulators.
//!
//! # Example
//!
//! ```rust,ignore
//! let Link { transport, mut inbound } = mpy_transport::open("/dev/ttyACM0", 115200).await?;
//! transport.write(b"\r\x03")?;
//! transport.drain().await?;
//! while let Some(Inbound::Data(chunk)) = inbound.recv().await {
//!     print!("{}", String::from_utf8_lossy(&chunk));
//! }
//! ```

mod error;
mod memory;
mod serial;
mod tcp;
mod transport;

pub use error::*;
pub use memory::*;
pub use transport::*;

/// Prefix selecting the TCP backend in a port path.
pub const TCP_SCHEME: &str = "tcp://";

/// Open a transport for `path`.
///
/// Paths starting with [`TCP_SCHEME`] connect to a TCP bridge; anything else
/// is treated as a serial port name.
pub async fn open(path: &str, baud_rate: u32) -> TransportResult<Link> {
    if let Some(addr) = path.strip_prefix(TCP_SCHEME) {
        tcp::open(path, addr, baud_rate).await
    } else {
        serial::open(path, baud_rate).await
    }
}
