//! In-process transport pair.
//!
//! The host side is an ordinary [`Link`]; the other side is a
//! [`DeviceEnd`] that a test or simulator drives by hand. Drains complete
//! immediately since nothing is buffered between the two ends.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::transport::{Inbound, Link, Sink, Transport};

/// Device side of an in-memory transport.
#[derive(Debug)]
pub struct DeviceEnd {
    from_host: mpsc::UnboundedReceiver<Bytes>,
    to_host: mpsc::UnboundedSender<Inbound>,
    open: Arc<AtomicBool>,
}

/// Create a connected host/device pair for `path`.
pub fn memory_pair(path: &str, baud_rate: u32) -> (Link, DeviceEnd) {
    let open = Arc::new(AtomicBool::new(true));
    let (to_device, from_host) = mpsc::unbounded_channel();
    let (to_host, inbound) = mpsc::unbounded_channel();

    let sink = Sink::Memory {
        to_device,
        inbound: to_host.clone(),
    };
    let link = Link {
        transport: Transport::new(path, baud_rate, sink, open.clone()),
        inbound,
    };
    let device = DeviceEnd {
        from_host,
        to_host,
        open,
    };
    (link, device)
}

impl DeviceEnd {
    /// Send bytes to the host as one chunk.
    pub fn send(&self, data: &[u8]) -> bool {
        self.to_host
            .send(Inbound::Data(Bytes::copy_from_slice(data)))
            .is_ok()
    }

    /// Wait for the next chunk written by the host.
    ///
    /// Returns `None` once the host side is gone.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.from_host.recv().await
    }

    /// Take a chunk if one is already queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.from_host.try_recv().ok()
    }

    /// Collect everything the host writes until it stays quiet for `idle`.
    pub async fn recv_until_idle(&mut self, idle: Duration) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(Some(chunk)) = tokio::time::timeout(idle, self.from_host.recv()).await {
            out.extend_from_slice(&chunk);
        }
        out
    }

    /// Whether the host still has the channel open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Simulate the device disappearing (cable pulled, board reset).
    pub fn disconnect(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.to_host.send(Inbound::Closed(Some(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "device disconnected",
            ))));
        }
    }
}
