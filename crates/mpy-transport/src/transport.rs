//! The transport handle shared by all backends.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::error::{TransportError, TransportResult};

// ============================================================================
// Types
// ============================================================================

/// Event delivered on the inbound side of a transport.
#[derive(Debug)]
pub enum Inbound {
    /// A chunk of bytes from the device. Chunk boundaries carry no meaning.
    Data(Bytes),
    /// The channel closed. `Some` carries the error when the device went
    /// away on its own; `None` means the host closed it.
    Closed(Option<io::Error>),
}

/// Request sent to a backend's I/O pump.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// Write bytes to the device.
    Write(Bytes),
    /// Flush pending writes, then reply.
    Drain(oneshot::Sender<io::Result<()>>),
    /// Close the device, then reply.
    Close(oneshot::Sender<io::Result<()>>),
}

/// Where writes go.
#[derive(Debug, Clone)]
pub(crate) enum Sink {
    /// An I/O pump task or thread owning the device.
    Pump(mpsc::UnboundedSender<Outbound>),
    /// An in-process peer; drains complete immediately.
    Memory {
        to_device: mpsc::UnboundedSender<Bytes>,
        inbound: mpsc::UnboundedSender<Inbound>,
    },
}

/// An open transport plus its inbound event stream.
#[derive(Debug)]
pub struct Link {
    /// Write half.
    pub transport: Transport,
    /// Read half.
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
}

/// Write half of a duplex byte channel to one device.
#[derive(Debug, Clone)]
pub struct Transport {
    path: String,
    baud_rate: u32,
    sink: Sink,
    open: Arc<AtomicBool>,
}

impl Transport {
    pub(crate) fn new(path: &str, baud_rate: u32, sink: Sink, open: Arc<AtomicBool>) -> Self {
        Transport {
            path: path.to_string(),
            baud_rate,
            sink,
            open,
        }
    }

    /// Port path this transport was opened on.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Configured baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Whether the channel is still open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Queue bytes for the device.
    ///
    /// Fails with [`TransportError::NotConnected`] once the channel is closed.
    pub fn write(&self, data: &[u8]) -> TransportResult<()> {
        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }
        let data = Bytes::copy_from_slice(data);
        tracing::trace!(path = %self.path, len = data.len(), "tx");
        match &self.sink {
            Sink::Pump(tx) => tx
                .send(Outbound::Write(data))
                .map_err(|_| TransportError::NotConnected),
            Sink::Memory { to_device, .. } => to_device
                .send(data)
                .map_err(|_| TransportError::NotConnected),
        }
    }

    /// Wait until every queued write has left the host.
    pub async fn drain(&self) -> TransportResult<()> {
        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }
        match &self.sink {
            Sink::Pump(tx) => {
                let (reply, done) = oneshot::channel();
                tx.send(Outbound::Drain(reply))
                    .map_err(|_| TransportError::NotConnected)?;
                done.await.map_err(|_| TransportError::NotConnected)??;
                Ok(())
            }
            Sink::Memory { .. } => Ok(()),
        }
    }

    /// Close the channel. Closing an already closed channel is a no-op.
    pub async fn close(&self) -> TransportResult<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::debug!(path = %self.path, "closing transport");
        match &self.sink {
            Sink::Pump(tx) => {
                let (reply, done) = oneshot::channel();
                if tx.send(Outbound::Close(reply)).is_err() {
                    // pump already gone with the device
                    return Ok(());
                }
                done.await.map_err(|_| TransportError::NotConnected)??;
                Ok(())
            }
            Sink::Memory { inbound, .. } => {
                let _ = inbound.send(Inbound::Closed(None));
                Ok(())
            }
        }
    }
}
