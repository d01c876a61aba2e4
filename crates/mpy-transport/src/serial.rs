//! Native serial port backend.
//!
//! `serialport` is blocking, so the port is pumped by two threads: a reader
//! polling with a short timeout, and a writer serving [`Outbound`] requests.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportResult;
use crate::transport::{Inbound, Link, Outbound, Sink, Transport};

/// Read poll interval; bounds how long the reader takes to notice a close.
const READ_TIMEOUT: Duration = Duration::from_millis(20);
/// Read buffer size.
const READ_BUF: usize = 1024;

pub(crate) async fn open(path: &str, baud_rate: u32) -> TransportResult<Link> {
    let owned_path = path.to_string();
    let port = tokio::task::spawn_blocking(move || {
        serialport::new(owned_path, baud_rate)
            .timeout(READ_TIMEOUT)
            .open()
    })
    .await
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
    let reader = port.try_clone()?;

    let open = Arc::new(AtomicBool::new(true));
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    {
        let open = open.clone();
        let inbound_tx = inbound_tx.clone();
        let name = path.to_string();
        thread::Builder::new()
            .name(format!("serial-rx {}", name))
            .spawn(move || run_reader(reader, open, inbound_tx))?;
    }
    {
        let open = open.clone();
        thread::Builder::new()
            .name(format!("serial-tx {}", path))
            .spawn(move || run_writer(port, open, outbound_rx, inbound_tx))?;
    }

    tracing::debug!(path, baud_rate, "serial port open");
    Ok(Link {
        transport: Transport::new(path, baud_rate, Sink::Pump(outbound_tx), open),
        inbound: inbound_rx,
    })
}

fn run_reader(
    mut port: Box<dyn serialport::SerialPort>,
    open: Arc<AtomicBool>,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    let mut buf = [0u8; READ_BUF];
    while open.load(Ordering::Acquire) {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                if inbound.send(Inbound::Data(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if open.swap(false, Ordering::AcqRel) {
                    tracing::debug!("serial read failed: {}", e);
                    let _ = inbound.send(Inbound::Closed(Some(e)));
                }
                return;
            }
        }
    }
}

fn run_writer(
    mut port: Box<dyn serialport::SerialPort>,
    open: Arc<AtomicBool>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    // first failure, replayed to every later request
    let mut failed: Option<(io::ErrorKind, String)> = None;

    while let Some(request) = outbound.blocking_recv() {
        match request {
            Outbound::Write(data) => {
                if failed.is_some() {
                    continue;
                }
                if let Err(e) = port.write_all(&data) {
                    failed = Some((e.kind(), e.to_string()));
                    if open.swap(false, Ordering::AcqRel) {
                        let _ = inbound.send(Inbound::Closed(Some(e)));
                    }
                }
            }
            Outbound::Drain(reply) => {
                let result = match &failed {
                    Some((kind, msg)) => Err(io::Error::new(*kind, msg.clone())),
                    None => port.flush(),
                };
                let _ = reply.send(result);
            }
            Outbound::Close(reply) => {
                let _ = reply.send(Ok(()));
                let _ = inbound.send(Inbound::Closed(None));
                break;
            }
        }
    }
    // dropping the port releases the device
}
