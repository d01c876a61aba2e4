//! TCP backend for serial-over-network bridges.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::{TransportError, TransportResult};
use crate::transport::{Inbound, Link, Outbound, Sink, Transport};

pub(crate) async fn open(path: &str, addr: &str, baud_rate: u32) -> TransportResult<Link> {
    if addr.is_empty() {
        return Err(TransportError::InvalidAddress(path.to_string()));
    }
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;

    let open = Arc::new(AtomicBool::new(true));
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    let task_open = open.clone();
    tokio::spawn(async move {
        let result = run_connection(stream, outbound_rx, &inbound_tx).await;
        let was_open = task_open.swap(false, Ordering::AcqRel);
        match result {
            Ok(()) => {
                let _ = inbound_tx.send(Inbound::Closed(None));
            }
            Err(e) => {
                if was_open {
                    tracing::debug!("tcp transport failed: {}", e);
                }
                let _ = inbound_tx.send(Inbound::Closed(Some(e)));
            }
        }
    });

    tracing::debug!(path, "tcp transport open");
    Ok(Link {
        transport: Transport::new(path, baud_rate, Sink::Pump(outbound_tx), open),
        inbound: inbound_rx,
    })
}

/// Pump one connection until the host closes it or the peer goes away.
async fn run_connection(
    stream: TcpStream,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    inbound: &mpsc::UnboundedSender<Inbound>,
) -> io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut read_buf = [0u8; 1024];

    loop {
        tokio::select! {
            // Read from the bridge -> inbound stream
            result = reader.read(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed connection"));
                    }
                    Ok(n) => {
                        if inbound.send(Inbound::Data(Bytes::copy_from_slice(&read_buf[..n]))).is_err() {
                            // Receiver dropped
                            return Ok(());
                        }
                    }
                    Err(e) => return Err(e),
                }
            }

            request = outbound.recv() => {
                match request {
                    Some(Outbound::Write(data)) => writer.write_all(&data).await?,
                    Some(Outbound::Drain(reply)) => {
                        let _ = reply.send(writer.flush().await);
                    }
                    Some(Outbound::Close(reply)) => {
                        let _ = writer.shutdown().await;
                        let _ = reply.send(Ok(()));
                        return Ok(());
                    }
                    None => return Ok(()),
                }
            }
        }
    }
}
