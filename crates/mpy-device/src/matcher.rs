//! Response matcher.
//!
//! Two single-flight waits layered on a transport: one accumulates text
//! until a pattern (or device error output) appears, the other accumulates
//! raw bytes until they end with a terminator. Only one wait may be
//! registered per channel; a second fails with [`DeviceError::Busy`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use mpy_protocol::{strip_echo, ERROR_MARKER};
use mpy_transport::Transport;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{DeviceError, DeviceResult};
use crate::metrics::BYTES_TX;
use crate::router::Router;

/// Busy description used when a response wait is already registered.
pub const MATCHER_BUSY: &str = "response matcher";

/// Write half of a session plus its inbound router.
#[derive(Debug, Clone)]
pub struct Channel {
    transport: Transport,
    router: Arc<Mutex<Router>>,
}

impl Channel {
    pub fn new(transport: Transport, router: Arc<Mutex<Router>>) -> Self {
        Channel { transport, router }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn router(&self) -> &Arc<Mutex<Router>> {
        &self.router
    }

    /// Take ownership of inbound bytes until the subscription is dropped.
    pub fn subscribe(&self) -> DeviceResult<Subscription> {
        if !self.transport.is_open() {
            return Err(DeviceError::NotConnected);
        }
        let (id, rx) = self
            .router
            .lock()
            .subscribe()
            .ok_or_else(|| DeviceError::Busy(MATCHER_BUSY.to_string()))?;
        Ok(Subscription {
            id,
            router: self.router.clone(),
            rx,
        })
    }

    /// Queue bytes for the device.
    pub fn write(&self, data: &[u8]) -> DeviceResult<()> {
        self.transport.write(data)?;
        metrics::counter!(BYTES_TX, "port" => self.transport.path().to_string()).increment(data.len() as u64);
        Ok(())
    }

    /// Wait until queued writes have left the host.
    pub async fn drain(&self) -> DeviceResult<()> {
        self.transport.drain().await?;
        Ok(())
    }

    /// Write `command` and collect text until `pattern` appears.
    ///
    /// Device error output is checked first since it is also followed by a
    /// prompt. The echoed command is removed from the returned text, and
    /// from the error text on failure.
    pub async fn wait_for_text(&self, command: &str, pattern: &str, timeout: Duration) -> DeviceResult<String> {
        let mut sub = self.subscribe()?;
        self.write(command.as_bytes())?;

        let deadline = Instant::now() + timeout;
        let mut buffer = Vec::new();
        loop {
            let chunk = sub.recv_until(deadline, pattern).await?;
            buffer.extend_from_slice(&chunk);

            let text = strip_echo(&String::from_utf8_lossy(&buffer), command);
            if text.contains(ERROR_MARKER) {
                tracing::debug!(command = %command.escape_debug(), "device reported an error");
                return Err(DeviceError::Device(text));
            }
            if text.contains(pattern) {
                return Ok(text);
            }
        }
    }

    /// Write `command`, drain, then collect bytes until they end with
    /// `terminator`. Returns everything before the terminator.
    ///
    /// Bytes that arrive before the drain completes (plus `settle`, when
    /// non-zero) are discarded.
    pub async fn wait_for_bytes(
        &self,
        command: &[u8],
        terminator: &[u8],
        timeout: Duration,
        settle: Duration,
    ) -> DeviceResult<Vec<u8>> {
        let mut sub = self.subscribe()?;
        let deadline = Instant::now() + timeout;
        self.write(command)?;
        self.drain().await?;
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
        sub.discard_pending();

        let what = String::from_utf8_lossy(terminator).to_string();
        let mut buffer = Vec::new();
        while !buffer.ends_with(terminator) {
            let chunk = sub.recv_until(deadline, &what).await?;
            buffer.extend_from_slice(&chunk);
        }
        buffer.truncate(buffer.len() - terminator.len());
        Ok(buffer)
    }
}

/// Exclusive claim on a channel's inbound bytes.
///
/// Dropping it hands inbound bytes back to the line router.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    router: Arc<Mutex<Router>>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl Subscription {
    /// Next inbound chunk.
    pub async fn recv(&mut self) -> DeviceResult<Bytes> {
        self.rx.recv().await.ok_or(DeviceError::NotConnected)
    }

    /// Next inbound chunk, failing with [`DeviceError::Timeout`] at `deadline`.
    pub async fn recv_until(&mut self, deadline: Instant, what: &str) -> DeviceResult<Bytes> {
        match tokio::time::timeout_at(deadline, self.rx.recv()).await {
            Ok(Some(chunk)) => Ok(chunk),
            Ok(None) => Err(DeviceError::NotConnected),
            Err(_) => Err(DeviceError::Timeout(what.escape_debug().to_string())),
        }
    }

    /// Next inbound chunk within `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration, what: &str) -> DeviceResult<Bytes> {
        self.recv_until(Instant::now() + timeout, what).await
    }

    /// Drop everything received so far.
    pub fn discard_pending(&mut self) -> usize {
        let mut dropped = 0;
        while let Ok(chunk) = self.rx.try_recv() {
            dropped += chunk.len();
        }
        if dropped > 0 {
            tracing::trace!(bytes = dropped, "discarded bytes received before drain");
        }
        dropped
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.router.lock().unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inflight::InFlightRegistry;
    use mpy_transport::{memory_pair, DeviceEnd, Inbound, Link};

    fn channel() -> (Channel, mpsc::UnboundedReceiver<Inbound>, DeviceEnd) {
        let (Link { transport, inbound }, device) = memory_pair("mem0", 115200);
        let router = Arc::new(Mutex::new(Router::new(InFlightRegistry::new(
            8,
            Duration::from_secs(30),
        ))));
        (Channel::new(transport, router), inbound, device)
    }

    /// Forward inbound data into the router, as the session reader does.
    fn pump(channel: &Channel, mut inbound: mpsc::UnboundedReceiver<Inbound>) {
        let router = channel.router().clone();
        tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                match event {
                    Inbound::Data(data) => router.lock().on_data(data),
                    Inbound::Closed(_) => {
                        router.lock().on_closed();
                        break;
                    }
                }
            }
        });
    }

    #[tokio::test]
    async fn test_wait_for_text_strips_echo() {
        let (channel, inbound, mut device) = channel();
        pump(&channel, inbound);
        tokio::spawn(async move {
            let cmd = device.recv().await.unwrap();
            device.send(&cmd);
            device.send(b"\n42\r\n>>> ");
        });

        let text = channel
            .wait_for_text("print(42)\r", ">>>", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(text, "\n42\r\n>>> ");
    }

    #[tokio::test]
    async fn test_wait_for_text_error_wins() {
        let (channel, inbound, mut device) = channel();
        pump(&channel, inbound);
        tokio::spawn(async move {
            let cmd = device.recv().await.unwrap();
            device.send(&cmd);
            device.send(b"\nOSError: [Errno 2] ENOENT\r\n>>> ");
        });

        let err = channel
            .wait_for_text("os.rmdir('/x')\r", ">>>", Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            DeviceError::Device(text) => assert!(text.contains("ENOENT")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_single_flight() {
        let (channel, inbound, mut device) = channel();
        pump(&channel, inbound);

        let err = channel
            .wait_for_text("x\r", "never", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Timeout(_)));
        assert_eq!(device.try_recv().unwrap().as_ref(), b"x\r");

        tokio::spawn(async move {
            device.recv().await.unwrap();
            device.send(b"y\r\n>>> ");
        });
        let text = channel
            .wait_for_text("y\r", ">>>", Duration::from_millis(100))
            .await
            .unwrap();
        assert!(text.contains(">>>"));
    }

    #[tokio::test]
    async fn test_second_wait_is_busy() {
        let (channel, _inbound, _device) = channel();
        let _held = channel.subscribe().unwrap();
        let err = channel
            .wait_for_text("x\r", ">>>", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Busy(ref what) if what == MATCHER_BUSY));
    }

    #[tokio::test]
    async fn test_wait_for_bytes_terminator() {
        let (channel, inbound, mut device) = channel();
        pump(&channel, inbound);
        tokio::spawn(async move {
            assert_eq!(device.recv().await.unwrap().as_ref(), b"\x04");
            device.send(b"OK12");
            device.send(b"3\x04\x04>");
        });

        let frame = channel
            .wait_for_bytes(b"\x04", b"\x04>", Duration::from_secs(1), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(frame, b"OK123\x04");
    }

    #[tokio::test]
    async fn test_wait_after_close_is_not_connected() {
        let (channel, inbound, _device) = channel();
        pump(&channel, inbound);
        channel.transport().close().await.unwrap();
        let err = channel
            .wait_for_text("x\r", ">>>", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::NotConnected));
    }
}
