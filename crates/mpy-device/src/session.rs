//! Device session.
//!
//! Binds one transport, one REPL state machine and one filesystem handle to
//! a device identity. A reader task feeds inbound data to the router and
//! resets the protocol state when the device goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use mpy_protocol::*;
use mpy_transport::{Inbound, Link};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::fs::FileSystem;
use crate::identity::{DeviceIdentity, EofKind};
use crate::inflight::{DeviceCommand, InFlightCommand, InFlightRegistry, ListenerEvent};
use crate::matcher::Channel;
use crate::metrics::BYTES_RX;
use crate::repl::{ProtocolState, Repl};
use crate::router::Router;

/// A connected device.
#[derive(Debug)]
pub struct DeviceSession {
    identity: DeviceIdentity,
    config: Arc<SessionConfig>,
    channel: Channel,
    repl: Repl,
    fs: FileSystem,
    device_gone: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceSession {
    /// Open the device's port and start a session.
    ///
    /// Sends a break right away when the device supports it, to stop any
    /// running program.
    pub async fn connect(identity: DeviceIdentity, config: SessionConfig) -> DeviceResult<Self> {
        let baud_rate = identity.baud_rate.unwrap_or(config.baud_rate);
        let link = mpy_transport::open(&identity.path, baud_rate).await?;
        info!(path = %identity.path, baud_rate, "connected");
        let session = DeviceSession::attach(identity, config, link);
        if session.identity.capabilities.brk {
            session.send_break()?;
        }
        Ok(session)
    }

    /// Start a session on an already open link.
    pub fn attach(identity: DeviceIdentity, config: SessionConfig, link: Link) -> Self {
        let config = Arc::new(config);
        let Link { transport, inbound } = link;

        let router = Arc::new(Mutex::new(Router::new(InFlightRegistry::new(
            config.in_flight_max,
            config.in_flight_max_age(),
        ))));
        let channel = Channel::new(transport, router.clone());
        let repl = Repl::new(channel.clone(), config.clone());
        let fs = FileSystem::new(repl.clone(), config.clone(), identity.capabilities);
        let device_gone = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_loop(
            identity.path.clone(),
            inbound,
            router,
            repl.state.clone(),
            device_gone.clone(),
        ));

        DeviceSession {
            identity,
            config,
            channel,
            repl,
            fs,
            device_gone,
            reader: Mutex::new(Some(reader)),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn path(&self) -> &str {
        &self.identity.path
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.channel.transport().is_open()
    }

    pub fn state(&self) -> ProtocolState {
        self.repl.state()
    }

    pub fn fs(&self) -> &FileSystem {
        &self.fs
    }

    pub fn repl(&self) -> &Repl {
        &self.repl
    }

    /// Raw bytes echoed by the device while no response wait is active.
    pub fn terminal(&self) -> broadcast::Receiver<Bytes> {
        self.channel.router().lock().terminal()
    }

    /// Decoded terminal lines.
    pub fn lines(&self) -> broadcast::Receiver<String> {
        self.channel.router().lock().lines()
    }

    /// Write text to the device without waiting for a reply.
    pub fn write_raw(&self, data: &str) -> DeviceResult<()> {
        self.channel.write(data.as_bytes())
    }

    /// Write a command and wait for the Normal prompt.
    pub async fn write_wait(&self, command: &str) -> DeviceResult<String> {
        self.channel
            .wait_for_text(command, NORMAL_PROMPT, self.config.command_timeout())
            .await
    }

    /// Interrupt the running program.
    pub fn send_break(&self) -> DeviceResult<()> {
        if !self.identity.capabilities.brk {
            return Err(DeviceError::Unsupported("break".to_string()));
        }
        self.channel.write(&[CTRL_BREAK])
    }

    /// Send Ctrl-D: soft reset on boards that support it.
    pub fn send_eof(&self) -> DeviceResult<()> {
        let eof = self.identity.capabilities.eof;
        if eof == EofKind::None {
            return Err(DeviceError::Unsupported("eof".to_string()));
        }
        self.channel.write(&[CTRL_EOT])?;
        // the board restarts or drops off the bus either way
        self.repl.force_normal();
        Ok(())
    }

    /// Register a listener; returns its event stream.
    ///
    /// Registering a key again replaces the previous listener.
    pub fn register_listener(&self, key: &str) -> mpsc::UnboundedReceiver<ListenerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channel.router().lock().register_listener(key, tx);
        rx
    }

    pub fn remove_listener(&self, key: &str) {
        self.channel.router().lock().remove_listener(key);
    }

    /// Carry out a listener command.
    ///
    /// A `write` with an expected response is tracked until a matching line
    /// arrives, then reported to the listener as a response event.
    pub fn send_command(&self, listener_key: &str, command: DeviceCommand) -> DeviceResult<()> {
        match command.method.as_str() {
            "write" => {
                let payload = command
                    .params
                    .command
                    .ok_or_else(|| DeviceError::InvalidCommand("write without params.command".to_string()))?;
                if let Some(expected) = command.params.expected {
                    self.channel.router().lock().register_in_flight(InFlightCommand {
                        id: command.id,
                        expected_response: expected,
                        listener_key: listener_key.to_string(),
                        payload: payload.clone(),
                        created: Instant::now(),
                    });
                }
                self.write_raw(&payload)
            }
            "break" => self.send_break(),
            "eof" => self.send_eof(),
            other => Err(DeviceError::InvalidCommand(format!("unknown method {:?}", other))),
        }
    }

    /// Leave raw modes and close the transport.
    ///
    /// When the device already went away the exit handshake is skipped.
    pub async fn disconnect(&self) -> DeviceResult<()> {
        if self.device_gone.load(Ordering::Acquire) || !self.is_connected() {
            self.repl.force_normal();
        } else {
            self.leave_raw().await;
        }

        self.channel.transport().close().await?;
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            let _ = reader.await;
        }
        info!(path = %self.identity.path, "disconnected");
        Ok(())
    }

    async fn leave_raw(&self) {
        let state = self.repl.state();
        if state == ProtocolState::Normal {
            return;
        }
        if let Err(e) = self.repl.exit_raw().await {
            warn!(path = %self.identity.path, state = %state, error = %e, "raw exit failed, writing blind");
            if state == ProtocolState::RawPaste {
                if let Err(e) = self.channel.write(&[CTRL_EOT]) {
                    warn!(path = %self.identity.path, error = %e, "failed to end raw-paste");
                }
            }
            if let Err(e) = self.channel.write(EXIT_RAW) {
                warn!(path = %self.identity.path, error = %e, "failed to write raw exit");
            }
            self.repl.force_normal();
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

async fn read_loop(
    path: String,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    router: Arc<Mutex<Router>>,
    state: Arc<Mutex<ProtocolState>>,
    device_gone: Arc<AtomicBool>,
) {
    while let Some(event) = inbound.recv().await {
        match event {
            Inbound::Data(data) => {
                metrics::counter!(BYTES_RX, "port" => path.clone()).increment(data.len() as u64);
                tracing::trace!(path = %path, len = data.len(), "rx");
                router.lock().on_data(data);
            }
            Inbound::Closed(reason) => {
                match reason {
                    Some(e) => {
                        warn!(path = %path, error = %e, "device went away");
                        device_gone.store(true, Ordering::Release);
                    }
                    None => debug!(path = %path, "transport closed"),
                }
                *state.lock() = ProtocolState::Normal;
                router.lock().on_closed();
                break;
            }
        }
    }
}
