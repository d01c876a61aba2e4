//! REPL state machine.
//!
//! Tracks whether the device is at the Normal prompt, in raw mode, or in
//! the raw-paste sub-mode, and drives the handshakes between them. A
//! handshake that times out leaves the recorded state unchanged.

use std::fmt;
use std::sync::Arc;

use mpy_protocol::*;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::SessionConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::matcher::Channel;

/// Protocol state of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolState {
    /// Line-oriented prompt, `>>>`.
    #[default]
    Normal,
    /// Whole-script execution terminated by EOT.
    Raw,
    /// Windowed upload, entered from Raw.
    RawPaste,
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolState::Normal => write!(f, "normal"),
            ProtocolState::Raw => write!(f, "raw"),
            ProtocolState::RawPaste => write!(f, "raw-paste"),
        }
    }
}

/// REPL protocol driver for one session.
#[derive(Debug, Clone)]
pub struct Repl {
    pub(crate) channel: Channel,
    pub(crate) state: Arc<Mutex<ProtocolState>>,
    pub(crate) config: Arc<SessionConfig>,
}

impl Repl {
    pub fn new(channel: Channel, config: Arc<SessionConfig>) -> Self {
        Repl {
            channel,
            state: Arc::new(Mutex::new(ProtocolState::Normal)),
            config,
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> ProtocolState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ProtocolState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!(path = %self.channel.transport().path(), from = %*current, to = %state, "repl state");
            *current = state;
        }
    }

    /// Move from `from` to `to`, unless something else changed the state
    /// in the meantime.
    pub(crate) fn transition(&self, from: ProtocolState, to: ProtocolState) {
        let mut current = self.state.lock();
        if *current == from {
            debug!(path = %self.channel.transport().path(), from = %from, to = %to, "repl state");
            *current = to;
        }
    }

    /// Reset to Normal without a handshake, after the device reset or
    /// disconnected.
    pub fn force_normal(&self) {
        self.set_state(ProtocolState::Normal);
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub(crate) fn require(&self, expected: ProtocolState, action: &str) -> DeviceResult<()> {
        let state = self.state();
        if state != expected {
            return Err(DeviceError::ProtocolViolation(format!(
                "{} requires {} mode, device is in {} mode",
                action, expected, state
            )));
        }
        Ok(())
    }

    /// Switch from Normal to Raw.
    pub async fn enter_raw(&self) -> DeviceResult<()> {
        match self.state() {
            ProtocolState::Raw => return Ok(()),
            ProtocolState::RawPaste => return self.require(ProtocolState::Normal, "enter raw"),
            ProtocolState::Normal => {}
        }
        self.channel
            .wait_for_bytes(ENTER_RAW, RAW_BANNER, self.config.raw_timeout(), std::time::Duration::ZERO)
            .await?;
        self.set_state(ProtocolState::Raw);
        Ok(())
    }

    /// Execute everything written since the last prompt.
    ///
    /// Non-empty stderr surfaces as [`DeviceError::Device`].
    pub async fn execute_raw(&self) -> DeviceResult<RawResponse> {
        self.require(ProtocolState::Raw, "execute")?;
        let frame = self
            .channel
            .wait_for_bytes(&[CTRL_EOT], RAW_RESULT_END, self.config.raw_timeout(), std::time::Duration::ZERO)
            .await?;
        let response = RawResponse::parse(&frame)?;
        if response.is_error() {
            return Err(DeviceError::Device(response.stderr_text()));
        }
        Ok(response)
    }

    /// Write `source` in raw-mode slices and execute it.
    pub async fn exec_source(&self, source: &[u8]) -> DeviceResult<RawResponse> {
        self.require(ProtocolState::Raw, "execute")?;
        for slice in source.chunks(RAW_WRITE_SLICE) {
            self.channel.write(slice)?;
        }
        self.execute_raw().await
    }

    /// Return to Normal.
    pub async fn exit_raw(&self) -> DeviceResult<()> {
        match self.state() {
            ProtocolState::Normal => return Ok(()),
            ProtocolState::RawPaste => {
                // end reception so the device leaves raw-paste first
                self.channel.write(&[CTRL_EOT])?;
            }
            ProtocolState::Raw => {}
        }
        let exit = String::from_utf8_lossy(EXIT_RAW).to_string();
        self.channel
            .wait_for_text(&exit, NORMAL_PROMPT, self.config.exit_raw_timeout())
            .await?;
        self.set_state(ProtocolState::Normal);
        Ok(())
    }

    /// Run one Normal-mode statement and wait for the prompt.
    pub async fn exec_normal(&self, statement: &Statement) -> DeviceResult<String> {
        self.require(ProtocolState::Normal, "statement")?;
        self.channel
            .wait_for_text(&statement.to_line(), NORMAL_PROMPT, self.config.command_timeout())
            .await
    }
}
