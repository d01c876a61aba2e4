//! Raw-paste upload on top of the REPL state machine.

use std::collections::VecDeque;

use mpy_protocol::*;
use tracing::{debug, warn};

use crate::error::{DeviceError, DeviceResult};
use crate::matcher::Subscription;
use crate::metrics::RAW_PASTE_CREDIT_GRANTS;
use crate::repl::{ProtocolState, Repl};

/// Outcome of one raw-paste session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasteReport {
    /// Execution result of the pasted code.
    pub response: RawResponse,
    /// Negotiated window, `None` when the device refused raw-paste.
    pub window: Option<u16>,
    /// Number of writes the payload was split into.
    pub send_steps: usize,
    /// Credit grants received while streaming.
    pub credit_grants: u64,
}

impl Repl {
    /// Upload and execute `payload` using raw-paste flow control.
    ///
    /// Falls back to plain raw-mode writes when the device refuses
    /// raw-paste. Returns to Raw in every case.
    pub async fn raw_paste(&self, payload: &[u8]) -> DeviceResult<PasteReport> {
        self.require(ProtocolState::Raw, "raw-paste")?;
        let mut sub = self.channel.subscribe()?;
        self.channel.write(ENTER_RAW_PASTE)?;
        self.channel.drain().await?;

        let timeout = self.config.raw_timeout();
        let mut pending: VecDeque<u8> = VecDeque::new();
        let header = loop {
            let buf = pending.make_contiguous();
            if let Some((header, used)) = RawPasteHeader::decode(buf)? {
                pending.drain(..used);
                break header;
            }
            let chunk = sub.recv_timeout(timeout, "raw-paste header").await?;
            pending.extend(chunk.iter());
        };

        let window = match header {
            RawPasteHeader::Refused => {
                debug!(path = %self.channel.transport().path(), "raw-paste refused, using raw mode");
                drop(sub);
                return self.paste_fallback(payload).await;
            }
            RawPasteHeader::Accepted { window } => window,
        };

        self.set_state(ProtocolState::RawPaste);
        let result = self.stream(&mut sub, &mut pending, payload, window).await;
        // a disconnect may have reset the state to Normal meanwhile
        self.transition(ProtocolState::RawPaste, ProtocolState::Raw);

        match result {
            Ok(report) => {
                metrics::counter!(RAW_PASTE_CREDIT_GRANTS, "port" => self.channel.transport().path().to_string())
                    .increment(report.credit_grants);
                if report.response.is_error() {
                    return Err(DeviceError::Device(report.response.stderr_text()));
                }
                Ok(report)
            }
            Err(e) => {
                if let Err(cleanup) = self.channel.write(&[CTRL_EOT]) {
                    warn!(error = %cleanup, "failed to end raw-paste after error");
                }
                Err(e)
            }
        }
    }

    async fn stream(
        &self,
        sub: &mut Subscription,
        pending: &mut VecDeque<u8>,
        payload: &[u8],
        window: u16,
    ) -> DeviceResult<PasteReport> {
        let timeout = self.config.raw_timeout();
        let mut sender = RawPasteSender::new(payload, window);
        let mut send_steps = 0;
        let mut credit_grants = 0;

        loop {
            while let Some(byte) = pending.pop_front() {
                match sender.on_flow_byte(byte)? {
                    FlowEvent::Credit => credit_grants += 1,
                    FlowEvent::End => {
                        return Err(DeviceError::ProtocolViolation(format!(
                            "device ended raw-paste reception after {} of {} bytes",
                            sender.offset(),
                            payload.len()
                        )));
                    }
                }
            }
            while let Some(chunk) = sender.next_chunk() {
                self.channel.write(chunk)?;
                send_steps += 1;
            }
            if sender.is_complete() {
                break;
            }
            let chunk = sub.recv_timeout(timeout, "raw-paste credit").await?;
            pending.extend(chunk.iter());
        }

        self.channel.write(&[CTRL_EOT])?;
        loop {
            let byte = match pending.pop_front() {
                Some(byte) => byte,
                None => {
                    let chunk = sub.recv_timeout(timeout, "raw-paste end of reception").await?;
                    pending.extend(chunk.iter());
                    continue;
                }
            };
            match byte {
                RAW_PASTE_CREDIT => credit_grants += 1,
                RAW_PASTE_END => break,
                other => {
                    return Err(DeviceError::ProtocolViolation(format!(
                        "unexpected byte 0x{:02x} awaiting end of reception",
                        other
                    )))
                }
            }
        }

        let mut frame: Vec<u8> = pending.drain(..).collect();
        while !frame.ends_with(RAW_RESULT_END) {
            let chunk = sub.recv_timeout(timeout, "raw-paste result").await?;
            frame.extend_from_slice(&chunk);
        }
        frame.truncate(frame.len() - RAW_RESULT_END.len());
        let response = RawResponse::parse_body(&frame)?;

        debug!(
            bytes = payload.len(),
            window,
            send_steps,
            credit_grants,
            "raw-paste complete"
        );
        Ok(PasteReport {
            response,
            window: Some(window),
            send_steps,
            credit_grants,
        })
    }

    async fn paste_fallback(&self, payload: &[u8]) -> DeviceResult<PasteReport> {
        let send_steps = payload.chunks(RAW_WRITE_SLICE).count();
        let response = self.exec_source(payload).await?;
        Ok(PasteReport {
            response,
            window: None,
            send_steps,
            credit_grants: 0,
        })
    }
}
