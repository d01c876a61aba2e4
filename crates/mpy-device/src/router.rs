//! Inbound data routing.
//!
//! Every inbound chunk goes to exactly one consumer. While a response wait
//! is registered the chunk is forwarded to it untouched; otherwise it feeds
//! the line router, which echoes raw bytes to the terminal sink, splits
//! complete lines, and correlates them with listeners' in-flight commands.

use std::collections::HashMap;

use bytes::Bytes;
use mpy_protocol::LineCodec;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::inflight::{DeviceCommandResponse, InFlightCommand, InFlightRegistry, ListenerEvent};

/// Capacity of the terminal and line broadcast channels.
const BROADCAST_CAPACITY: usize = 256;

/// Who currently owns inbound bytes.
#[derive(Debug)]
enum Consumer {
    /// The line router.
    Lines,
    /// A response wait.
    Subscribed { id: u64, tx: mpsc::UnboundedSender<Bytes> },
}

/// Per-session inbound router.
#[derive(Debug)]
pub struct Router {
    consumer: Consumer,
    next_id: u64,
    codec: LineCodec,
    listeners: HashMap<String, mpsc::UnboundedSender<ListenerEvent>>,
    in_flight: InFlightRegistry,
    terminal: broadcast::Sender<Bytes>,
    lines: broadcast::Sender<String>,
}

impl Router {
    pub fn new(in_flight: InFlightRegistry) -> Self {
        let (terminal, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (lines, _) = broadcast::channel(BROADCAST_CAPACITY);
        Router {
            consumer: Consumer::Lines,
            next_id: 1,
            codec: LineCodec::new(),
            listeners: HashMap::new(),
            in_flight,
            terminal,
            lines,
        }
    }

    /// Route one inbound chunk.
    pub fn on_data(&mut self, data: Bytes) {
        if let Consumer::Subscribed { tx, .. } = &self.consumer {
            match tx.send(data) {
                Ok(()) => return,
                Err(mpsc::error::SendError(data)) => {
                    // waiter dropped without unsubscribing
                    self.consumer = Consumer::Lines;
                    self.route_lines(data);
                }
            }
            return;
        }
        self.route_lines(data);
    }

    fn route_lines(&mut self, data: Bytes) {
        let _ = self.terminal.send(data.clone());
        self.codec.push(&data);
        let Some(lines) = self.codec.take_lines() else {
            return;
        };
        if lines.is_empty() {
            return;
        }
        for line in &lines {
            let _ = self.lines.send(line.clone());
        }
        self.dispatch(&lines);
    }

    fn dispatch(&mut self, lines: &[String]) {
        self.in_flight.expire(Instant::now());

        let mut closed = Vec::new();
        for (key, tx) in &self.listeners {
            let mut unmatched = Vec::new();
            for line in lines {
                match self.in_flight.take_match(key, line) {
                    Some(command) => {
                        let event = ListenerEvent::Response(DeviceCommandResponse {
                            id: command.id,
                            result: line.clone(),
                        });
                        if tx.send(event).is_err() {
                            closed.push(key.clone());
                        }
                    }
                    None => unmatched.push(line.clone()),
                }
            }
            if !unmatched.is_empty() && tx.send(ListenerEvent::Lines { lines: unmatched }).is_err() {
                closed.push(key.clone());
            }
        }
        for key in closed {
            tracing::debug!(listener = %key, "listener gone");
            self.remove_listener(&key);
        }
    }

    /// Hand inbound bytes to a response wait.
    ///
    /// Returns `None` if a wait is already registered.
    pub fn subscribe(&mut self) -> Option<(u64, mpsc::UnboundedReceiver<Bytes>)> {
        if let Consumer::Subscribed { tx, .. } = &self.consumer {
            if !tx.is_closed() {
                return None;
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.consumer = Consumer::Subscribed { id, tx };
        // a partial line must not be glued to output after the wait
        self.codec.clear();
        Some((id, rx))
    }

    /// Return inbound bytes to the line router if `id` still owns them.
    pub fn unsubscribe(&mut self, id: u64) {
        if matches!(self.consumer, Consumer::Subscribed { id: current, .. } if current == id) {
            self.consumer = Consumer::Lines;
        }
    }

    /// Whether a response wait is registered.
    pub fn is_subscribed(&self) -> bool {
        matches!(&self.consumer, Consumer::Subscribed { tx, .. } if !tx.is_closed())
    }

    /// The channel closed: end any wait.
    pub fn on_closed(&mut self) {
        self.consumer = Consumer::Lines;
        self.codec.clear();
    }

    pub fn register_listener(&mut self, key: &str, tx: mpsc::UnboundedSender<ListenerEvent>) {
        self.listeners.insert(key.to_string(), tx);
    }

    pub fn remove_listener(&mut self, key: &str) {
        self.listeners.remove(key);
        self.in_flight.remove_listener(key);
    }

    pub fn register_in_flight(&mut self, command: InFlightCommand) {
        self.in_flight.register(command);
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn terminal(&self) -> broadcast::Receiver<Bytes> {
        self.terminal.subscribe()
    }

    pub fn lines(&self) -> broadcast::Receiver<String> {
        self.lines.subscribe()
    }
}
