//! Keyed command/response correlation for external listeners.
//!
//! A listener writes a command and names a substring it expects back. The
//! session scans every inbound line against the listener's outstanding
//! commands and reports the first match. Unmatched commands are evicted
//! once the registry is full or once they exceed the maximum age.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// A command issued by an external listener.
///
/// JSON shape: `{"method": "write", "params": {"command": "...", "expected": "..."}, "id": 7}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    /// `write`, `break` or `eof`.
    pub method: String,
    #[serde(default)]
    pub params: CommandParams,
    #[serde(default)]
    pub id: Option<u64>,
}

/// Parameters of a [`DeviceCommand`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandParams {
    /// Text written to the device.
    #[serde(default)]
    pub command: Option<String>,
    /// Substring that marks the response.
    #[serde(default)]
    pub expected: Option<String>,
    /// Anything else the listener attached.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Response delivered for a matched command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommandResponse {
    pub id: Option<u64>,
    /// The inbound line that matched.
    pub result: String,
}

/// Event delivered to a registered listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListenerEvent {
    /// A line matched one of the listener's commands.
    Response(DeviceCommandResponse),
    /// Lines that matched nothing.
    Lines { lines: Vec<String> },
}

/// One outstanding command.
#[derive(Debug, Clone)]
pub struct InFlightCommand {
    pub id: Option<u64>,
    pub expected_response: String,
    pub listener_key: String,
    pub payload: String,
    pub created: Instant,
}

/// Bounded registry of outstanding commands for one session.
#[derive(Debug)]
pub struct InFlightRegistry {
    entries: VecDeque<InFlightCommand>,
    max: usize,
    max_age: Duration,
}

impl InFlightRegistry {
    pub fn new(max: usize, max_age: Duration) -> Self {
        InFlightRegistry {
            entries: VecDeque::new(),
            max: max.max(1),
            max_age,
        }
    }

    /// Add a command, evicting the oldest when full.
    pub fn register(&mut self, command: InFlightCommand) {
        while self.entries.len() >= self.max {
            if let Some(evicted) = self.entries.pop_front() {
                tracing::warn!(
                    listener = %evicted.listener_key,
                    id = ?evicted.id,
                    expected = %evicted.expected_response,
                    "in-flight command evicted unmatched"
                );
            }
        }
        self.entries.push_back(command);
    }

    /// Drop commands older than the maximum age.
    pub fn expire(&mut self, now: Instant) {
        let max_age = self.max_age;
        self.entries.retain(|c| {
            let keep = now.saturating_duration_since(c.created) < max_age;
            if !keep {
                tracing::debug!(listener = %c.listener_key, id = ?c.id, "in-flight command expired");
            }
            keep
        });
    }

    /// Remove and return the oldest command for `listener_key` whose
    /// expected response occurs in `line`.
    pub fn take_match(&mut self, listener_key: &str, line: &str) -> Option<InFlightCommand> {
        let index = self
            .entries
            .iter()
            .position(|c| c.listener_key == listener_key && line.contains(&c.expected_response))?;
        self.entries.remove(index)
    }

    /// Drop every command registered by `listener_key`.
    pub fn remove_listener(&mut self, listener_key: &str) {
        self.entries.retain(|c| c.listener_key != listener_key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
