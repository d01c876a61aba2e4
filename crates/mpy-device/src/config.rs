//! Session configuration.

use std::time::Duration;

use mpy_protocol::{DEFAULT_STATEMENTS_PER_PASTE, DEFAULT_TRANSFER_RATE};
use serde::{Deserialize, Serialize};

/// Default serial baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Tunables for one device session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Hex characters per read/write statement.
    pub transfer_rate: usize,
    /// Statements sent per raw-paste session.
    pub statements_per_paste: usize,
    /// Timeout for Normal-mode statement round trips (milliseconds).
    pub command_timeout_ms: u64,
    /// Timeout for raw-mode handshakes and executions (milliseconds).
    pub raw_timeout_ms: u64,
    /// Timeout for the raw-mode exit handshake (milliseconds).
    pub exit_raw_timeout_ms: u64,
    /// Pause between lines of a multi-line definition (milliseconds).
    pub line_pacing_ms: u64,
    /// Longest device path accepted, in bytes.
    pub max_path_len: usize,
    /// Maximum in-flight listener commands kept per session.
    pub in_flight_max: usize,
    /// Age after which an unmatched in-flight command is dropped (milliseconds).
    pub in_flight_max_age_ms: u64,
    /// How long a one-shot execute collects output (milliseconds).
    pub settle_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            baud_rate: DEFAULT_BAUD_RATE,
            transfer_rate: DEFAULT_TRANSFER_RATE,
            statements_per_paste: DEFAULT_STATEMENTS_PER_PASTE,
            command_timeout_ms: 1000,
            raw_timeout_ms: 5000,
            exit_raw_timeout_ms: 500,
            line_pacing_ms: 100,
            max_path_len: 255,
            in_flight_max: 64,
            in_flight_max_age_ms: 30_000,
            settle_delay_ms: 500,
        }
    }
}

impl SessionConfig {
    /// Set the baud rate.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the hex characters per statement.
    pub fn with_transfer_rate(mut self, transfer_rate: usize) -> Self {
        self.transfer_rate = transfer_rate;
        self
    }

    /// Set the statements per raw-paste session.
    pub fn with_statements_per_paste(mut self, statements: usize) -> Self {
        self.statements_per_paste = statements;
        self
    }

    /// Set the pause between lines of a multi-line definition.
    pub fn with_line_pacing_ms(mut self, ms: u64) -> Self {
        self.line_pacing_ms = ms;
        self
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn raw_timeout(&self) -> Duration {
        Duration::from_millis(self.raw_timeout_ms)
    }

    pub fn exit_raw_timeout(&self) -> Duration {
        Duration::from_millis(self.exit_raw_timeout_ms)
    }

    pub fn line_pacing(&self) -> Duration {
        Duration::from_millis(self.line_pacing_ms)
    }

    pub fn in_flight_max_age(&self) -> Duration {
        Duration::from_millis(self.in_flight_max_age_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: SessionConfig = serde_yaml::from_str("transfer_rate: 512\nbaud_rate: 9600\n").unwrap();
        assert_eq!(config.transfer_rate, 512);
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.statements_per_paste, DEFAULT_STATEMENTS_PER_PASTE);
        assert_eq!(config.command_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_builders() {
        let config = SessionConfig::default()
            .with_transfer_rate(64)
            .with_statements_per_paste(4)
            .with_line_pacing_ms(0);
        assert_eq!(config.transfer_rate, 64);
        assert_eq!(config.statements_per_paste, 4);
        assert_eq!(config.line_pacing(), Duration::ZERO);
    }
}
