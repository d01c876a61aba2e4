//! YAML configuration for `mpyctl`.
//!
//! ```yaml
//! defaults:
//!   transfer_rate: 512
//!   raw_timeout_ms: 10000
//! devices:
//!   /dev/ttyACM0:
//!     name: Sera NX040 DVK
//!     baud_rate: 115200
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use mpy_device::{DeviceIdentity, SessionConfig};
use serde::{Deserialize, Serialize};

/// Per-device overrides, keyed by port path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceOverride {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub baud_rate: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub defaults: SessionConfig,
    #[serde(default)]
    pub devices: HashMap<String, DeviceOverride>,
}

impl CliConfig {
    /// Load `path`, or the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(CliConfig::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        CliConfig::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Session config with the command-line baud rate applied.
    pub fn session_config(&self, baud_rate: Option<u32>) -> SessionConfig {
        match baud_rate {
            Some(baud_rate) => self.defaults.clone().with_baud_rate(baud_rate),
            None => self.defaults.clone(),
        }
    }

    /// Identity for `port`. USB ids pick the board's capabilities; the
    /// per-device section and then the command line override the rest.
    pub fn identity(&self, port: &str, baud_rate: Option<u32>, usb: Option<(u16, u16)>) -> DeviceIdentity {
        let mut identity = match usb {
            Some((vendor_id, product_id)) => DeviceIdentity::from_usb(port, vendor_id, product_id),
            None => DeviceIdentity::new(port),
        };
        if let Some(device) = self.devices.get(port) {
            if let Some(name) = &device.name {
                identity = identity.with_name(name.clone());
            }
            if let Some(baud_rate) = device.baud_rate {
                identity = identity.with_baud_rate(baud_rate);
            }
        }
        if let Some(baud_rate) = baud_rate {
            identity = identity.with_baud_rate(baud_rate);
        }
        identity
    }
}

/// Parse `VID:PID` in decimal or `0x` hex.
pub fn parse_usb_id(text: &str) -> Result<(u16, u16), String> {
    let (vid, pid) = text
        .split_once(':')
        .ok_or_else(|| format!("expected VID:PID, got {:?}", text))?;
    Ok((parse_u16(vid)?, parse_u16(pid)?))
}

fn parse_u16(text: &str) -> Result<u16, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid id {:?}: {}", text, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let config = CliConfig::parse(
            "defaults:\n  transfer_rate: 512\ndevices:\n  /dev/ttyACM0:\n    name: bench board\n    baud_rate: 57600\n",
        )
        .unwrap();
        assert_eq!(config.defaults.transfer_rate, 512);
        assert_eq!(config.defaults.statements_per_paste, 16);

        let identity = config.identity("/dev/ttyACM0", None, None);
        assert_eq!(identity.name, "bench board");
        assert_eq!(identity.baud_rate, Some(57600));

        let identity = config.identity("/dev/ttyACM0", Some(9600), None);
        assert_eq!(identity.baud_rate, Some(9600));
    }

    #[test]
    fn test_usb_ids_pick_capabilities() {
        let config = CliConfig::default();
        let identity = config.identity("/dev/ttyUSB0", None, Some(parse_usb_id("1027:24577").unwrap()));
        assert!(!identity.capabilities.repl);
        assert_eq!(parse_usb_id("0x2e8a:0x0005").unwrap(), (0x2e8a, 5));
        assert!(parse_usb_id("2e8a").is_err());
    }
}
