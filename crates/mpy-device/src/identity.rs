//! Device identity and capabilities.
//!
//! Discovery happens elsewhere; this module only describes what a discovered
//! device is and what it can do. Capabilities for known USB boards come from
//! a fixed vendor/product table.

use serde::{Deserialize, Serialize};

/// What a Ctrl-D outside raw mode does on this board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EofKind {
    /// EOF is not supported.
    None,
    /// The USB device disconnects.
    Disconnect,
    /// The board soft-restarts.
    Restart,
}

/// Protocol features a device supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Runs a MicroPython REPL.
    pub repl: bool,
    /// Accepts Ctrl-C.
    pub brk: bool,
    /// Ctrl-D behaviour.
    pub eof: EofKind,
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities {
            repl: true,
            brk: true,
            eof: EofKind::Restart,
        }
    }
}

/// A board with known capabilities.
#[derive(Debug, Clone, Copy)]
pub struct KnownBoard {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: &'static str,
    pub product: &'static str,
    pub description: &'static str,
    pub capabilities: Capabilities,
}

const KNOWN_BOARDS: &[KnownBoard] = &[
    KnownBoard {
        vendor_id: 1027,
        product_id: 24577,
        manufacturer: "FTDI",
        product: "BL654 US 1.0",
        description: "Laird Dongle Running Laird SmartBASIC Firmware",
        capabilities: Capabilities {
            repl: false,
            brk: false,
            eof: EofKind::None,
        },
    },
    KnownBoard {
        vendor_id: 6421,
        product_id: 21023,
        manufacturer: "Nordic Semiconductor",
        product: "nRF52840 USB Adapter",
        description: "Stock Dongle",
        capabilities: Capabilities {
            repl: false,
            brk: false,
            eof: EofKind::Disconnect,
        },
    },
    KnownBoard {
        vendor_id: 12259,
        product_id: 4,
        manufacturer: "ZEPHYR",
        product: "BL654 USB Adapter",
        description: "Dongle Running Laird Micro-Python Firmware",
        capabilities: Capabilities {
            repl: true,
            brk: true,
            eof: EofKind::Disconnect,
        },
    },
    KnownBoard {
        vendor_id: 11914,
        product_id: 12,
        manufacturer: "Laird Connectivity",
        product: "Sera NX040 DVK",
        description: "Sera NX040 DVK Running Laird Micro-Python Firmware",
        capabilities: Capabilities {
            repl: true,
            brk: true,
            eof: EofKind::Restart,
        },
    },
];

/// All boards with known capabilities.
pub fn known_boards() -> &'static [KnownBoard] {
    KNOWN_BOARDS
}

/// Look up a board by USB vendor and product id.
pub fn find_board(vendor_id: u16, product_id: u16) -> Option<&'static KnownBoard> {
    KNOWN_BOARDS
        .iter()
        .find(|b| b.vendor_id == vendor_id && b.product_id == product_id)
}

/// Identity of one physical device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Port path, e.g. `/dev/ttyACM0`, `COM3` or `tcp://host:port`.
    pub path: String,
    /// Display name.
    pub name: String,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub vendor_id: Option<u16>,
    #[serde(default)]
    pub product_id: Option<u16>,
    /// Baud rate override for this device.
    #[serde(default)]
    pub baud_rate: Option<u32>,
    #[serde(default)]
    pub capabilities: Capabilities,
}

impl DeviceIdentity {
    /// Identity for a port with default (full REPL) capabilities.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        DeviceIdentity {
            name: path.clone(),
            path,
            serial_number: None,
            vendor_id: None,
            product_id: None,
            baud_rate: None,
            capabilities: Capabilities::default(),
        }
    }

    /// Identity for a USB device, with capabilities from the board table.
    pub fn from_usb(path: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        let mut identity = DeviceIdentity::new(path);
        identity.vendor_id = Some(vendor_id);
        identity.product_id = Some(product_id);
        if let Some(board) = find_board(vendor_id, product_id) {
            identity.name = board.product.to_string();
            identity.capabilities = board.capabilities;
        }
        identity
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the baud rate override.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = Some(baud_rate);
        self
    }

    /// Set the capabilities.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_board_lookup() {
        let identity = DeviceIdentity::from_usb("/dev/ttyACM0", 11914, 12);
        assert_eq!(identity.name, "Sera NX040 DVK");
        assert!(identity.capabilities.repl);
        assert_eq!(identity.capabilities.eof, EofKind::Restart);

        let identity = DeviceIdentity::from_usb("/dev/ttyUSB0", 1027, 24577);
        assert!(!identity.capabilities.repl);
        assert!(!identity.capabilities.brk);
    }

    #[test]
    fn test_unknown_board_defaults_to_repl() {
        let identity = DeviceIdentity::from_usb("/dev/ttyACM1", 0x2e8a, 0x0005);
        assert_eq!(identity.name, "/dev/ttyACM1");
        assert_eq!(identity.capabilities, Capabilities::default());
    }
}
