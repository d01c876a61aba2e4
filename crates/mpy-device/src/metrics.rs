//! Metric names used by device sessions.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! host application installs a recorder.

use metrics::{describe_counter, Unit};

/// Bytes written to devices.
pub const BYTES_TX: &str = "mpy.bytes_tx";
/// Bytes received from devices.
pub const BYTES_RX: &str = "mpy.bytes_rx";
/// Filesystem operations started.
pub const FS_OPS: &str = "mpy.fs.ops";
/// Filesystem operations that failed.
pub const FS_FAILURES: &str = "mpy.fs.failures";
/// Raw-paste credit grants received.
pub const RAW_PASTE_CREDIT_GRANTS: &str = "mpy.raw_paste.credit_grants";

/// Register descriptions for every metric. Call once at startup.
pub fn describe_metrics() {
    describe_counter!(BYTES_TX, Unit::Bytes, "Bytes written to devices");
    describe_counter!(BYTES_RX, Unit::Bytes, "Bytes received from devices");
    describe_counter!(FS_OPS, Unit::Count, "Filesystem operations started");
    describe_counter!(FS_FAILURES, Unit::Count, "Filesystem operations that failed");
    describe_counter!(
        RAW_PASTE_CREDIT_GRANTS,
        Unit::Count,
        "Raw-paste window credit grants received"
    );
}
