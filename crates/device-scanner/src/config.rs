//! Scanner configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Device scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Directory holding device nodes
    pub device_dir: PathBuf,

    /// Substring a node name must contain to be considered a camera
    pub name_marker: String,

    /// Device info utility (queried as `<tool> info --query=all --name=<path>`)
    pub info_tool: String,

    /// Upper bound on one device info query (milliseconds)
    pub info_timeout_ms: u64,

    /// Token in the device info record marking a USB-attached device
    pub bus_marker: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            device_dir: PathBuf::from("/dev"),
            name_marker: "video".to_string(),
            info_tool: "udevadm".to_string(),
            info_timeout_ms: 5000,
            bus_marker: "ID_BUS=usb".to_string(),
        }
    }
}

impl ScannerConfig {
    pub fn info_timeout(&self) -> Duration {
        Duration::from_millis(self.info_timeout_ms)
    }
}
