//! USB Video Device Discovery
//!
//! Finds camera nodes that are both USB-attached and usable as V4L2
//! capture sources:
//! - Lists `/dev` character devices carrying the camera marker (`video*`)
//! - Keeps devices whose udev record reports the USB bus
//! - Keeps devices that open and advertise video capture

pub mod config;
pub mod info;
pub mod probe;
pub mod scanner;
pub mod source;

pub use config::ScannerConfig;
pub use info::{DeviceInfoProvider, UdevadmInfo};
pub use probe::{CaptureProbe, V4l2Probe};
pub use scanner::DeviceScanner;
pub use source::{DevDirectory, DeviceSource};

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Per-device scan failure. Never aborts a scan, only excludes the device.
#[derive(Error, Debug)]
pub enum ScanProbeError {
    #[error("device info query failed for {path}: {reason}")]
    InfoQuery { path: String, reason: String },

    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("capability query failed for {path}: {source}")]
    QueryCap {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} does not support video capture")]
    NotCapture(String),
}

/// Path of a candidate camera device (e.g. "/dev/video0")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DevicePath(PathBuf);

impl DevicePath {
    /// Wrap a device path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// True when no device was selected
    pub fn is_empty(&self) -> bool {
        self.0.as_os_str().is_empty()
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<&str> for DevicePath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for DevicePath {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

impl From<PathBuf> for DevicePath {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

impl AsRef<Path> for DevicePath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}
