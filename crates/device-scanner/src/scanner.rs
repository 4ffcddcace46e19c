//! USB camera scanner

use tracing::{debug, error, info, warn};

use crate::config::ScannerConfig;
use crate::info::{has_bus_marker, DeviceInfoProvider, UdevadmInfo};
use crate::probe::{CaptureProbe, V4l2Probe};
use crate::source::{DevDirectory, DeviceSource};
use crate::DevicePath;

/// Scans for USB-attached, capture-capable video devices
pub struct DeviceScanner {
    source: Box<dyn DeviceSource + Send + Sync>,
    info: Box<dyn DeviceInfoProvider>,
    probe: Box<dyn CaptureProbe + Send + Sync>,
    bus_marker: String,
}

impl DeviceScanner {
    /// Create a scanner backed by the device directory, udevadm and V4L2
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            source: Box::new(DevDirectory::new(&config.device_dir, &config.name_marker)),
            info: Box::new(UdevadmInfo::new(&config.info_tool, config.info_timeout())),
            probe: Box::new(V4l2Probe),
            bus_marker: config.bus_marker.clone(),
        }
    }

    /// Create a scanner from explicit capabilities
    pub fn with_parts(
        source: impl DeviceSource + Send + Sync + 'static,
        info: impl DeviceInfoProvider + 'static,
        probe: impl CaptureProbe + Send + Sync + 'static,
        bus_marker: impl Into<String>,
    ) -> Self {
        Self {
            source: Box::new(source),
            info: Box::new(info),
            probe: Box::new(probe),
            bus_marker: bus_marker.into(),
        }
    }

    /// Return USB cameras that open as capture devices, in enumeration order.
    ///
    /// Per-device failures exclude that device and are logged.
    pub async fn scan(&self) -> Vec<DevicePath> {
        let candidates = match self.source.candidates() {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("Failed to list video devices: {}", e);
                return Vec::new();
            }
        };

        let mut devices = Vec::new();
        for device in candidates {
            if self.is_usb(&device).await && self.opens_as_capture(&device) {
                devices.push(device);
            }
        }

        info!("Found {} USB camera(s)", devices.len());
        devices
    }

    async fn is_usb(&self, device: &DevicePath) -> bool {
        match self.info.query(device.as_path()).await {
            Ok(record) => {
                let usb = has_bus_marker(&record, &self.bus_marker);
                if !usb {
                    debug!("Skipping {}: not on USB bus", device);
                }
                usb
            }
            Err(e) => {
                warn!("Error checking device {}: {}", device, e);
                false
            }
        }
    }

    fn opens_as_capture(&self, device: &DevicePath) -> bool {
        match self.probe.probe(device.as_path()) {
            Ok(()) => true,
            Err(e) => {
                warn!("Skipping {}: {}", device, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScanProbeError;
    use std::collections::HashMap;
    use std::io;
    use std::path::Path;

    struct FakeSource(Vec<&'static str>);

    impl DeviceSource for FakeSource {
        fn candidates(&self) -> io::Result<Vec<DevicePath>> {
            Ok(self.0.iter().map(|p| DevicePath::from(*p)).collect())
        }
    }

    struct FailingSource;

    impl DeviceSource for FailingSource {
        fn candidates(&self) -> io::Result<Vec<DevicePath>> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        }
    }

    /// Device record per path; missing entries fail the query
    struct FakeInfo(HashMap<&'static str, &'static str>);

    #[async_trait::async_trait]
    impl DeviceInfoProvider for FakeInfo {
        async fn query(&self, path: &Path) -> Result<String, ScanProbeError> {
            let key = path.to_str().unwrap_or_default();
            self.0
                .get(key)
                .map(|record| record.to_string())
                .ok_or_else(|| ScanProbeError::InfoQuery {
                    path: key.to_string(),
                    reason: "no such device".to_string(),
                })
        }
    }

    /// Paths that open successfully
    struct FakeProbe(Vec<&'static str>);

    impl CaptureProbe for FakeProbe {
        fn probe(&self, path: &Path) -> Result<(), ScanProbeError> {
            let key = path.to_str().unwrap_or_default();
            if self.0.iter().any(|p| *p == key) {
                Ok(())
            } else {
                Err(ScanProbeError::NotCapture(key.to_string()))
            }
        }
    }

    const USB: &str = "E: ID_BUS=usb\nE: ID_MODEL=Cam";
    const PLATFORM: &str = "E: SUBSYSTEM=video4linux";

    #[tokio::test]
    async fn test_scan_filters_usb_and_capture() {
        let scanner = DeviceScanner::with_parts(
            FakeSource(vec!["/dev/video0", "/dev/video1", "/dev/video2"]),
            // video0: USB but fails to open
            // video1: opens but is not USB
            // video2: passes both checks
            FakeInfo(HashMap::from([
                ("/dev/video0", USB),
                ("/dev/video1", PLATFORM),
                ("/dev/video2", USB),
            ])),
            FakeProbe(vec!["/dev/video1", "/dev/video2"]),
            "ID_BUS=usb",
        );

        assert_eq!(scanner.scan().await, vec![DevicePath::from("/dev/video2")]);
    }

    #[tokio::test]
    async fn test_scan_preserves_order() {
        let scanner = DeviceScanner::with_parts(
            FakeSource(vec!["/dev/video4", "/dev/video0", "/dev/video2"]),
            FakeInfo(HashMap::from([
                ("/dev/video4", USB),
                ("/dev/video0", USB),
                ("/dev/video2", USB),
            ])),
            FakeProbe(vec!["/dev/video0", "/dev/video2", "/dev/video4"]),
            "ID_BUS=usb",
        );

        assert_eq!(
            scanner.scan().await,
            vec![
                DevicePath::from("/dev/video4"),
                DevicePath::from("/dev/video0"),
                DevicePath::from("/dev/video2"),
            ]
        );
    }

    #[tokio::test]
    async fn test_info_failure_excludes_only_that_device() {
        let scanner = DeviceScanner::with_parts(
            FakeSource(vec!["/dev/video0", "/dev/video1"]),
            FakeInfo(HashMap::from([("/dev/video1", USB)])),
            FakeProbe(vec!["/dev/video0", "/dev/video1"]),
            "ID_BUS=usb",
        );

        assert_eq!(scanner.scan().await, vec![DevicePath::from("/dev/video1")]);
    }

    #[tokio::test]
    async fn test_listing_failure_yields_empty() {
        let scanner = DeviceScanner::with_parts(
            FailingSource,
            FakeInfo(HashMap::new()),
            FakeProbe(vec![]),
            "ID_BUS=usb",
        );

        assert!(scanner.scan().await.is_empty());
    }
}
