//! V4L2 capture probe

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::ScanProbeError;

/// `VIDIOC_QUERYCAP` = `_IOR('V', 0, struct v4l2_capability)`
const VIDIOC_QUERYCAP: u64 = 0x8068_5600;

const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
const V4L2_CAP_VIDEO_CAPTURE_MPLANE: u32 = 0x0000_1000;
const V4L2_CAP_DEVICE_CAPS: u32 = 0x8000_0000;

/// struct v4l2_capability (matches videodev2.h)
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct V4l2Capability {
    driver: [u8; 16],
    card: [u8; 32],
    bus_info: [u8; 32],
    version: u32,
    capabilities: u32,
    device_caps: u32,
    reserved: [u32; 3],
}

impl V4l2Capability {
    fn zeroed() -> Self {
        Self {
            driver: [0; 16],
            card: [0; 32],
            bus_info: [0; 32],
            version: 0,
            capabilities: 0,
            device_caps: 0,
            reserved: [0; 3],
        }
    }

    /// Capabilities of this node (device_caps when the driver reports them)
    fn node_caps(&self) -> u32 {
        if self.capabilities & V4L2_CAP_DEVICE_CAPS != 0 {
            self.device_caps
        } else {
            self.capabilities
        }
    }

    fn can_capture(&self) -> bool {
        self.node_caps() & (V4L2_CAP_VIDEO_CAPTURE | V4L2_CAP_VIDEO_CAPTURE_MPLANE) != 0
    }
}

/// Checks that a node opens as a video capture source
pub trait CaptureProbe {
    fn probe(&self, path: &Path) -> Result<(), ScanProbeError>;
}

/// Opens the node and queries its V4L2 capabilities. The handle is closed
/// before returning.
#[derive(Debug, Default)]
pub struct V4l2Probe;

impl CaptureProbe for V4l2Probe {
    fn probe(&self, path: &Path) -> Result<(), ScanProbeError> {
        let display = path.display().to_string();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| ScanProbeError::Open {
                path: display.clone(),
                source,
            })?;

        let mut cap = V4l2Capability::zeroed();
        let ret = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                VIDIOC_QUERYCAP as _,
                &mut cap as *mut V4l2Capability,
            )
        };
        if ret < 0 {
            return Err(ScanProbeError::QueryCap {
                path: display,
                source: io::Error::last_os_error(),
            });
        }

        if !cap.can_capture() {
            return Err(ScanProbeError::NotCapture(display));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_struct_size() {
        // Size is encoded in the ioctl request number
        assert_eq!(std::mem::size_of::<V4l2Capability>(), 104);
        assert_eq!((VIDIOC_QUERYCAP >> 16) & 0x3fff, 104);
    }

    #[test]
    fn test_device_caps_preferred() {
        let mut cap = V4l2Capability::zeroed();
        cap.capabilities = V4L2_CAP_VIDEO_CAPTURE | V4L2_CAP_DEVICE_CAPS;
        cap.device_caps = 0x0080_0000; // metadata capture only
        assert!(!cap.can_capture());

        cap.device_caps = V4L2_CAP_VIDEO_CAPTURE;
        assert!(cap.can_capture());
    }

    #[test]
    fn test_legacy_caps() {
        let mut cap = V4l2Capability::zeroed();
        cap.capabilities = V4L2_CAP_VIDEO_CAPTURE_MPLANE;
        assert!(cap.can_capture());
    }

    #[test]
    fn test_missing_node_is_open_error() {
        let err = V4l2Probe.probe(Path::new("/dev/definitely-no-video99")).unwrap_err();
        assert!(matches!(err, ScanProbeError::Open { .. }));
    }

    #[test]
    fn test_regular_file_is_not_capture() {
        let path = std::env::temp_dir().join(format!("probe-file-{}", std::process::id()));
        std::fs::write(&path, b"").unwrap();
        let err = V4l2Probe.probe(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(err, ScanProbeError::QueryCap { .. }));
    }
}
