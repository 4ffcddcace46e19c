//! Device info queries (udev)

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::ScanProbeError;

/// Returns the formatted device record for a node
#[async_trait]
pub trait DeviceInfoProvider: Send + Sync {
    async fn query(&self, path: &Path) -> Result<String, ScanProbeError>;
}

/// Queries `udevadm info --query=all --name=<path>`
pub struct UdevadmInfo {
    tool: String,
    timeout: Duration,
}

impl UdevadmInfo {
    pub fn new(tool: impl Into<String>, timeout: Duration) -> Self {
        Self {
            tool: tool.into(),
            timeout,
        }
    }
}

impl Default for UdevadmInfo {
    fn default() -> Self {
        Self::new("udevadm", Duration::from_secs(5))
    }
}

#[async_trait]
impl DeviceInfoProvider for UdevadmInfo {
    async fn query(&self, path: &Path) -> Result<String, ScanProbeError> {
        let query_error = |reason: String| ScanProbeError::InfoQuery {
            path: path.display().to_string(),
            reason,
        };

        let child = Command::new(&self.tool)
            .arg("info")
            .arg("--query=all")
            .arg(format!("--name={}", path.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| query_error(format!("failed to run {}: {}", self.tool, e)))?;

        // Dropping the pending future kills a hung tool
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| query_error(format!("{} timed out after {:?}", self.tool, self.timeout)))?
            .map_err(|e| query_error(format!("failed to read {} output: {}", self.tool, e)))?;

        if !output.status.success() {
            debug!(
                "{} exited with {} for {}: {}",
                self.tool,
                output.status,
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Check whether a device record carries the bus marker as a whole token
/// (udevadm prints properties as `E: ID_BUS=usb`).
pub fn has_bus_marker(record: &str, marker: &str) -> bool {
    record
        .lines()
        .flat_map(str::split_whitespace)
        .any(|token| token == marker)
}
