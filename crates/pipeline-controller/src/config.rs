//! Controller configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub pipeline: PipelineConfig,
    pub environment: EnvironmentConfig,
    pub sweep: SweepConfig,
}

/// Detection pipeline invocation
///
/// The child is spawned as `<program> <args...> <device> <flags...>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Executable to launch
    pub program: String,

    /// Arguments placed before the device path
    pub args: Vec<String>,

    /// Flags placed after the device path
    pub flags: Vec<String>,

    /// Working directory for the child (inherits ours when unset)
    pub working_dir: Option<PathBuf>,

    /// Grace period between SIGTERM and SIGKILL (milliseconds)
    pub stop_timeout_ms: u64,

    /// Capacity of the pipeline event channel
    pub event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec![
                "basic_pipelines/detection.py".to_string(),
                "--input".to_string(),
            ],
            flags: vec!["--show-fps".to_string(), "--use-frame".to_string()],
            working_dir: None,
            stop_timeout_ms: 2000,
            event_capacity: 256,
        }
    }
}

/// Environment setup script
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Shell used to source the script
    pub shell: String,

    /// Script populating the pipeline environment
    pub setup_script: PathBuf,

    /// Variables that must be set after sourcing
    pub required: Vec<String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            setup_script: PathBuf::from("./setup_env.sh"),
            required: vec!["TAPPAS_POST_PROC_DIR".to_string()],
        }
    }
}

/// Accelerator device holder sweep, run on every stop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Kill every holder of `device_node` on stop. This also hits processes
    /// the controller did not start.
    pub enabled: bool,

    /// Exclusive accelerator device node
    pub device_node: PathBuf,

    /// Tool listing processes holding a file open
    pub lister: String,

    /// Command prefix for `kill -9 <pid>` (elevation)
    pub kill_prefix: Vec<String>,

    /// Upper bound on each lister or kill invocation (milliseconds)
    pub tool_timeout_ms: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device_node: PathBuf::from("/dev/hailo0"),
            lister: "lsof".to_string(),
            kill_prefix: vec!["sudo".to_string(), "-n".to_string()],
            tool_timeout_ms: 5000,
        }
    }
}

impl SweepConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }
}
