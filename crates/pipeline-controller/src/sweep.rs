//! Accelerator device holder sweep
//!
//! Finds every process holding the exclusive accelerator node open and
//! force-kills it. The pipeline can leave such holders behind after its main
//! process exits.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::SweepConfig;
use crate::error::ResourceSweepError;

/// Lists PIDs holding a device node open
#[async_trait]
pub trait ResourceHolderLister: Send + Sync {
    async fn holders(&self, node: &Path) -> Result<Vec<u32>, ResourceSweepError>;
}

/// Forcibly terminates a process
#[async_trait]
pub trait HolderKiller: Send + Sync {
    async fn force_kill(&self, pid: u32) -> Result<(), ResourceSweepError>;
}

/// Run a helper tool to completion. A tool still running after `timeout` is
/// killed and reported as `TimedOut`.
async fn run_bounded(mut command: Command, timeout: Duration) -> io::Result<Output> {
    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("timed out after {:?}", timeout),
        )),
    }
}

/// Lists holders with `lsof <node>`
pub struct LsofLister {
    tool: String,
    timeout: Duration,
}

impl LsofLister {
    pub fn new(tool: impl Into<String>, timeout: Duration) -> Self {
        Self {
            tool: tool.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ResourceHolderLister for LsofLister {
    async fn holders(&self, node: &Path) -> Result<Vec<u32>, ResourceSweepError> {
        let mut command = Command::new(&self.tool);
        command.arg(node);

        let output = run_bounded(command, self.timeout).await.map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                ResourceSweepError::QueryFailed {
                    tool: self.tool.clone(),
                    reason: e.to_string(),
                }
            } else {
                ResourceSweepError::ToolUnavailable {
                    tool: self.tool.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match output.status.code() {
            Some(0) => Ok(parse_lsof_pids(&stdout)),
            // lsof exits 1 when nothing holds the file (or the node is absent)
            Some(1) => {
                debug!(
                    "{} found no holders of {}: {}",
                    self.tool,
                    node.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                Ok(parse_lsof_pids(&stdout))
            }
            _ => Err(ResourceSweepError::QueryFailed {
                tool: self.tool.clone(),
                reason: format!(
                    "{} ({})",
                    String::from_utf8_lossy(&output.stderr).trim(),
                    output.status
                ),
            }),
        }
    }
}

/// Kills with `<prefix...> kill -9 <pid>`
pub struct KillCommand {
    prefix: Vec<String>,
    timeout: Duration,
}

impl KillCommand {
    pub fn new(prefix: Vec<String>, timeout: Duration) -> Self {
        Self { prefix, timeout }
    }
}

#[async_trait]
impl HolderKiller for KillCommand {
    async fn force_kill(&self, pid: u32) -> Result<(), ResourceSweepError> {
        let mut argv = self.prefix.iter().map(String::as_str).chain(["kill", "-9"]);
        let program = argv.next().unwrap_or("kill");

        let mut command = Command::new(program);
        command.args(argv).arg(pid.to_string());

        let output = run_bounded(command, self.timeout)
            .await
            .map_err(|e| ResourceSweepError::KillFailed {
                pid,
                reason: format!("failed to run {}: {}", program, e),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ResourceSweepError::KillFailed {
                pid,
                reason: format!(
                    "{} ({})",
                    String::from_utf8_lossy(&output.stderr).trim(),
                    output.status
                ),
            })
        }
    }
}

/// Parse PIDs from lsof output: column 2 of every line after the header.
/// lsof prints one line per open descriptor, so PIDs are de-duplicated.
pub fn parse_lsof_pids(output: &str) -> Vec<u32> {
    let mut pids = Vec::new();
    for line in output.lines().skip(1) {
        if let Some(pid) = line.split_whitespace().nth(1).and_then(|p| p.parse().ok()) {
            if !pids.contains(&pid) {
                pids.push(pid);
            }
        }
    }
    pids
}

/// Result of one sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Sweeping is turned off in configuration
    Disabled,
    /// Nothing held the node
    NoHolders,
    /// Holders were found; `failed` lists the ones that survived
    Killed {
        killed: Vec<u32>,
        failed: Vec<ResourceSweepError>,
    },
    /// Holders could not be listed
    Failed(ResourceSweepError),
}

/// Sweeps holders of the accelerator node
pub struct ResourceSweeper {
    node: PathBuf,
    enabled: bool,
    lister: Box<dyn ResourceHolderLister>,
    killer: Box<dyn HolderKiller>,
}

impl ResourceSweeper {
    /// Create a sweeper backed by lsof and kill
    pub fn new(config: &SweepConfig) -> Self {
        Self {
            node: config.device_node.clone(),
            enabled: config.enabled,
            lister: Box::new(LsofLister::new(&config.lister, config.tool_timeout())),
            killer: Box::new(KillCommand::new(config.kill_prefix.clone(), config.tool_timeout())),
        }
    }

    /// Create an enabled sweeper from explicit capabilities
    pub fn with_parts(
        node: impl Into<PathBuf>,
        lister: impl ResourceHolderLister + 'static,
        killer: impl HolderKiller + 'static,
    ) -> Self {
        Self {
            node: node.into(),
            enabled: true,
            lister: Box::new(lister),
            killer: Box::new(killer),
        }
    }

    pub fn node(&self) -> &Path {
        &self.node
    }

    /// Kill every process holding the node. Individual kill failures do not
    /// stop the remaining kills.
    pub async fn sweep(&self) -> SweepOutcome {
        if !self.enabled {
            debug!("Resource sweep disabled");
            return SweepOutcome::Disabled;
        }

        let pids = match self.lister.holders(&self.node).await {
            Ok(pids) => pids,
            Err(e) => {
                warn!("Failed to list holders of {}: {}", self.node.display(), e);
                return SweepOutcome::Failed(e);
            }
        };

        if pids.is_empty() {
            debug!("No process holds {}", self.node.display());
            return SweepOutcome::NoHolders;
        }

        let mut killed = Vec::new();
        let mut failed = Vec::new();
        for pid in pids {
            match self.killer.force_kill(pid).await {
                Ok(()) => {
                    info!("Killed pid {} holding {}", pid, self.node.display());
                    killed.push(pid);
                }
                Err(e) => {
                    warn!("{}", e);
                    failed.push(e);
                }
            }
        }

        SweepOutcome::Killed { killed, failed }
    }
}
