//! Pipeline Controller Implementation

use device_scanner::{DevicePath, DeviceScanner};
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{ControllerConfig, PipelineConfig};
use crate::env::PipelineEnv;
use crate::error::{ControllerError, EnvError};
use crate::log::{LogTail, PipelineEvent, PipelineEvents};
use crate::sweep::{ResourceSweeper, SweepOutcome};

/// Observable controller state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running { device: DevicePath, pid: u32 },
}

/// How the pipeline process was brought down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStop {
    /// Exited within the grace period after SIGTERM
    Terminated { pid: u32 },
    /// Force-killed after the grace period
    Killed { pid: u32 },
    /// No pipeline was running
    NothingToStop,
}

/// Outcome of `stop()`: both parts are informational, neither is fatal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    pub process: ProcessStop,
    pub sweep: SweepOutcome,
}

impl StopReport {
    /// Human-readable status line
    pub fn status_message(&self, node: &Path) -> String {
        let mut message = match self.process {
            ProcessStop::Terminated { .. } | ProcessStop::Killed { .. } => {
                "Pipeline process stopped.".to_string()
            }
            ProcessStop::NothingToStop => "No running pipeline to stop.".to_string(),
        };

        match &self.sweep {
            SweepOutcome::Disabled => {}
            SweepOutcome::NoHolders => {
                message.push_str(&format!(" No process found using {}.", node.display()));
            }
            SweepOutcome::Killed { failed, .. } if failed.is_empty() => {
                message.push_str(" Hailo device process killed.");
            }
            SweepOutcome::Killed { failed, .. } => {
                message.push_str(&format!(" Error stopping Hailo device: {}", failed[0]));
            }
            SweepOutcome::Failed(e) => {
                message.push_str(&format!(" Error stopping Hailo device: {}", e));
            }
        }

        message
    }
}

/// The single pipeline run owned by the controller
struct PipelineProcess {
    child: Child,
    pid: u32,
    device: DevicePath,
    tail: LogTail,
}

/// Owns device discovery, the pipeline process, and the accelerator sweep.
///
/// `start` and `stop` take `&mut self`, so state transitions never overlap.
/// Process operations must be called from within a tokio runtime.
pub struct PipelineController {
    config: PipelineConfig,
    env: Result<PipelineEnv, EnvError>,
    scanner: DeviceScanner,
    sweeper: ResourceSweeper,
    process: Option<PipelineProcess>,
    /// Log tail of a pipeline that exited on its own, still forwarding
    /// buffered output
    draining: Option<LogTail>,
    events_tx: mpsc::Sender<PipelineEvent>,
    events_rx: Option<PipelineEvents>,
    status: String,
}

impl PipelineController {
    /// Create a controller, sourcing the pipeline environment from the setup
    /// script. A sourcing failure leaves the controller refusing every
    /// operation with that error.
    pub fn new(config: ControllerConfig, scanner: DeviceScanner) -> Self {
        let env = PipelineEnv::source(&config.environment);
        Self::with_environment(config, env, scanner)
    }

    /// Create a controller with an already resolved environment
    pub fn with_environment(
        config: ControllerConfig,
        env: Result<PipelineEnv, EnvError>,
        scanner: DeviceScanner,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.pipeline.event_capacity.max(1));

        let status = match &env {
            Ok(_) => "Pipeline Status: Not Started".to_string(),
            Err(e) => {
                error!("Pipeline environment unavailable: {}", e);
                format!("Error: {}", e)
            }
        };

        Self {
            sweeper: ResourceSweeper::new(&config.sweep),
            config: config.pipeline,
            env,
            scanner,
            process: None,
            draining: None,
            events_tx,
            events_rx: Some(events_rx),
            status,
        }
    }

    /// Replace the accelerator sweeper
    pub fn with_sweeper(mut self, sweeper: ResourceSweeper) -> Self {
        self.sweeper = sweeper;
        self
    }

    /// Take the event stream (log lines and exit notices). Yields `None` after
    /// the first call.
    pub fn take_events(&mut self) -> Option<PipelineEvents> {
        self.events_rx.take()
    }

    /// Current status message
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Replace the status message (presentation-only actions such as clearing logs)
    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    /// The configuration error, if the controller is disabled
    pub fn configuration_error(&self) -> Option<&EnvError> {
        self.env.as_ref().err()
    }

    /// Current state, after reaping a pipeline that exited on its own
    pub fn state(&mut self) -> PipelineState {
        self.refresh();
        match &self.process {
            Some(process) => PipelineState::Running {
                device: process.device.clone(),
                pid: process.pid,
            },
            None => PipelineState::Idle,
        }
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.state(), PipelineState::Running { .. })
    }

    /// Scan for USB cameras
    pub async fn scan(&mut self) -> Result<Vec<DevicePath>, ControllerError> {
        self.refuse_if_unconfigured()?;

        let devices = self.scanner.scan().await;
        self.status = if devices.is_empty() {
            "No USB cameras found.".to_string()
        } else {
            "Device list refreshed.".to_string()
        };
        Ok(devices)
    }

    /// Launch the pipeline on `device` and start tailing its output
    pub fn start(&mut self, device: &DevicePath) -> Result<u32, ControllerError> {
        let result = self.spawn_pipeline(device);
        self.status = match &result {
            Ok(_) => format!("Pipeline Status: Running on {}...", device),
            Err(e) => format!("Error: {}", e),
        };
        result
    }

    fn spawn_pipeline(&mut self, device: &DevicePath) -> Result<u32, ControllerError> {
        self.ensure_configured()?;

        if device.is_empty() {
            return Err(ControllerError::Validation);
        }

        self.refresh();
        if let Some(process) = &self.process {
            warn!("Pipeline already running on {} (pid {})", process.device, process.pid);
            return Err(ControllerError::Conflict { pid: process.pid });
        }

        if let Some(tail) = self.draining.take() {
            debug!("Dropping remaining output of pipeline {}", tail.pid());
            tail.cancel();
        }

        let env = self.env.as_ref().map_err(|e| e.clone())?;

        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .arg(device.as_path())
            .args(&self.config.flags)
            .env_clear()
            .envs(env.vars())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| ControllerError::Spawn {
            program: self.config.program.clone(),
            source,
        })?;

        let pid = child.id().ok_or_else(|| ControllerError::Spawn {
            program: self.config.program.clone(),
            source: io::Error::other("process exited before its pid was read"),
        })?;

        info!("Pipeline started on {} (pid {})", device, pid);

        let tail = LogTail::spawn(
            pid,
            child.stdout.take(),
            child.stderr.take(),
            self.events_tx.clone(),
        );

        self.process = Some(PipelineProcess {
            child,
            pid,
            device: device.clone(),
            tail,
        });

        Ok(pid)
    }

    /// Stop the pipeline (SIGTERM, then SIGKILL after the grace period) and
    /// sweep holders of the accelerator node.
    ///
    /// The sweep runs even when nothing was running. The controller is idle,
    /// with no log tail left publishing, afterwards whatever happened.
    pub async fn stop(&mut self) -> Result<StopReport, ControllerError> {
        self.refuse_if_unconfigured()?;

        self.refresh();
        if let Some(tail) = self.draining.take() {
            debug!("Stopping log tail of exited pipeline {}", tail.pid());
            tail.shutdown(self.grace()).await;
        }

        let process = match self.process.take() {
            Some(process) => self.terminate(process).await,
            None => {
                info!("No running pipeline to stop");
                ProcessStop::NothingToStop
            }
        };

        let report = StopReport {
            process,
            sweep: self.sweeper.sweep().await,
        };
        self.status = report.status_message(self.sweeper.node());
        Ok(report)
    }

    fn grace(&self) -> Duration {
        Duration::from_millis(self.config.stop_timeout_ms)
    }

    async fn terminate(&self, mut process: PipelineProcess) -> ProcessStop {
        let pid = process.pid;
        let grace = self.grace();

        process.tail.cancel();

        if let Err(e) = send_sigterm(pid) {
            warn!("Failed to send SIGTERM to pipeline {}: {}", pid, e);
        }

        let outcome = match tokio::time::timeout(grace, process.child.wait()).await {
            Ok(Ok(status)) => {
                info!("Pipeline {} exited: {}", pid, status);
                ProcessStop::Terminated { pid }
            }
            Ok(Err(e)) => {
                warn!("Failed to wait for pipeline {}: {}", pid, e);
                force_kill(&mut process.child, pid).await
            }
            Err(_) => {
                warn!("Pipeline {} still alive after {:?}, killing", pid, grace);
                force_kill(&mut process.child, pid).await
            }
        };

        process.tail.shutdown(grace).await;
        outcome
    }

    /// Free the process slot if the pipeline exited by itself. Its log tail
    /// keeps forwarding buffered output until the next start or stop.
    fn refresh(&mut self) {
        let exited = match self.process.as_mut() {
            Some(process) => match process.child.try_wait() {
                Ok(Some(status)) => Some((process.pid, status)),
                Ok(None) => None,
                Err(e) => {
                    warn!("Failed to poll pipeline {}: {}", process.pid, e);
                    None
                }
            },
            None => None,
        };

        if let Some((pid, status)) = exited {
            info!("Pipeline {} exited on its own: {}", pid, status);
            if let Some(process) = self.process.take() {
                if let Some(previous) = self.draining.replace(process.tail) {
                    previous.cancel();
                }
            }
            self.status = format!("Pipeline exited ({}).", status);
        }
    }

    fn ensure_configured(&self) -> Result<(), ControllerError> {
        match &self.env {
            Ok(_) => Ok(()),
            Err(e) => Err(ControllerError::Configuration(e.clone())),
        }
    }

    fn refuse_if_unconfigured(&mut self) -> Result<(), ControllerError> {
        let result = self.ensure_configured();
        if let Err(e) = &result {
            self.status = format!("Error: {}", e);
        }
        result
    }
}

fn send_sigterm(pid: u32) -> io::Result<()> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

async fn force_kill(child: &mut Child, pid: u32) -> ProcessStop {
    if let Err(e) = child.kill().await {
        error!("Failed to kill pipeline {}: {}", pid, e);
    } else {
        debug!("Pipeline {} killed", pid);
    }
    ProcessStop::Killed { pid }
}
