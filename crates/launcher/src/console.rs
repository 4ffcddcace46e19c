//! Interactive console
//!
//! Line commands from stdin drive the controller; pipeline output is printed
//! as it arrives and kept in the log buffer.

use device_scanner::DevicePath;
use pipeline_controller::{
    LogBuffer, LogStream, PipelineController, PipelineEvent, PipelineEvents, PipelineState,
};
use std::fmt::Write as _;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info};

pub const HELP: &str = "\
Commands:
  devices            list cameras found by the last scan
  refresh            rescan for USB cameras
  select <n|path>    choose a camera by list index or device path
  run                start the detection pipeline on the selected camera
  stop               stop the pipeline and free the accelerator
  clear              clear the log
  logs               show the log
  status             show pipeline status
  help               show this help
  quit               stop the pipeline and exit";

/// A console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Devices,
    Refresh,
    Select(String),
    Run,
    Stop,
    Clear,
    Logs,
    Status,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default();
        let argument = words.next();

        match (command, argument) {
            ("devices" | "ls", None) => Ok(Command::Devices),
            ("refresh" | "scan", None) => Ok(Command::Refresh),
            ("select", Some(target)) => Ok(Command::Select(target.to_string())),
            ("select", None) => Err("Usage: select <index|path>".to_string()),
            ("run" | "start", None) => Ok(Command::Run),
            ("stop", None) => Ok(Command::Stop),
            ("clear", None) => Ok(Command::Clear),
            ("logs", None) => Ok(Command::Logs),
            ("status", None) => Ok(Command::Status),
            ("help" | "?", None) => Ok(Command::Help),
            ("quit" | "exit", None) => Ok(Command::Quit),
            ("", _) => Err(String::new()),
            _ => Err(format!("Unknown command '{}'. Type 'help'.", line.trim())),
        }
    }
}

/// Presentation state: device list, selection, and the log buffer
pub struct Console {
    controller: PipelineController,
    devices: Vec<DevicePath>,
    selected: Option<DevicePath>,
    logs: LogBuffer,
    /// Pid of the last started run; the log buffer holds its output only
    current_run: Option<u32>,
}

impl Console {
    /// Create the console and run the initial device scan
    pub async fn new(controller: PipelineController, preselect: Option<DevicePath>) -> Self {
        let mut console = Self {
            controller,
            devices: Vec::new(),
            selected: None,
            logs: LogBuffer::new(),
            current_run: None,
        };

        if console.controller.configuration_error().is_none() {
            console.devices = console.controller.scan().await.unwrap_or_default();
            console.selected = preselect.or_else(|| console.devices.first().cloned());
        }

        console
    }

    pub fn status(&self) -> &str {
        self.controller.status()
    }

    pub fn devices(&self) -> &[DevicePath] {
        &self.devices
    }

    pub fn selected(&self) -> Option<&DevicePath> {
        self.selected.as_ref()
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    pub fn current_run(&self) -> Option<u32> {
        self.current_run
    }

    pub fn controller_mut(&mut self) -> &mut PipelineController {
        &mut self.controller
    }

    /// Rescan for cameras, keeping the selection if it is still present
    pub async fn refresh_devices(&mut self) {
        match self.controller.scan().await {
            Ok(devices) => {
                if let Some(selected) = &self.selected {
                    if !devices.contains(selected) {
                        self.selected = None;
                    }
                }
                self.devices = devices;
            }
            Err(e) => {
                debug!("Refresh refused: {}", e);
            }
        }
    }

    /// Select a camera by list index or by path from the device list
    pub fn select(&mut self, target: &str) {
        let device = match target.parse::<usize>() {
            Ok(index) => self.devices.get(index).cloned(),
            Err(_) => self
                .devices
                .iter()
                .find(|device| device.to_string() == target)
                .cloned(),
        };

        match device {
            Some(device) => {
                self.controller.set_status(format!("Selected {}.", device));
                self.selected = Some(device);
            }
            None => {
                self.controller
                    .set_status(format!("Error: Unknown camera '{}'.", target));
            }
        }
    }

    /// Start the pipeline on the selected camera. A new run clears the log.
    pub fn run_pipeline(&mut self) {
        let device = self.selected.clone().unwrap_or_default();
        if let Ok(pid) = self.controller.start(&device) {
            self.logs.clear();
            self.current_run = Some(pid);
        }
    }

    /// Stop the pipeline; the outcome lands in the status message
    pub async fn stop_pipeline(&mut self) {
        match self.controller.stop().await {
            Ok(report) => debug!("Stop finished: {:?}, sweep {:?}", report.process, report.sweep),
            Err(e) => debug!("Stop refused: {}", e),
        }
    }

    pub fn clear_logs(&mut self) {
        self.logs.clear();
        self.controller.set_status("Logs cleared.");
    }

    /// Record a pipeline event; returns the text to print, if any.
    /// Output of runs other than the current one is dropped.
    pub fn on_event(&mut self, event: PipelineEvent) -> Option<String> {
        if self.current_run != Some(event.pid()) {
            debug!("Dropping event of previous run {}", event.pid());
            return None;
        }

        match event {
            PipelineEvent::Line { line, .. } => {
                let text = match line.stream {
                    LogStream::Stdout => format!("  | {}", line.text),
                    LogStream::Stderr => format!("  ! {}", line.text),
                };
                self.logs.push(line);
                Some(text)
            }
            PipelineEvent::Exited { pid } => {
                info!("Pipeline {} output closed", pid);
                // Reaps the process and updates the status when it is gone
                self.controller.state();
                Some(self.status().to_string())
            }
        }
    }

    /// Execute a command and return the text to print
    pub async fn execute(&mut self, command: &Command) -> String {
        match command {
            Command::Devices => self.render_devices(),
            Command::Refresh => {
                self.refresh_devices().await;
                format!("{}\n{}", self.status(), self.render_devices())
            }
            Command::Select(target) => {
                self.select(target);
                self.status().to_string()
            }
            Command::Run => {
                self.run_pipeline();
                self.status().to_string()
            }
            Command::Stop => {
                self.stop_pipeline().await;
                self.status().to_string()
            }
            Command::Clear => {
                self.clear_logs();
                self.status().to_string()
            }
            Command::Logs => self.render_logs(),
            Command::Status => self.render_status(),
            Command::Help => HELP.to_string(),
            Command::Quit => String::new(),
        }
    }

    /// Stop a running pipeline before exit
    pub async fn shutdown(&mut self) {
        if self.controller.is_running() {
            info!("Stopping pipeline before exit");
            self.stop_pipeline().await;
        }
    }

    fn render_devices(&self) -> String {
        if self.devices.is_empty() {
            return "No USB cameras found.".to_string();
        }

        let mut out = String::from("USB cameras:");
        for (index, device) in self.devices.iter().enumerate() {
            let marker = if self.selected.as_ref() == Some(device) { "*" } else { " " };
            let _ = write!(out, "\n {} [{}] {}", marker, index, device);
        }
        out
    }

    fn render_logs(&self) -> String {
        if self.logs.is_empty() {
            return "(log is empty)".to_string();
        }

        self.logs
            .lines()
            .iter()
            .map(|line| format!("{} {}", line.received_at.format("%H:%M:%S"), line.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render_status(&mut self) -> String {
        let state = match self.controller.state() {
            PipelineState::Idle => "idle".to_string(),
            PipelineState::Running { device, pid } => format!("running on {} (pid {})", device, pid),
        };
        format!("{}\nPipeline: {}", self.status(), state)
    }
}

/// Run the console until `quit`, end of input, or Ctrl-C
pub async fn run<R>(mut console: Console, mut events: PipelineEvents, input: R) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut input = input.lines();

    println!("USB Camera Detection");
    println!("{}", console.execute(&Command::Devices).await);
    println!("{}", console.status());
    println!("Type 'help' for commands.");

    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line? else {
                    debug!("Console input closed");
                    break;
                };
                match line.parse::<Command>() {
                    Ok(Command::Quit) => break,
                    Ok(command) => println!("{}", console.execute(&command).await),
                    Err(message) if message.is_empty() => {}
                    Err(message) => println!("{}", message),
                }
            }
            Some(event) = events.recv() => {
                if let Some(text) = console.on_event(event) {
                    println!("{}", text);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    console.shutdown().await;
    println!("{}", console.status());
    Ok(())
}
