//! Detection Pipeline Controller
//!
//! Runs the external camera detection pipeline against a selected USB
//! camera. Owns at most one pipeline process at a time, streams its output
//! as ordered log events, and on every stop force-kills whatever still holds
//! the accelerator device node.

mod controller;
mod error;
mod log;
mod sweep;

pub mod config;
pub mod env;

pub use config::{ControllerConfig, EnvironmentConfig, PipelineConfig, SweepConfig};
pub use controller::{PipelineController, PipelineState, ProcessStop, StopReport};
pub use env::PipelineEnv;
pub use error::{ControllerError, EnvError, ResourceSweepError};
pub use log::{LogBuffer, LogLine, LogStream, PipelineEvent, PipelineEvents};
pub use sweep::{
    parse_lsof_pids, HolderKiller, KillCommand, LsofLister, ResourceHolderLister,
    ResourceSweeper, SweepOutcome,
};

pub use device_scanner::{DevicePath, DeviceScanner};
