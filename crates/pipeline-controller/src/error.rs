//! Controller Error Types

use thiserror::Error;

/// Errors returned by controller operations
#[derive(Debug, Error)]
pub enum ControllerError {
    /// No camera selected
    #[error("Please select a USB camera.")]
    Validation,

    /// A pipeline process is already running
    #[error("Pipeline already running (pid {pid}).")]
    Conflict { pid: u32 },

    /// The pipeline process failed to launch
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The controller was built without a usable environment
    #[error("{0}")]
    Configuration(#[from] EnvError),
}

/// Pipeline environment setup errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    /// The setup script could not be sourced
    #[error("Failed to source {script}: {reason}")]
    Source { script: String, reason: String },

    /// A required variable is absent after sourcing
    #[error("{name} is not set. Check the {script} script.")]
    MissingVariable { name: String, script: String },
}

/// Resource sweep failures. Reported with the stop outcome, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceSweepError {
    /// The holder query tool could not be run
    #[error("failed to run {tool}: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    /// The holder query tool reported an error
    #[error("{tool} failed: {reason}")]
    QueryFailed { tool: String, reason: String },

    /// A holder could not be killed
    #[error("failed to kill pid {pid}: {reason}")]
    KillFailed { pid: u32, reason: String },
}
