//! USB Camera Detection Launcher
//!
//! Terminal front-end over the pipeline controller: pick a USB camera, run
//! the detection pipeline on it, follow its logs, and stop it again.

pub mod cli;
pub mod console;

use anyhow::Context;
use device_scanner::ScannerConfig;
use pipeline_controller::{ControllerConfig, EnvironmentConfig, PipelineConfig, SweepConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_NAME: &str = "launcher";

/// Prefix of environment variable overrides (`LAUNCHER__PIPELINE__PROGRAM=...`)
pub const ENV_PREFIX: &str = "LAUNCHER";

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Maximum level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Launcher configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub logging: LoggingConfig,
    pub scanner: ScannerConfig,
    pub pipeline: PipelineConfig,
    pub environment: EnvironmentConfig,
    pub sweep: SweepConfig,
}

impl LauncherConfig {
    /// Controller part of the configuration
    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            pipeline: self.pipeline.clone(),
            environment: self.environment.clone(),
            sweep: self.sweep.clone(),
        }
    }
}

/// Load configuration from a TOML file overlaid with environment variables.
///
/// An explicit `path` must exist; otherwise `launcher.toml` is read when present.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<LauncherConfig> {
    let file = match path {
        Some(path) => config::File::from(path).required(true),
        None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
    };

    let settings = config::Config::builder()
        .add_source(file)
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        )
        .build()
        .context("failed to read launcher configuration")?;

    settings
        .try_deserialize()
        .context("invalid launcher configuration")
}

/// Initialize logging. Output goes to stderr so it stays apart from the
/// console on stdout.
pub fn init_logging(level: &str) -> anyhow::Result<()> {
    let level = Level::from_str(level)
        .with_context(|| format!("invalid log level '{}'", level))?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_defaults_without_file() {
        let config = LauncherConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.pipeline.program, "python3");
        assert_eq!(config.scanner.bus_marker, "ID_BUS=usb");
        assert_eq!(config.sweep.device_node, PathBuf::from("/dev/hailo0"));
    }

    #[test]
    fn test_load_partial_file() {
        let path = std::env::temp_dir().join(format!("launcher-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
[logging]
level = "debug"

[pipeline]
program = "python3.11"
stop_timeout_ms = 500

[sweep]
enabled = false
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.pipeline.program, "python3.11");
        assert_eq!(config.pipeline.stop_timeout_ms, 500);
        // Unset keys keep their defaults
        assert_eq!(config.pipeline.flags, vec!["--show-fps", "--use-frame"]);
        assert!(!config.sweep.enabled);
        assert_eq!(config.controller().sweep.device_node, PathBuf::from("/dev/hailo0"));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(load_config(Some(Path::new("/nonexistent/launcher.toml"))).is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        assert!(init_logging("loud").is_err());
    }
}
