use clap::Parser;
use std::path::PathBuf;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(
    name = "detection-launcher",
    version,
    about = "USB Camera Detection - pipeline launcher"
)]
pub struct Args {
    /// Path to the config file (defaults to ./launcher.toml when present)
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Camera to preselect (e.g. /dev/video0)
    #[arg(short = 'd', long = "device", value_name = "PATH")]
    pub device: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let args = Args::parse_from([
            "detection-launcher",
            "--config",
            "/etc/launcher.toml",
            "-d",
            "/dev/video2",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("/etc/launcher.toml")));
        assert_eq!(args.device.as_deref(), Some("/dev/video2"));
        assert!(args.log_level.is_none());
    }
}
