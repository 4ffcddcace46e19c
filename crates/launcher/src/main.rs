//! USB Camera Detection Launcher - Main Entry Point

use clap::Parser;
use device_scanner::{DevicePath, DeviceScanner};
use launcher::cli::Args;
use launcher::console::{self, Console};
use launcher::{init_logging, load_config};
use pipeline_controller::PipelineController;
use tokio::io::BufReader;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level)?;

    info!("=== USB Camera Detection Launcher v{} ===", env!("CARGO_PKG_VERSION"));

    if config.sweep.enabled {
        warn!(
            "Every stop force-kills all processes holding {}",
            config.sweep.device_node.display()
        );
    }

    let scanner = DeviceScanner::new(&config.scanner);
    let mut controller = PipelineController::new(config.controller(), scanner);
    let Some(events) = controller.take_events() else {
        anyhow::bail!("pipeline event stream unavailable");
    };

    let console = Console::new(controller, args.device.map(DevicePath::from)).await;
    console::run(console, events, BufReader::new(tokio::io::stdin())).await
}
