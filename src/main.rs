//! CLI entry point for thlogger.
//!
//! Maps the command line onto a [`RunConfig`], wires the interrupt handler
//! to the loop's cancellation token and hands control to [`poll::run`]. The
//! process runs until the user stops it; Ctrl+C is a clean exit, not an
//! error.

use anyhow::Result;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::time::Duration;
use thlogger::config::{
    RunConfig, DEFAULT_BAUD, DEFAULT_DIR, DEFAULT_INTERVAL_SECS, DEFAULT_MAX_LINES,
};
use thlogger::poll::{self, CancelToken};

#[derive(Parser)]
#[command(name = "thlogger")]
#[command(about = "Log a serial temperature/humidity sensor to rotating files", long_about = None)]
struct Cli {
    /// Output directory for log files
    #[arg(long, default_value = DEFAULT_DIR)]
    dir: PathBuf,

    /// Serial baud rate
    #[arg(long, default_value_t = DEFAULT_BAUD)]
    baud: u32,

    /// Serial port to use; auto-discovered when omitted
    #[arg(long)]
    port: Option<String>,

    /// Seconds between polls
    #[arg(long, default_value_t = DEFAULT_INTERVAL_SECS)]
    interval: u64,

    /// Lines per log file before rotation
    #[arg(long, default_value_t = DEFAULT_MAX_LINES)]
    max_lines: u64,

    /// Verbose logging
    #[arg(long)]
    debug: bool,

    /// List the system's serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

impl Cli {
    fn into_config(self) -> RunConfig {
        RunConfig {
            dir: self.dir,
            baud: self.baud,
            port: self.port,
            interval: Duration::from_secs(self.interval),
            max_lines: self.max_lines,
            debug: self.debug,
        }
    }
}

/// Initialize logging based on verbosity level.
fn init_logging(debug: bool) {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Off)
        .filter_module("thlogger", level)
        .format_timestamp_secs()
        .format_module_path(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if cli.list_ports {
        return list_ports();
    }

    let config = cli.into_config();
    config.validate()?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())?;

    info!(
        "Starting: dir={} baud={} port={} interval={}s max_lines={}",
        config.dir.display(),
        config.baud,
        config.port.as_deref().unwrap_or("auto"),
        config.interval.as_secs(),
        config.max_lines
    );

    poll::run(&config, &cancel)?;
    println!("Stopped by user.");
    Ok(())
}

fn list_ports() -> Result<()> {
    let ports = serialport::available_ports()?;
    if ports.is_empty() {
        println!("No serial ports detected on this system.");
        return Ok(());
    }
    for port in ports {
        println!("{}", port.port_name);
    }
    Ok(())
}
