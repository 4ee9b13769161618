use clap::Parser;
use std::path::PathBuf;

/// lemonpi_bled - BLE GATT peripheral daemon for in-car telemetry
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file path
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Run with synthetic GPS and OBD data for testing
    #[arg(long = "test-mode", default_value = "false")]
    pub test_mode: bool,

    /// Detach from the terminal and run as a daemon
    #[arg(short = 'd', long = "daemonize", default_value = "false")]
    pub daemonize: bool,
}
