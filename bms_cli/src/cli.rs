//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "bms", version, about = "Battery management controller")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/bms.toml")]
    pub config: PathBuf,

    /// Optional per-cell calibration CSV (header: cell,scale,offset)
    #[arg(long, value_name = "FILE")]
    pub calibration: Option<PathBuf>,

    /// Log and report as JSON lines instead of pretty text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller until Ctrl-C (or for a fixed number of ticks)
    Run {
        /// Stop after this many controller ticks
        #[arg(long, value_name = "N")]
        ticks: Option<u64>,
        /// Renew the keep-alive every tick instead of waiting for `bms renew`
        #[arg(long, action = ArgAction::SetTrue)]
        renew: bool,
        /// Start with the operator lockout engaged (relay held open)
        #[arg(long, action = ArgAction::SetTrue)]
        lockout: bool,
    },
    /// Build the controller, poll once and evaluate once without closing the relay
    SelfCheck,
    /// Extend the persisted keep-alive deadline
    Renew {
        /// Requested window in ms; clamped to `poll.k`. Replaces the current
        /// deadline, so a shorter window (or 0) revokes the remaining time
        #[arg(long, value_name = "MS")]
        ms: Option<u64>,
    },
    /// Show the persisted keep-alive state
    Status,
}
