//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

/// Dropping the guard flushes the file sink; taken on exit.
pub static FILE_GUARD: Mutex<Option<tracing_appender::non_blocking::WorkerGuard>> =
    Mutex::new(None);
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "mixbot", version, about = "Cocktail dispenser controller")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/mixbot.toml")]
    pub config: PathBuf,

    /// Ingredients, dispensers and mixes (TOML)
    #[arg(long, value_name = "FILE", default_value = "etc/catalog.toml")]
    pub catalog: PathBuf,

    /// Log as JSON lines instead of pretty; results are printed as JSON too
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve one order of the named mix and wait for it to finish
    Serve {
        /// Mix name as listed in the catalog (case-insensitive)
        #[arg(long)]
        mix: String,
        /// Enable real-time mode (SCHED_FIFO, mlockall)
        #[arg(
            long,
            action = ArgAction::SetTrue,
            long_help = "Enable real-time mode on Linux.\n\nAttempts SCHED_FIFO priority and locks the address space into RAM so the bit-banged HX711 clock pulses stay well under the 60 us power-down threshold. May require CAP_SYS_NICE, CAP_IPC_LOCK or a raised 'ulimit -l'."
        )]
        rt: bool,
        /// SCHED_FIFO priority when --rt is set (defaults to the maximum)
        #[arg(long, value_name = "PRIO")]
        rt_prio: Option<i32>,
        /// Memory locking mode for --rt
        #[arg(long, value_enum, value_name = "MODE", default_value = "current")]
        rt_lock: RtLock,
    },
    /// Zero the scale with nothing on it
    Tare,
    /// Tare, then derive the ratio from a known weight placed on the scale
    Calibrate {
        /// Weight of the reference load, in weight units
        #[arg(long, value_name = "UNITS")]
        known: f64,
        /// Time to place the reference load after the tare
        #[arg(long, value_name = "MS", default_value_t = 5000)]
        wait_ms: u64,
    },
    /// Flush every pump in turn; lift the glass to advance to the next one
    Clean {
        /// First pump to clean
        #[arg(long, value_name = "N", default_value_t = 0)]
        start_at: usize,
    },
    /// Run one pump for a fixed time
    Pump {
        #[arg(long, value_name = "N")]
        id: usize,
        #[arg(long, value_name = "MS")]
        ms: u64,
    },
    /// Print smoothed scale readings
    Weigh {
        #[arg(long, value_name = "N", default_value_t = 10)]
        samples: usize,
    },
    /// Claim every configured pin and take one reading
    SelfCheck,
}
