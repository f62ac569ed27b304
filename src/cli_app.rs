//! Command-line definition and dispatch.

use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use zeropad::core::config::{CliOverrides, Config};
use zeropad::core::errors::ZpError;
use zeropad::daemon::loop_main::{DaemonArgs, run_daemon};

/// zeropad — keeps free space on a filesystem inside a band by growing or
/// shrinking a zero-filled padding file.
#[derive(Debug, Parser)]
#[command(
    name = "zeropad",
    author,
    version,
    about = "Keep a filesystem's free space between --min and --max percent",
    long_about = None
)]
pub struct Cli {
    /// Padding file to manage (created if missing).
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    file: Option<PathBuf>,
    /// Lower free-space bound in percent; below it the pad shrinks.
    #[arg(long, value_name = "PCT")]
    min: Option<f64>,
    /// Upper free-space bound in percent; above it the pad grows.
    #[arg(long, value_name = "PCT")]
    max: Option<f64>,
    /// Seconds between samples.
    #[arg(long, value_name = "SECONDS")]
    freq: Option<u64>,
    /// Maximum growth rate in kB/s.
    #[arg(long, value_name = "KBPS")]
    rate: Option<u64>,
    /// Override config file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Delete the padding file when interrupted.
    #[arg(long)]
    remove_on_exit: bool,
    /// Refuse to start if the padding file already exists.
    #[arg(long)]
    create_new: bool,
    /// Stay attached to the terminal and mirror log records to stderr.
    #[arg(long)]
    foreground: bool,
    /// Write the daemon's PID to this file.
    #[arg(long, value_name = "PATH")]
    pidfile: Option<PathBuf>,
    /// Activity log (JSONL) path.
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
    /// Only log changes, not in-band samples.
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            path: self.file.clone(),
            min_free_pct: self.min,
            max_free_pct: self.max,
            poll_interval_secs: self.freq,
            max_write_rate_kbps: self.rate,
            remove_on_exit: self.remove_on_exit,
            create_new: self.create_new,
            log_file: self.log_file.clone(),
            quiet: self.quiet,
        }
    }

    fn daemon_args(&self) -> DaemonArgs {
        DaemonArgs {
            foreground: self.foreground,
            pidfile: self.pidfile.clone(),
        }
    }
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration rejected before any resource was touched.
    #[error("{0}")]
    Config(ZpError),
    /// Failure while acquiring the pad or running the loop.
    #[error("{0}")]
    Daemon(ZpError),
}

impl CliError {
    /// Every failure exits with 1; only help and version exit with 0.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Daemon(_) => 1,
        }
    }
}

/// Load the effective configuration and run the daemon.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref(), &cli.overrides()).map_err(CliError::Config)?;
    run_daemon(&config, &cli.daemon_args()).map_err(CliError::Daemon)
}
