//! Configuration system: TOML file + env var overrides + CLI overrides.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, ZpError};

const DEFAULT_CONFIG_PATH: &str = "/etc/zeropad/zeropad.toml";

/// Full zeropad configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub padding: PaddingConfig,
    pub control: ControlConfig,
    pub logging: LoggingConfig,
}

/// How the padding file is opened at startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Reuse an existing pad (its size is the only durable state) or create one.
    #[default]
    OpenOrCreate,
    /// Refuse to start if the file already exists.
    CreateNew,
}

/// What teardown does with the padding file after closing it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterruptPolicy {
    /// Leave the file on disk and log a warning.
    #[default]
    Preserve,
    /// Delete the file once the descriptor is closed.
    Remove,
}

impl InterruptPolicy {
    fn parse(name: &str, raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "preserve" | "keep" => Ok(Self::Preserve),
            "remove" | "delete" => Ok(Self::Remove),
            _ => Err(ZpError::ConfigParse {
                context: "env",
                details: format!("{name}={raw:?}: expected preserve|remove"),
            }),
        }
    }
}

impl OpenMode {
    fn parse(name: &str, raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open_or_create" => Ok(Self::OpenOrCreate),
            "create_new" => Ok(Self::CreateNew),
            _ => Err(ZpError::ConfigParse {
                context: "env",
                details: format!("{name}={raw:?}: expected open_or_create|create_new"),
            }),
        }
    }
}

/// Padding file location and lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PaddingConfig {
    pub path: Option<PathBuf>,
    pub open_mode: OpenMode,
    pub on_interrupt: InterruptPolicy,
}

/// Free-space band and I/O budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    pub min_free_pct: f64,
    pub max_free_pct: f64,
    pub poll_interval_secs: u64,
    pub max_write_rate_kbps: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            min_free_pct: 10.0,
            max_free_pct: 20.0,
            poll_interval_secs: 60,
            max_write_rate_kbps: 1024,
        }
    }
}

/// Activity log destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub jsonl_path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    /// Emit a `sample` record for in-band iterations too.
    pub verbose: bool,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            jsonl_path: PathBuf::from("/var/log/zeropad/activity.jsonl"),
            fallback_path: Some(PathBuf::from("/dev/shm/zeropad.jsonl")),
            verbose: true,
            max_size_bytes: 50 * 1024 * 1024,
            max_rotated_files: 5,
        }
    }
}

/// Values supplied on the command line; `None` leaves the lower layer alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOverrides {
    pub path: Option<PathBuf>,
    pub min_free_pct: Option<f64>,
    pub max_free_pct: Option<f64>,
    pub poll_interval_secs: Option<u64>,
    pub max_write_rate_kbps: Option<u64>,
    pub remove_on_exit: bool,
    pub create_new: bool,
    pub log_file: Option<PathBuf>,
    pub quiet: bool,
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }

    /// Load config from default or explicit path, then apply env and CLI
    /// overrides and validate the result.
    ///
    /// A missing file at the default path is not an error; defaults are used.
    pub fn load(path: Option<&Path>, cli: &CliOverrides) -> Result<Self> {
        let mut cfg = Self::read_file(path)?;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.apply_cli_overrides(cli);
        cfg.validate()?;
        Ok(cfg)
    }

    fn read_file(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf)
                .map_err(|source| ZpError::io("read", &path_buf, source))?;
            Ok(toml::from_str(&raw)?)
        } else if path.is_some() {
            Err(ZpError::MissingConfig { path: path_buf })
        } else {
            Ok(Self::default())
        }
    }

    /// Padding file path; only valid after [`Config::validate`] succeeded.
    #[must_use]
    pub fn padding_path(&self) -> &Path {
        self.padding.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("ZP_PADDING_PATH") {
            self.padding.path = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("ZP_OPEN_MODE") {
            self.padding.open_mode = OpenMode::parse("ZP_OPEN_MODE", &raw)?;
        }
        if let Some(raw) = lookup("ZP_ON_INTERRUPT") {
            self.padding.on_interrupt = InterruptPolicy::parse("ZP_ON_INTERRUPT", &raw)?;
        }
        if let Some(raw) = lookup("ZP_MIN_FREE_PCT") {
            self.control.min_free_pct = parse_env("ZP_MIN_FREE_PCT", &raw)?;
        }
        if let Some(raw) = lookup("ZP_MAX_FREE_PCT") {
            self.control.max_free_pct = parse_env("ZP_MAX_FREE_PCT", &raw)?;
        }
        if let Some(raw) = lookup("ZP_POLL_INTERVAL_SECS") {
            self.control.poll_interval_secs = parse_env("ZP_POLL_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("ZP_MAX_WRITE_RATE_KBPS") {
            self.control.max_write_rate_kbps = parse_env("ZP_MAX_WRITE_RATE_KBPS", &raw)?;
        }
        if let Some(raw) = lookup("ZP_LOG_PATH") {
            self.logging.jsonl_path = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("ZP_VERBOSE") {
            self.logging.verbose = parse_env_bool("ZP_VERBOSE", &raw)?;
        }
        Ok(())
    }

    fn apply_cli_overrides(&mut self, cli: &CliOverrides) {
        if let Some(path) = &cli.path {
            self.padding.path = Some(path.clone());
        }
        if let Some(v) = cli.min_free_pct {
            self.control.min_free_pct = v;
        }
        if let Some(v) = cli.max_free_pct {
            self.control.max_free_pct = v;
        }
        if let Some(v) = cli.poll_interval_secs {
            self.control.poll_interval_secs = v;
        }
        if let Some(v) = cli.max_write_rate_kbps {
            self.control.max_write_rate_kbps = v;
        }
        if cli.remove_on_exit {
            self.padding.on_interrupt = InterruptPolicy::Remove;
        }
        if cli.create_new {
            self.padding.open_mode = OpenMode::CreateNew;
        }
        if let Some(path) = &cli.log_file {
            self.logging.jsonl_path = path.clone();
        }
        if cli.quiet {
            self.logging.verbose = false;
        }
    }

    fn validate(&self) -> Result<()> {
        match &self.padding.path {
            None => {
                return Err(ZpError::InvalidConfig {
                    details: "padding.path is required (-f, ZP_PADDING_PATH or config file)"
                        .to_string(),
                });
            }
            Some(p) if p.as_os_str().is_empty() => {
                return Err(ZpError::InvalidConfig {
                    details: "padding.path must not be empty".to_string(),
                });
            }
            Some(_) => {}
        }

        let ctl = &self.control;
        for (name, val) in [
            ("min_free_pct", ctl.min_free_pct),
            ("max_free_pct", ctl.max_free_pct),
        ] {
            if !val.is_finite() || !(0.0..=100.0).contains(&val) {
                return Err(ZpError::InvalidConfig {
                    details: format!("control.{name} must be in [0, 100], got {val}"),
                });
            }
        }
        if ctl.min_free_pct <= 0.0 {
            return Err(ZpError::InvalidConfig {
                details: format!("control.min_free_pct must be > 0, got {}", ctl.min_free_pct),
            });
        }
        if ctl.min_free_pct >= ctl.max_free_pct {
            return Err(ZpError::InvalidConfig {
                details: format!(
                    "control.min_free_pct ({}) must be < control.max_free_pct ({})",
                    ctl.min_free_pct, ctl.max_free_pct
                ),
            });
        }
        if ctl.poll_interval_secs == 0 {
            return Err(ZpError::InvalidConfig {
                details: "control.poll_interval_secs must be > 0".to_string(),
            });
        }
        if ctl.max_write_rate_kbps == 0 {
            return Err(ZpError::InvalidConfig {
                details: "control.max_write_rate_kbps must be > 0".to_string(),
            });
        }
        if ctl
            .poll_interval_secs
            .checked_mul(ctl.max_write_rate_kbps)
            .and_then(|kb| kb.checked_mul(1024))
            .is_none()
        {
            return Err(ZpError::InvalidConfig {
                details: "control.poll_interval_secs * control.max_write_rate_kbps overflows"
                    .to_string(),
            });
        }
        if self.logging.max_rotated_files == 0 {
            return Err(ZpError::InvalidConfig {
                details: "logging.max_rotated_files must be >= 1".to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| ZpError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ZpError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: expected a boolean"),
        }),
    }
}
