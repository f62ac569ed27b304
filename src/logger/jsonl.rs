//! Activity log format and file handling.
//!
//! Every grow, shrink, sample, error and interrupt becomes one JSON object on
//! its own line, so the log can be followed with `tail -f` and parsed with
//! `jq`. Records go to the configured file. If that cannot be opened or a
//! write fails, they go to the fallback file, then to stderr tagged
//! `[ZP-JSONL]`, and finally nowhere: a logging problem never stops the pad
//! from being managed.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions, rename};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, ZpError};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Record kinds emitted by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DaemonStart,
    RateLimit,
    Grow,
    Shrink,
    Sample,
    Error,
    Interrupted,
    DaemonStop,
}

/// A single JSONL record; everything but `ts`, `event`, `severity` is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp with milliseconds.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Free percentage at the time of the record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_pct: Option<f64>,
    /// Padding file size before the action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Bytes written or released.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            path: None,
            free_pct: None,
            file_size: None,
            bytes: None,
            blocks: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    /// One-line human rendering used for the foreground stderr mirror.
    pub fn human_line(&self) -> String {
        let mut line = format!(
            "{} {:?} {:?}",
            self.ts, self.severity, self.event
        );
        if let Some(free) = self.free_pct {
            line.push_str(&format!(" free={free:.3}%"));
        }
        if let Some(size) = self.file_size {
            line.push_str(&format!(" file={}kB", size / 1024));
        }
        if let Some(bytes) = self.bytes {
            line.push_str(&format!(" delta={}kB", bytes / 1024));
        }
        if let Some(code) = &self.error_code {
            line.push_str(&format!(" code={code}"));
        }
        if let Some(msg) = &self.error_message {
            line.push_str(&format!(" error={msg}"));
        }
        if let Some(details) = &self.details {
            line.push_str(&format!(" {details}"));
        }
        line
    }
}

/// Settings for the activity log file.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Used when `path` cannot be opened or stops accepting writes.
    pub fallback_path: Option<PathBuf>,
    /// A file that would grow past this many bytes is rolled over first.
    pub max_size_bytes: u64,
    /// Generations kept next to the live file (`.1` is the newest).
    pub max_rotated_files: u32,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/log/zeropad/activity.jsonl"),
            fallback_path: Some(PathBuf::from("/dev/shm/zeropad.jsonl")),
            max_size_bytes: 50 * 1024 * 1024,
            max_rotated_files: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Primary,
    Fallback,
}

/// Current destination for records. A failed write moves one step down and
/// never back up.
enum Sink {
    File {
        tier: Tier,
        path: PathBuf,
        out: BufWriter<File>,
        len: u64,
    },
    Stderr,
    Discard,
}

/// Writes pad activity records, one JSON object per line.
pub struct JsonlWriter {
    config: JsonlConfig,
    sink: Sink,
}

impl JsonlWriter {
    /// Open the configured log, settling on the first destination that works.
    pub fn open(config: JsonlConfig) -> Self {
        let sink = file_sink(&config, Tier::Primary);
        Self { config, sink }
    }

    /// Append one record. Never fails; a broken destination is replaced.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(json) => self.emit(&format!("{json}\n")),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[ZP-JSONL] cannot encode {:?} record: {e}", entry.event);
            }
        }
    }

    pub fn flush(&mut self) {
        if let Sink::File { out, .. } = &mut self.sink {
            let _ = out.flush();
        }
    }

    /// Flush, then push the data to stable storage.
    pub fn fsync(&mut self) {
        if let Sink::File { out, .. } = &mut self.sink {
            let _ = out.flush();
            let _ = out.get_ref().sync_data();
        }
    }

    /// `normal`, `fallback`, `stderr` or `discard`.
    pub fn state(&self) -> &str {
        match &self.sink {
            Sink::File {
                tier: Tier::Primary,
                ..
            } => "normal",
            Sink::File {
                tier: Tier::Fallback,
                ..
            } => "fallback",
            Sink::Stderr => "stderr",
            Sink::Discard => "discard",
        }
    }

    // ──────────────────────── internals ────────────────────────

    fn emit(&mut self, line: &str) {
        let bytes = line.len() as u64;
        let limit = self.config.max_size_bytes;
        if matches!(&self.sink, Sink::File { len, .. } if *len > 0 && *len + bytes > limit) {
            self.roll_over();
        }

        loop {
            let delivered = match &mut self.sink {
                Sink::File { out, len, .. } => out
                    .write_all(line.as_bytes())
                    .map(|()| *len += bytes)
                    .is_ok(),
                Sink::Stderr => write!(io::stderr(), "[ZP-JSONL] {line}").is_ok(),
                Sink::Discard => true,
            };
            if delivered {
                return;
            }
            self.step_down();
        }
    }

    fn step_down(&mut self) {
        self.sink = match std::mem::replace(&mut self.sink, Sink::Discard) {
            Sink::File {
                tier: Tier::Primary,
                ..
            } => file_sink(&self.config, Tier::Fallback),
            Sink::File {
                tier: Tier::Fallback,
                ..
            } => Sink::Stderr,
            Sink::Stderr | Sink::Discard => Sink::Discard,
        };
    }

    /// Shift `log.1..` up one generation, move the live file to `log.1` and
    /// start an empty one. The oldest generation falls off the end.
    fn roll_over(&mut self) {
        let Sink::File {
            tier,
            path,
            mut out,
            ..
        } = std::mem::replace(&mut self.sink, Sink::Discard)
        else {
            return;
        };
        let _ = out.flush();
        drop(out);

        for generation in (1..self.config.max_rotated_files).rev() {
            let _ = rename(rotated_name(&path, generation), rotated_name(&path, generation + 1));
        }
        let _ = rename(&path, rotated_name(&path, 1));

        self.sink = match open_append(&path) {
            Ok((file, _)) => Sink::File {
                tier,
                path,
                out: BufWriter::with_capacity(16 * 1024, file),
                len: 0,
            },
            Err(_) if tier == Tier::Primary => file_sink(&self.config, Tier::Fallback),
            Err(_) => Sink::Stderr,
        };
    }
}

// ──────────────────────── helpers ────────────────────────

/// First usable destination at or below `tier`.
fn file_sink(config: &JsonlConfig, tier: Tier) -> Sink {
    let candidate = match tier {
        Tier::Primary => Some(config.path.clone()),
        Tier::Fallback => config.fallback_path.clone(),
    };
    let Some(path) = candidate else {
        return Sink::Stderr;
    };
    match open_append(&path) {
        Ok((file, len)) => {
            if tier == Tier::Fallback {
                let _ = writeln!(
                    io::stderr(),
                    "[ZP-JSONL] activity log moved to {}",
                    path.display()
                );
            }
            Sink::File {
                tier,
                path,
                out: BufWriter::with_capacity(16 * 1024, file),
                len,
            }
        }
        Err(_) if tier == Tier::Primary => file_sink(config, Tier::Fallback),
        Err(_) => Sink::Stderr,
    }
}

/// Open `path` for appending, creating parent directories. Also returns the
/// size it already has.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| ZpError::io("create", parent, e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ZpError::io("open", path, e))?;
    let len = file.metadata().map_or(0, |m| m.len());
    Ok((file, len))
}

/// `foo.jsonl` → `foo.jsonl.3`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ──────────────────────── tests ────────────────────────
