//! Activity logger thread: owns the `JsonlWriter`, fed through a bounded
//! crossbeam channel so the control loop is never blocked by logging.

#![allow(missing_docs)]

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;

use crate::core::errors::{Result, ZpError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

const CHANNEL_CAPACITY: usize = 256;

// ──────────────────── public event type ────────────────────

/// Everything the daemon reports.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    DaemonStarted {
        version: String,
        config_hash: String,
        path: String,
        block_size: u64,
        total_bytes: u64,
    },
    RateLimitDerived {
        blocks_per_interval: u64,
        bytes_per_interval: u64,
        poll_interval_secs: u64,
    },
    Grew {
        path: String,
        free_pct: f64,
        file_size: u64,
        desired_bytes: u64,
        bytes_written: u64,
        blocks: u64,
    },
    Shrank {
        path: String,
        free_pct: f64,
        file_size: u64,
        bytes_released: u64,
        new_len: u64,
    },
    Sampled {
        free_pct: f64,
        file_size: u64,
    },
    Error {
        code: String,
        message: String,
    },
    Interrupted {
        signal: i32,
        path: String,
        removed: bool,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    /// Sentinel that ends the logger thread.
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// Cheaply cloneable sender side of the logger.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Queue an event. Never blocks; a full channel drops the event and bumps
    /// the dropped-events counter.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// A handle whose events go nowhere, for tests and library callers that
    /// do not want an activity log.
    pub fn disconnected() -> Self {
        let (tx, _rx) = bounded(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Options for the logger thread.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub jsonl: JsonlConfig,
    /// Also print each record to stderr (foreground mode).
    pub mirror_stderr: bool,
    pub channel_capacity: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            jsonl: JsonlConfig::default(),
            mirror_stderr: false,
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Running logger thread plus the means to stop it.
pub struct ActivityLogger {
    handle: ActivityLoggerHandle,
    join: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ActivityLogger {
    pub fn handle(&self) -> ActivityLoggerHandle {
        self.handle.clone()
    }

    /// Flush, stop and join the logger thread. Safe to call more than once
    /// and from any thread; only the first call waits.
    pub fn finish(&self) {
        let Some(join) = self.join.lock().take() else {
            return;
        };
        let _ = self.handle.tx.send(ActivityEvent::Shutdown);
        let _ = join.join();
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread.
///
/// Must be called after detaching from the terminal: the thread would not
/// survive the fork.
pub fn spawn_logger(config: LoggerConfig) -> Result<ActivityLogger> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let join = thread::Builder::new()
        .name("zp-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config.jsonl, config.mirror_stderr, &dropped_clone))
        .map_err(|e| ZpError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok(ActivityLogger {
        handle: ActivityLoggerHandle {
            tx,
            dropped_events: dropped,
        },
        join: Mutex::new(Some(join)),
    })
}

// ──────────────────── logger thread ────────────────────

fn logger_thread_main(
    rx: &Receiver<ActivityEvent>,
    jsonl_config: JsonlConfig,
    mirror_stderr: bool,
    dropped: &AtomicU64,
) {
    let mut jsonl = JsonlWriter::open(jsonl_config);
    let mut emit = |entry: &LogEntry| {
        jsonl.write_entry(entry);
        if mirror_stderr {
            let _ = writeln!(io::stderr(), "[ZP-DAEMON] {}", entry.human_line());
        }
        // Flush whenever the queue drains so the log can be tailed live.
        if rx.is_empty() {
            jsonl.flush();
        }
    };

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            emit(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        emit(&event_to_log_entry(&event));
    }

    jsonl.flush();
    jsonl.fsync();
}

// ──────────────────── event conversion ────────────────────

fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::DaemonStarted {
            version,
            config_hash,
            path,
            block_size,
            total_bytes,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStart, Severity::Info);
            e.path = Some(path.clone());
            e.details = Some(format!(
                "version={version} config_hash={config_hash} block_size={block_size} disk_size={}GB",
                total_bytes / (1024 * 1024 * 1024)
            ));
            e.ok = Some(true);
            e
        }
        ActivityEvent::RateLimitDerived {
            blocks_per_interval,
            bytes_per_interval,
            poll_interval_secs,
        } => {
            let severity = if *blocks_per_interval == 0 {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::RateLimit, severity);
            e.blocks = Some(*blocks_per_interval);
            e.bytes = Some(*bytes_per_interval);
            e.details = Some(if *blocks_per_interval == 0 {
                format!(
                    "write budget per {poll_interval_secs}s is below one block; the pad can never grow"
                )
            } else {
                format!("max {blocks_per_interval} blocks per {poll_interval_secs}s")
            });
            e
        }
        ActivityEvent::Grew {
            path,
            free_pct,
            file_size,
            desired_bytes,
            bytes_written,
            blocks,
        } => {
            let mut e = LogEntry::new(EventType::Grow, Severity::Info);
            e.path = Some(path.clone());
            e.free_pct = Some(*free_pct);
            e.file_size = Some(*file_size);
            e.bytes = Some(*bytes_written);
            e.blocks = Some(*blocks);
            e.details = Some(format!("wanted {}kB", desired_bytes / 1024));
            e.ok = Some(true);
            e
        }
        ActivityEvent::Shrank {
            path,
            free_pct,
            file_size,
            bytes_released,
            new_len,
        } => {
            let mut e = LogEntry::new(EventType::Shrink, Severity::Info);
            e.path = Some(path.clone());
            e.free_pct = Some(*free_pct);
            e.file_size = Some(*file_size);
            e.bytes = Some(*bytes_released);
            e.details = Some(format!("new size {}kB", new_len / 1024));
            e.ok = Some(true);
            e
        }
        ActivityEvent::Sampled {
            free_pct,
            file_size,
        } => {
            let mut e = LogEntry::new(EventType::Sample, Severity::Info);
            e.free_pct = Some(*free_pct);
            e.file_size = Some(*file_size);
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Interrupted {
            signal,
            path,
            removed,
        } => {
            // Keeping the pad is the noteworthy outcome: space stays reserved.
            let severity = if *removed {
                Severity::Info
            } else {
                Severity::Warning
            };
            let mut e = LogEntry::new(EventType::Interrupted, severity);
            e.path = Some(path.clone());
            e.details = Some(if *removed {
                format!("caught signal {signal}, padding file removed")
            } else {
                format!("caught signal {signal}, padding file left in place")
            });
            e
        }
        ActivityEvent::DaemonStopped {
            reason,
            uptime_secs,
        } => {
            let severity = if reason.starts_with("fatal") {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::DaemonStop, severity);
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::DaemonStop, Severity::Info),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn logger_in(dir: &tempfile::TempDir) -> (std::path::PathBuf, ActivityLogger) {
        let path = dir.path().join("activity.jsonl");
        let logger = spawn_logger(LoggerConfig {
            jsonl: JsonlConfig {
                path: path.clone(),
                fallback_path: None,
                max_size_bytes: 1024 * 1024,
                max_rotated_files: 2,
            },
            mirror_stderr: false,
            channel_capacity: 64,
        })
        .expect("spawn logger");
        (path, logger)
    }

    fn lines(path: &std::path::Path) -> Vec<serde_json::Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn finish_flushes_all_queued_events() {
        let dir = tempfile::tempdir().unwrap();
        let (path, logger) = logger_in(&dir);
        let handle = logger.handle();

        handle.send(ActivityEvent::Grew {
            path: "/pad".to_string(),
            free_pct: 80.0,
            file_size: 0,
            desired_bytes: 10 * 4096,
            bytes_written: 4096,
            blocks: 1,
        });
        handle.send(ActivityEvent::Interrupted {
            signal: 15,
            path: "/pad".to_string(),
            removed: false,
        });
        logger.finish();

        let records = lines(&path);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["event"], "grow");
        assert_eq!(records[0]["bytes"], 4096);
        assert_eq!(records[1]["event"], "interrupted");
        assert_eq!(records[1]["severity"], "warning");
    }

    #[test]
    fn finish_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (_path, logger) = logger_in(&dir);
        logger.finish();
        logger.finish();
        // Sending after shutdown is silently ignored.
        logger.handle().send(ActivityEvent::Sampled {
            free_pct: 1.0,
            file_size: 0,
        });
    }

    #[test]
    fn zero_budget_is_a_warning() {
        let entry = event_to_log_entry(&ActivityEvent::RateLimitDerived {
            blocks_per_interval: 0,
            bytes_per_interval: 0,
            poll_interval_secs: 1,
        });
        assert_eq!(entry.severity, Severity::Warning);
        assert!(entry.details.unwrap().contains("never grow"));
    }

    #[test]
    fn error_event_carries_code() {
        let entry = event_to_log_entry(&ActivityEvent::Error {
            code: "ZP-3003".to_string(),
            message: "failed to write".to_string(),
        });
        assert_eq!(entry.severity, Severity::Critical);
        assert_eq!(entry.error_code.as_deref(), Some("ZP-3003"));
        assert_eq!(entry.ok, Some(false));
    }

    #[test]
    fn disconnected_handle_swallows_events() {
        let handle = ActivityLoggerHandle::disconnected();
        handle.send(ActivityEvent::Sampled {
            free_pct: 50.0,
            file_size: 0,
        });
        assert_eq!(handle.dropped_events(), 0);
    }
}
