//! Control loop: sample the filesystem, grow or shrink the pad, sleep.
//!
//! Startup order matters. The pad is opened while stdio still reaches the
//! terminal, then the process detaches, and only then are threads spawned
//! and the lock taken, since neither survives the fork.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::config::{Config, ControlConfig};
use crate::core::errors::{Result, ZpError};
use crate::daemon::signals::{CancelToken, SignalSupervisor, Teardown, TeardownCause};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, LoggerConfig, spawn_logger};
use crate::logger::jsonl::JsonlConfig;
use crate::monitor::fs_stats::FilesystemProbe;
use crate::padding::controller::{BandController, PadAction};
use crate::padding::file::{PaddingFile, PaddingStore};
use crate::padding::rate::RateLimit;
use crate::platform::pal::{detach_from_terminal, write_pidfile};

/// Process-level options that are not part of the control configuration.
#[derive(Debug, Clone, Default)]
pub struct DaemonArgs {
    /// Stay attached to the terminal and mirror log records to stderr.
    pub foreground: bool,
    pub pidfile: Option<PathBuf>,
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationReport {
    pub free_pct: f64,
    pub file_size: u64,
    pub action: PadAction,
    pub bytes_written: u64,
}

/// The sampling/adjusting loop over any [`PaddingStore`].
pub struct PaddingDaemon<S: PaddingStore> {
    store: Arc<S>,
    path: PathBuf,
    controller: BandController,
    poll_interval: Duration,
    zero_block: Vec<u8>,
    logger: ActivityLoggerHandle,
    token: CancelToken,
    verbose: bool,
}

impl<S: PaddingStore> PaddingDaemon<S> {
    /// Fix the block size, derive the write budget and allocate the zero block.
    ///
    /// The block size is read once here; capacity and free space are read
    /// fresh every iteration.
    pub fn init(
        store: Arc<S>,
        path: &Path,
        control: &ControlConfig,
        verbose: bool,
        logger: ActivityLoggerHandle,
        token: CancelToken,
    ) -> Result<Self> {
        let block_size = store.block_size()?;
        let rate = RateLimit::derive(control.poll_interval_secs, control.max_write_rate_kbps, block_size)
            .ok_or_else(|| ZpError::FilesystemQuery {
                path: path.to_path_buf(),
                details: "filesystem reports a block size of 0".to_string(),
            })?;
        let block_len = usize::try_from(block_size).map_err(|_| ZpError::FilesystemQuery {
            path: path.to_path_buf(),
            details: format!("block size {block_size} does not fit in memory"),
        })?;

        logger.send(ActivityEvent::RateLimitDerived {
            blocks_per_interval: rate.blocks_per_interval(),
            bytes_per_interval: rate.bytes_per_interval(),
            poll_interval_secs: control.poll_interval_secs,
        });

        Ok(Self {
            store,
            path: path.to_path_buf(),
            controller: BandController::new(control.min_free_pct, control.max_free_pct, rate),
            poll_interval: Duration::from_secs(control.poll_interval_secs),
            zero_block: vec![0u8; block_len],
            logger,
            token,
            verbose,
        })
    }

    #[must_use]
    pub fn controller(&self) -> &BandController {
        &self.controller
    }

    /// One sample-decide-act pass. Errors are returned untouched; nothing is
    /// retried.
    pub fn run_iteration(&mut self) -> Result<IterationReport> {
        let snapshot = self.store.snapshot()?;
        let file_size = self.store.file_size_bytes()?;
        let action = self
            .controller
            .decide(snapshot.free_pct, snapshot.total_bytes, file_size);

        let mut bytes_written = 0;
        match action {
            PadAction::Grow {
                blocks,
                desired_bytes,
            } => {
                bytes_written = self.store.append_blocks(&self.zero_block, blocks)?;
                self.logger.send(ActivityEvent::Grew {
                    path: self.path.display().to_string(),
                    free_pct: snapshot.free_pct,
                    file_size,
                    desired_bytes,
                    bytes_written,
                    blocks,
                });
            }
            PadAction::Shrink { bytes, new_len } => {
                self.store.truncate_to(new_len)?;
                self.logger.send(ActivityEvent::Shrank {
                    path: self.path.display().to_string(),
                    free_pct: snapshot.free_pct,
                    file_size,
                    bytes_released: bytes,
                    new_len,
                });
            }
            PadAction::Hold => {
                if self.verbose {
                    self.logger.send(ActivityEvent::Sampled {
                        free_pct: snapshot.free_pct,
                        file_size,
                    });
                }
            }
        }

        Ok(IterationReport {
            free_pct: snapshot.free_pct,
            file_size,
            action,
            bytes_written,
        })
    }

    /// Loop until an iteration fails or the token is cancelled.
    ///
    /// Never returns `Ok`: cancellation surfaces as [`ZpError::Interrupted`].
    pub fn run(&mut self) -> Result<()> {
        loop {
            if let Some(signal) = self.token.signal() {
                return Err(ZpError::Interrupted { signal });
            }
            if let Err(e) = self.run_iteration() {
                // Teardown closes the handle under a running iteration; that
                // failure is the interrupt, not an I/O error.
                return Err(match self.token.signal() {
                    Some(signal) => ZpError::Interrupted { signal },
                    None => e,
                });
            }
            if self.token.sleep(self.poll_interval) {
                return Err(ZpError::Interrupted {
                    signal: self.token.signal().unwrap_or_default(),
                });
            }
        }
    }
}

// ──────────────────── process entry ────────────────────

/// Run the daemon to completion. Only returns on error; a signal ends the
/// process from the supervisor thread.
pub fn run_daemon(config: &Config, args: &DaemonArgs) -> Result<()> {
    let started = Instant::now();
    let path = config.padding_path().to_path_buf();
    let pad = PaddingFile::open(&path, config.padding.open_mode)?;

    if !args.foreground {
        detach_from_terminal(&path)?;
    }

    let logger = Arc::new(spawn_logger(LoggerConfig {
        jsonl: JsonlConfig {
            path: config.logging.jsonl_path.clone(),
            fallback_path: config.logging.fallback_path.clone(),
            max_size_bytes: config.logging.max_size_bytes,
            max_rotated_files: config.logging.max_rotated_files,
        },
        mirror_stderr: args.foreground,
        ..LoggerConfig::default()
    })?);
    let handle = logger.handle();

    // A locked file belongs to the running owner and an unrecognised one to
    // the user: never remove it here. The pidfile only names a lock holder.
    let acquired = pad
        .lock_exclusive()
        .and_then(|()| pad.check_resumable())
        .and_then(|()| args.pidfile.as_deref().map_or(Ok(()), write_pidfile));
    if let Err(e) = acquired {
        report_error(&handle, &e);
        pad.release();
        logger.finish();
        return Err(e);
    }

    let pad = Arc::new(pad);
    let teardown = Arc::new(Teardown::new(
        Arc::clone(&pad),
        config.padding.on_interrupt,
        Arc::clone(&logger),
    ));
    let token = CancelToken::new();

    let result = SignalSupervisor::spawn(Arc::clone(&teardown), token.clone())
        .and_then(|_| start_loop(config, &path, &pad, handle.clone(), token.clone()));

    match result {
        Err(ZpError::Interrupted { .. }) => park_until_exit(),
        Err(_) if token.is_cancelled() => park_until_exit(),
        Err(e) => {
            report_error(&handle, &e);
            teardown.run(TeardownCause::Fatal(e.code()));
            Err(e)
        }
        Ok(()) => {
            handle.send(ActivityEvent::DaemonStopped {
                reason: "loop ended".to_string(),
                uptime_secs: started.elapsed().as_secs(),
            });
            logger.finish();
            Ok(())
        }
    }
}

fn start_loop(
    config: &Config,
    path: &Path,
    pad: &Arc<PaddingFile>,
    handle: ActivityLoggerHandle,
    token: CancelToken,
) -> Result<()> {
    let snapshot = pad.snapshot()?;
    handle.send(ActivityEvent::DaemonStarted {
        version: env!("CARGO_PKG_VERSION").to_string(),
        config_hash: config.stable_hash()?,
        path: path.display().to_string(),
        block_size: snapshot.block_size,
        total_bytes: snapshot.total_bytes,
    });

    let mut daemon = PaddingDaemon::init(
        Arc::clone(pad),
        path,
        &config.control,
        config.logging.verbose,
        handle,
        token,
    )?;
    daemon.run()
}

/// The supervisor owns teardown and the exit status once a signal arrived.
fn park_until_exit() -> ! {
    loop {
        std::thread::park();
    }
}

fn report_error(handle: &ActivityLoggerHandle, err: &ZpError) {
    handle.send(ActivityEvent::Error {
        code: err.code().to_string(),
        message: err.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_loop_tests::SimVolume;
    use std::sync::atomic::Ordering;

    const BLOCK: u64 = 4096;

    fn control(min: f64, max: f64, freq: u64, rate_kbps: u64) -> ControlConfig {
        ControlConfig {
            min_free_pct: min,
            max_free_pct: max,
            poll_interval_secs: freq,
            max_write_rate_kbps: rate_kbps,
        }
    }

    fn daemon_over(sim: &Arc<SimVolume>, cfg: &ControlConfig) -> PaddingDaemon<SimVolume> {
        PaddingDaemon::init(
            Arc::clone(sim),
            Path::new("/sim/pad"),
            cfg,
            true,
            ActivityLoggerHandle::disconnected(),
            CancelToken::new(),
        )
        .expect("init")
    }

    #[test]
    fn zero_block_size_fails_fast() {
        let sim = Arc::new(SimVolume::new(0, 1_000_000, 0));
        let err = PaddingDaemon::init(
            sim,
            Path::new("/sim/pad"),
            &control(10.0, 20.0, 60, 1024),
            false,
            ActivityLoggerHandle::disconnected(),
            CancelToken::new(),
        )
        .err()
        .expect("zero block size must fail");
        assert_eq!(err.code(), "ZP-3001");
    }

    #[test]
    fn grow_iteration_writes_capped_blocks() {
        // 100 GB at 80 % free, band [10, 20]: 60 GB wanted, 100 blocks allowed.
        let sim = Arc::new(SimVolume::new(BLOCK, 100_000_000_000, 20_000_000_000));
        let mut daemon = daemon_over(&sim, &control(10.0, 20.0, 1, 400));
        let report = daemon.run_iteration().unwrap();

        match report.action {
            PadAction::Grow {
                blocks,
                desired_bytes,
            } => {
                assert_eq!(blocks, 100);
                assert_eq!(desired_bytes / BLOCK, 14_648_437);
            }
            other => panic!("expected growth, got {other:?}"),
        }
        assert_eq!(report.bytes_written, 100 * BLOCK);
        assert_eq!(sim.pad_len(), 100 * BLOCK);
        assert_eq!(sim.block_writes.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn shrink_iteration_truncates_once() {
        // 5 % free, band [10, 20]: release 5 % of 1 GB, clamped to the pad.
        let sim = Arc::new(SimVolume::new(BLOCK, 1_000_000_000, 0));
        sim.set_pad_len(40 * BLOCK);
        sim.set_other_used(1_000_000_000 - 50_000_000 - 40 * BLOCK);
        let mut daemon = daemon_over(&sim, &control(10.0, 20.0, 1, 400));

        let report = daemon.run_iteration().unwrap();
        assert_eq!(
            report.action,
            PadAction::Shrink {
                bytes: 40 * BLOCK,
                new_len: 0
            }
        );
        assert_eq!(sim.pad_len(), 0);
        assert_eq!(sim.truncations.load(Ordering::SeqCst), 1);
        assert_eq!(sim.block_writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn write_failure_keeps_partial_growth() {
        let sim = Arc::new(SimVolume::new(BLOCK, 100_000_000_000, 0).failing_after(7));
        let mut daemon = daemon_over(&sim, &control(10.0, 20.0, 1, 400));
        let err = daemon.run_iteration().expect_err("write must fail");
        assert_eq!(err.code(), "ZP-3003");
        assert_eq!(sim.pad_len(), 7 * BLOCK);
    }

    #[test]
    fn run_stops_with_interrupted_when_cancelled() {
        let sim = Arc::new(SimVolume::new(BLOCK, 1_000_000, 850_000));
        let token = CancelToken::new();
        let mut daemon = PaddingDaemon::init(
            Arc::clone(&sim),
            Path::new("/sim/pad"),
            &control(10.0, 20.0, 3600, 4),
            false,
            ActivityLoggerHandle::disconnected(),
            token.clone(),
        )
        .unwrap();

        let remote = token.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.cancel(15);
        });
        let err = daemon.run().expect_err("run only ends with an error");
        canceller.join().unwrap();
        match err {
            ZpError::Interrupted { signal } => assert_eq!(signal, 15),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn run_propagates_the_first_failure() {
        let sim = Arc::new(SimVolume::new(BLOCK, 100_000_000_000, 0).failing_after(0));
        let mut daemon = daemon_over(&sim, &control(10.0, 20.0, 1, 400));
        let err = daemon.run().expect_err("first write fails");
        assert_eq!(err.code(), "ZP-3003");
        assert_eq!(sim.pad_len(), 0);
    }

    #[test]
    fn run_daemon_refuses_locked_pad_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let pad_path = dir.path().join("pad.bin");
        let holder = PaddingFile::open(&pad_path, crate::core::config::OpenMode::OpenOrCreate).unwrap();
        holder.lock_exclusive().unwrap();

        let mut config = Config::default();
        config.padding.path = Some(pad_path.clone());
        config.padding.on_interrupt = crate::core::config::InterruptPolicy::Remove;
        config.logging.jsonl_path = dir.path().join("activity.jsonl");
        config.logging.fallback_path = None;
        let pidfile = dir.path().join("zeropad.pid");
        std::fs::write(&pidfile, "4242\n").unwrap();

        let err = run_daemon(
            &config,
            &DaemonArgs {
                foreground: true,
                pidfile: Some(pidfile.clone()),
            },
        )
        .expect_err("second instance must fail");
        assert_eq!(err.code(), "ZP-2001");
        assert!(pad_path.exists());
        assert_eq!(std::fs::metadata(&pad_path).unwrap().len(), 0);
        assert_eq!(std::fs::read_to_string(&pidfile).unwrap(), "4242\n");

        let log = std::fs::read_to_string(dir.path().join("activity.jsonl")).unwrap();
        assert!(log.contains("ZP-2001"));
    }

    #[test]
    fn run_daemon_leaves_unrecognised_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let pad_path = dir.path().join("report.txt");
        std::fs::write(&pad_path, vec![b'a'; 5000]).unwrap();

        let mut config = Config::default();
        config.padding.path = Some(pad_path.clone());
        config.padding.on_interrupt = crate::core::config::InterruptPolicy::Remove;
        config.logging.jsonl_path = dir.path().join("activity.jsonl");
        config.logging.fallback_path = None;
        let pidfile = dir.path().join("zeropad.pid");

        let err = run_daemon(
            &config,
            &DaemonArgs {
                foreground: true,
                pidfile: Some(pidfile.clone()),
            },
        )
        .expect_err("a 5000-byte text file is not a pad");
        assert_eq!(err.code(), "ZP-2001");
        assert_eq!(std::fs::read(&pad_path).unwrap(), vec![b'a'; 5000]);
        assert!(!pidfile.exists());
    }

    /// Store whose growth is cut short by a teardown on another thread.
    struct ReleasedMidWrite {
        inner: SimVolume,
        token: CancelToken,
    }

    impl FilesystemProbe for ReleasedMidWrite {
        fn block_size(&self) -> Result<u64> {
            self.inner.block_size()
        }

        fn total_capacity_bytes(&self) -> Result<u64> {
            self.inner.total_capacity_bytes()
        }

        fn free_percent(&self) -> Result<f64> {
            self.inner.free_percent()
        }

        fn file_size_bytes(&self) -> Result<u64> {
            self.inner.file_size_bytes()
        }
    }

    impl PaddingStore for ReleasedMidWrite {
        fn append_blocks(&self, block: &[u8], count: u64) -> Result<u64> {
            self.inner.append_blocks(block, count.min(3))?;
            self.token.cancel(15);
            Err(ZpError::HandleClosed {
                path: PathBuf::from("/sim/pad"),
            })
        }

        fn truncate_to(&self, len: u64) -> Result<()> {
            self.inner.truncate_to(len)
        }
    }

    #[test]
    fn handle_released_by_a_signal_surfaces_as_interrupted() {
        let token = CancelToken::new();
        let store = Arc::new(ReleasedMidWrite {
            inner: SimVolume::new(BLOCK, 100_000_000_000, 0),
            token: token.clone(),
        });
        let mut daemon = PaddingDaemon::init(
            Arc::clone(&store),
            Path::new("/sim/pad"),
            &control(10.0, 20.0, 1, 400),
            false,
            ActivityLoggerHandle::disconnected(),
            token,
        )
        .unwrap();

        match daemon.run().expect_err("run ends on the interrupt") {
            ZpError::Interrupted { signal } => assert_eq!(signal, 15),
            other => panic!("interrupt reported as {other}"),
        }
        assert_eq!(store.inner.pad_len(), 3 * BLOCK);
    }

    #[test]
    fn uncancelled_handle_loss_stays_fatal() {
        let sim = Arc::new(SimVolume::new(BLOCK, 100_000_000_000, 0).failing_after(0));
        let token = CancelToken::new();
        let mut daemon = PaddingDaemon::init(
            sim,
            Path::new("/sim/pad"),
            &control(10.0, 20.0, 1, 400),
            false,
            ActivityLoggerHandle::disconnected(),
            token.clone(),
        )
        .unwrap();
        assert_eq!(daemon.run().unwrap_err().code(), "ZP-3003");
        assert!(!token.is_cancelled());
    }
}
