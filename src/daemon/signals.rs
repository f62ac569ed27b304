//! Interrupt handling: SIGINT/SIGTERM teardown and cooperative cancellation.
//!
//! The raw signal context only records the signal (via `signal-hook`'s
//! self-pipe). A supervisor thread picks it up, cancels the [`CancelToken`],
//! runs [`Teardown`] and exits the process with status 1 without ever
//! returning to the control loop.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::core::config::InterruptPolicy;
use crate::core::errors::{Result, ZpError};
use crate::logger::activity::{ActivityEvent, ActivityLogger};
use crate::padding::file::PaddingFile;

// ──────────────────── cancel token ────────────────────

/// Shared cancellation flag with a wake-up channel for the inter-iteration
/// sleep.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    signal: Arc<AtomicI32>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            signal: Arc::new(AtomicI32::new(0)),
            wake_tx,
            wake_rx,
        }
    }

    /// Mark as cancelled on behalf of `signal` and wake any sleeper.
    pub fn cancel(&self, signal: i32) {
        self.signal.store(signal, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
        let _ = self.wake_tx.try_send(());
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Signal that caused cancellation, if any.
    pub fn signal(&self) -> Option<i32> {
        self.is_cancelled()
            .then(|| self.signal.load(Ordering::SeqCst))
    }

    /// Sleep for up to `duration`. Returns `true` if cancelled meanwhile.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        match self.wake_rx.recv_timeout(duration) {
            Ok(()) => {
                // Re-arm for any other sleeper sharing the token.
                let _ = self.wake_tx.try_send(());
                self.is_cancelled()
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                self.is_cancelled()
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────── teardown ────────────────────

/// Why teardown is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownCause {
    Signal(i32),
    /// A fatal loop error; carries its `ZP-` code.
    Fatal(&'static str),
}

/// What teardown actually did. Only the first run does anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TeardownOutcome {
    pub ran: bool,
    pub closed: bool,
    pub removed: bool,
}

/// Close-once release of the padding file, then remove-or-keep per policy,
/// then flush the activity log.
pub struct Teardown {
    pad: Arc<PaddingFile>,
    policy: InterruptPolicy,
    logger: Arc<ActivityLogger>,
    /// Held for the whole first run; `true` once it has finished.
    done: Mutex<bool>,
    started: Instant,
}

impl Teardown {
    pub fn new(pad: Arc<PaddingFile>, policy: InterruptPolicy, logger: Arc<ActivityLogger>) -> Self {
        Self {
            pad,
            policy,
            logger,
            done: Mutex::new(false),
            started: Instant::now(),
        }
    }

    pub fn policy(&self) -> InterruptPolicy {
        self.policy
    }

    /// Run teardown. A concurrent caller blocks until the first run has
    /// finished, then gets a default (not-ran) outcome, so nobody can exit
    /// the process while the file is still being removed or the log flushed.
    pub fn run(&self, cause: TeardownCause) -> TeardownOutcome {
        let mut done = self.done.lock();
        if *done {
            return TeardownOutcome::default();
        }

        let handle = self.logger.handle();
        let closed = self.pad.release();
        let mut removed = false;
        if closed && self.policy == InterruptPolicy::Remove {
            match self.pad.remove() {
                Ok(()) => removed = true,
                Err(e) => handle.send(ActivityEvent::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                }),
            }
        }

        let path = self.pad.path().display().to_string();
        match cause {
            TeardownCause::Signal(signal) => handle.send(ActivityEvent::Interrupted {
                signal,
                path,
                removed,
            }),
            TeardownCause::Fatal(code) => handle.send(ActivityEvent::DaemonStopped {
                reason: if removed {
                    format!("fatal {code}, padding file {path} removed")
                } else {
                    format!("fatal {code}, padding file {path} left in place")
                },
                uptime_secs: self.started.elapsed().as_secs(),
            }),
        }
        self.logger.finish();
        *done = true;

        TeardownOutcome {
            ran: true,
            closed,
            removed,
        }
    }
}

// ──────────────────── signal supervisor ────────────────────

/// Owns the SIGINT/SIGTERM registration.
pub struct SignalSupervisor;

impl SignalSupervisor {
    /// Register SIGINT/SIGTERM and spawn the supervisor thread.
    ///
    /// Must run after detaching: the thread would not survive the fork.
    pub fn spawn(teardown: Arc<Teardown>, token: CancelToken) -> Result<thread::JoinHandle<()>> {
        let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|e| ZpError::Runtime {
            details: format!("failed to register SIGINT/SIGTERM: {e}"),
        })?;

        thread::Builder::new()
            .name("zp-signals".to_string())
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    handle_signal(&teardown, &token, signal);
                    std::process::exit(1);
                }
            })
            .map_err(|e| ZpError::Runtime {
                details: format!("failed to spawn signal thread: {e}"),
            })
    }
}

/// Everything the supervisor does for one signal, short of exiting.
pub fn handle_signal(teardown: &Teardown, token: &CancelToken, signal: i32) -> TeardownOutcome {
    token.cancel(signal);
    teardown.run(TeardownCause::Signal(signal))
}

// ──────────────────── tests ────────────────────
