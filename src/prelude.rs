//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use zeropad::prelude::*;
//! ```

// Core
pub use crate::core::config::{CliOverrides, Config, InterruptPolicy, OpenMode};
pub use crate::core::errors::{Result, ZpError};

// Platform
pub use crate::platform::pal::VolumeStats;

// Monitor
pub use crate::monitor::fs_stats::{FilesystemProbe, FsSnapshot};

// Padding
pub use crate::padding::controller::{BandController, PadAction};
pub use crate::padding::file::{PaddingFile, PaddingStore};
pub use crate::padding::rate::RateLimit;

// Daemon
#[cfg(feature = "daemon")]
pub use crate::daemon::loop_main::{DaemonArgs, PaddingDaemon, run_daemon};
#[cfg(feature = "daemon")]
pub use crate::daemon::signals::{CancelToken, Teardown};
