//! Thin OS layer: `fstatvfs` volume statistics, detaching from the controlling
//! terminal, and pidfile bookkeeping.

#![allow(missing_docs)]

use std::fs::{self, File};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, ZpError};

/// Raw counters for the filesystem that holds an open file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeStats {
    /// Preferred I/O block size (`f_bsize`).
    pub block_size: u64,
    /// Fundamental fragment size (`f_frsize`); the unit of the block counters.
    pub fragment_size: u64,
    pub blocks: u64,
    pub blocks_free: u64,
    /// Blocks available to unprivileged users.
    pub blocks_available: u64,
    pub is_readonly: bool,
}

impl VolumeStats {
    /// Query the filesystem containing `file`.
    #[allow(clippy::useless_conversion)]
    pub fn of_file(file: &File, path: &Path) -> Result<Self> {
        let stat = nix::sys::statvfs::fstatvfs(file).map_err(|errno| ZpError::FilesystemQuery {
            path: path.to_path_buf(),
            details: errno.desc().to_string(),
        })?;
        Ok(Self {
            block_size: u64::from(stat.block_size()),
            fragment_size: u64::from(stat.fragment_size()),
            blocks: u64::from(stat.blocks()),
            blocks_free: u64::from(stat.blocks_free()),
            blocks_available: u64::from(stat.blocks_available()),
            is_readonly: stat.flags().contains(nix::sys::statvfs::FsFlags::ST_RDONLY),
        })
    }

    /// Total capacity in bytes (block count × fragment size).
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.blocks.saturating_mul(self.fragment_size)
    }

    /// Free space as seen by an unprivileged user, in percent.
    ///
    /// Blocks reserved for the superuser count as used.
    #[must_use]
    pub fn free_pct(&self) -> f64 {
        if self.blocks == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            (self.blocks_available as f64 * 100.0) / self.blocks as f64
        }
    }
}

/// Detach from the controlling terminal and continue in the background.
///
/// Keeps the working directory (so relative padding paths stay valid) and
/// redirects stdio to `/dev/null`. Threads do not survive this call: anything
/// that spawns one must run afterwards.
pub fn detach_from_terminal(path: &Path) -> Result<()> {
    nix::unistd::daemon(true, false).map_err(|errno| ZpError::ResourceAcquisition {
        path: path.to_path_buf(),
        details: format!("failed to detach into background: {}", errno.desc()),
    })
}

/// Record the current PID at `pidfile`, creating parent directories.
pub fn write_pidfile(pidfile: &Path) -> Result<()> {
    if let Some(parent) = pidfile.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| ZpError::io("create", parent, e))?;
    }
    fs::write(pidfile, format!("{}\n", std::process::id()))
        .map_err(|e| ZpError::io("write", pidfile, e))
}
