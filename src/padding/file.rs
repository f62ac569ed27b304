//! The padding file: exclusive ownership, zero-block growth, truncation and a
//! close-once release shared with teardown.
//!
//! The open descriptor lives in a mutex-guarded slot. The control loop holds
//! the mutex only around a single block write, truncate or stat call, and
//! teardown `take()`s the slot. The descriptor is therefore closed exactly
//! once, and a release can never cut a block write in half.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use parking_lot::Mutex;

use crate::core::config::OpenMode;
use crate::core::errors::{Result, ZpError};
use crate::monitor::fs_stats::{FilesystemProbe, FsSnapshot};
use crate::platform::pal::VolumeStats;

/// Mutating half of the controller's view of the pad.
pub trait PaddingStore: FilesystemProbe {
    /// Append `count` copies of `block` at end of file, one write call per
    /// block. Returns the bytes written. A failure leaves every block written
    /// so far in place.
    fn append_blocks(&self, block: &[u8], count: u64) -> Result<u64>;
    /// Truncate the pad to `len` bytes in a single call.
    fn truncate_to(&self, len: u64) -> Result<()>;
}

enum PadHandle {
    Open(File),
    Locked(Flock<File>),
}

impl PadHandle {
    fn file(&self) -> &File {
        match self {
            Self::Open(file) => file,
            Self::Locked(locked) => &**locked,
        }
    }
}

/// A zero-filled file reserving space on the monitored filesystem.
pub struct PaddingFile {
    path: PathBuf,
    handle: Mutex<Option<PadHandle>>,
}

impl PaddingFile {
    /// Open (or create, per `mode`) the pad read-write with mode `0600`.
    pub fn open(path: &Path, mode: OpenMode) -> Result<Self> {
        let mut opts = OpenOptions::new();
        opts.read(true).write(true).mode(0o600);
        match mode {
            OpenMode::OpenOrCreate => {
                opts.create(true).truncate(false);
            }
            OpenMode::CreateNew => {
                opts.create_new(true);
            }
        }

        let file = opts.open(path).map_err(|e| ZpError::ResourceAcquisition {
            path: path.to_path_buf(),
            details: format!("open failed: {e}"),
        })?;
        let meta = file.metadata().map_err(|source| ZpError::FileStat {
            path: path.to_path_buf(),
            source,
        })?;
        if !meta.is_file() {
            return Err(ZpError::ResourceAcquisition {
                path: path.to_path_buf(),
                details: "not a regular file".to_string(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            handle: Mutex::new(Some(PadHandle::Open(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take a non-blocking exclusive advisory lock on the whole file.
    ///
    /// Must run in the final (detached) process: `flock` ownership does not
    /// carry across the fork that detaching performs. Fails if any other
    /// open file description already holds the lock.
    pub fn lock_exclusive(&self) -> Result<()> {
        let mut slot = self.handle.lock();
        match slot.take() {
            Some(PadHandle::Open(file)) => {
                #[allow(deprecated)]
                let attempt = Flock::lock(file, FlockArg::LockExclusiveNonblock);
                match attempt {
                    Ok(locked) => {
                        *slot = Some(PadHandle::Locked(locked));
                        Ok(())
                    }
                    Err((file, errno)) => {
                        *slot = Some(PadHandle::Open(file));
                        let details = if errno == Errno::EWOULDBLOCK {
                            "already locked by another running instance".to_string()
                        } else {
                            format!("flock failed: {}", errno.desc())
                        };
                        Err(ZpError::ResourceAcquisition {
                            path: self.path.clone(),
                            details,
                        })
                    }
                }
            }
            Some(locked @ PadHandle::Locked(_)) => {
                *slot = Some(locked);
                Ok(())
            }
            None => Err(ZpError::HandleClosed {
                path: self.path.clone(),
            }),
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(*self.handle.lock(), Some(PadHandle::Locked(_)))
    }

    pub fn is_open(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Close the descriptor (dropping the lock with it).
    ///
    /// Returns `true` only for the call that actually closed it; every later
    /// call, from any thread, is a no-op.
    pub fn release(&self) -> bool {
        let handle = self.handle.lock().take();
        handle.is_some()
    }

    /// Refuse to adopt an existing file that does not look like a pad.
    ///
    /// A non-empty file must be a whole number of blocks with an all-zero
    /// first and last block. Anything else (a mistyped path, or a pad cut
    /// short mid-block) would be grown and truncated off its block grid.
    pub fn check_resumable(&self) -> Result<()> {
        let block = self.block_size()?;
        let len = self.file_size_bytes()?;
        if len == 0 || block == 0 {
            return Ok(());
        }
        if len % block != 0 {
            return Err(ZpError::ResourceAcquisition {
                path: self.path.clone(),
                details: format!(
                    "existing size {len} is not a multiple of the {block}-byte block size"
                ),
            });
        }

        let block_len = usize::try_from(block).map_err(|_| ZpError::ResourceAcquisition {
            path: self.path.clone(),
            details: format!("block size {block} does not fit in memory"),
        })?;
        let mut buf = vec![0u8; block_len];
        for offset in [0, len - block] {
            self.with_file(|file| {
                file.read_exact_at(&mut buf, offset)
                    .map_err(|e| ZpError::io("read", &self.path, e))
            })?;
            if buf.iter().any(|&b| b != 0) {
                return Err(ZpError::ResourceAcquisition {
                    path: self.path.clone(),
                    details: format!("existing file has non-zero data near offset {offset}"),
                });
            }
        }
        Ok(())
    }

    /// Unlink the pad from disk. Call after [`PaddingFile::release`].
    pub fn remove(&self) -> Result<()> {
        fs::remove_file(&self.path).map_err(|e| ZpError::io("remove", &self.path, e))
    }

    fn with_file<T>(&self, op: impl FnOnce(&File) -> Result<T>) -> Result<T> {
        let slot = self.handle.lock();
        match slot.as_ref() {
            Some(handle) => op(handle.file()),
            None => Err(ZpError::HandleClosed {
                path: self.path.clone(),
            }),
        }
    }

    fn volume(&self) -> Result<VolumeStats> {
        self.with_file(|file| VolumeStats::of_file(file, &self.path))
    }
}

impl FilesystemProbe for PaddingFile {
    fn block_size(&self) -> Result<u64> {
        Ok(self.volume()?.block_size)
    }

    fn total_capacity_bytes(&self) -> Result<u64> {
        Ok(self.volume()?.total_bytes())
    }

    fn free_percent(&self) -> Result<f64> {
        Ok(self.volume()?.free_pct())
    }

    fn file_size_bytes(&self) -> Result<u64> {
        self.with_file(|file| {
            file.metadata()
                .map(|m| m.len())
                .map_err(|source| ZpError::FileStat {
                    path: self.path.clone(),
                    source,
                })
        })
    }

    fn snapshot(&self) -> Result<FsSnapshot> {
        let volume = self.volume()?;
        Ok(FsSnapshot {
            block_size: volume.block_size,
            total_bytes: volume.total_bytes(),
            free_pct: volume.free_pct(),
        })
    }
}

impl PaddingStore for PaddingFile {
    fn append_blocks(&self, block: &[u8], count: u64) -> Result<u64> {
        if count == 0 || block.is_empty() {
            return Ok(0);
        }
        self.with_file(|mut file| {
            file.seek(SeekFrom::End(0))
                .map(|_| ())
                .map_err(|e| ZpError::io("seek", &self.path, e))
        })?;

        let mut written: u64 = 0;
        for _ in 0..count {
            self.with_file(|mut file| {
                let n = file
                    .write(block)
                    .map_err(|e| ZpError::io("write", &self.path, e))?;
                if n == block.len() {
                    Ok(())
                } else {
                    Err(ZpError::io(
                        "write",
                        &self.path,
                        io::Error::new(
                            io::ErrorKind::WriteZero,
                            format!("short write: {n} of {} bytes", block.len()),
                        ),
                    ))
                }
            })?;
            written += block.len() as u64;
        }
        Ok(written)
    }

    fn truncate_to(&self, len: u64) -> Result<()> {
        self.with_file(|file| {
            file.set_len(len)
                .map_err(|e| ZpError::io("truncate", &self.path, e))
        })
    }
}
