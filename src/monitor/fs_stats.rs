//! Filesystem probe: the four per-iteration queries the controller relies on.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;

/// One fresh reading of the target filesystem. Never cached across iterations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FsSnapshot {
    pub block_size: u64,
    pub total_bytes: u64,
    pub free_pct: f64,
}

/// Side-effect free queries against the filesystem holding the padding file.
///
/// Every call re-reads the filesystem, so results include activity this
/// process does not own.
pub trait FilesystemProbe {
    /// Fundamental block size in bytes.
    fn block_size(&self) -> Result<u64>;
    /// Total capacity (block count × fragment size).
    fn total_capacity_bytes(&self) -> Result<u64>;
    /// `100 * unprivileged-available blocks / total blocks`.
    fn free_percent(&self) -> Result<f64>;
    /// Current size of the padding file.
    fn file_size_bytes(&self) -> Result<u64>;

    /// Filesystem-wide values in one reading. Implementors backed by a single
    /// syscall should override this.
    fn snapshot(&self) -> Result<FsSnapshot> {
        Ok(FsSnapshot {
            block_size: self.block_size()?,
            total_bytes: self.total_capacity_bytes()?,
            free_pct: self.free_percent()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ZpError;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProbe {
        calls: AtomicUsize,
        fail_free: bool,
    }

    impl FilesystemProbe for CountingProbe {
        fn block_size(&self) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(4096)
        }

        fn total_capacity_bytes(&self) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(1 << 30)
        }

        fn free_percent(&self) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_free {
                return Err(ZpError::FilesystemQuery {
                    path: PathBuf::from("/pad"),
                    details: "EIO".to_string(),
                });
            }
            Ok(42.0)
        }

        fn file_size_bytes(&self) -> Result<u64> {
            Ok(0)
        }
    }

    #[test]
    fn default_snapshot_reads_each_value_fresh() {
        let probe = CountingProbe {
            calls: AtomicUsize::new(0),
            fail_free: false,
        };
        let first = probe.snapshot().expect("snapshot");
        let _second = probe.snapshot().expect("snapshot");
        assert_eq!(first.block_size, 4096);
        assert_eq!(first.total_bytes, 1 << 30);
        assert!((first.free_pct - 42.0).abs() < f64::EPSILON);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn default_snapshot_propagates_query_failure() {
        let probe = CountingProbe {
            calls: AtomicUsize::new(0),
            fail_free: true,
        };
        let err = probe.snapshot().expect_err("free query fails");
        assert_eq!(err.code(), "ZP-3001");
    }
}
